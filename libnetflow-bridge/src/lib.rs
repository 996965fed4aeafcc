mod bridge;
pub use bridge::*;

mod buffer;
pub use buffer::*;

mod dispatcher;
pub use dispatcher::*;

mod message;
pub use message::*;

mod publisher;
pub use publisher::*;

mod sink;
pub use sink::*;

mod source;
pub use source::*;

mod stats;
pub use stats::*;

mod worker_pool;
pub use worker_pool::*;

mod zmq_sink;
pub use zmq_sink::*;

pub use libnetflow_tools::{Config, Error, FlowRecord};
