mod config;
mod error;
pub mod netflow_v5;
mod replay;

pub use config::*;
pub use error::*;
pub use netflow_v5::{decode, FlowHeader, FlowRecord, FlowRecords};
pub use replay::*;

pub use pcap_parser;
