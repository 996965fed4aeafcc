use crate::message::FlowMessage;
use crate::sink::Sink;
use crate::stats::{incr, BridgeStats};
use crossbeam_channel::Receiver;
use libnetflow_tools::FlowRecord;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Output stage: serializes records and emits them on a sink
///
/// Records are published in the order they are taken from the output queue.
/// Failures are logged and counted, the record is dropped and publishing
/// goes on.
pub struct Publisher<S: Sink> {
    sink: S,
    stats: Arc<BridgeStats>,
}

impl<S: Sink> Publisher<S> {
    pub fn new(sink: S, stats: Arc<BridgeStats>) -> Self {
        Publisher { sink, stats }
    }

    /// Publish one record
    pub fn publish(&mut self, record: &FlowRecord) {
        let msg = FlowMessage::from(record);
        let data = match msg.to_json() {
            Ok(data) => data,
            Err(e) => {
                warn!("could not serialize record: {}", e);
                incr(&self.stats.serialize_errors);
                return;
            }
        };
        trace!("publishing {} bytes", data.len());
        match self.sink.send(&data) {
            Ok(0) => {
                trace!("no subscriber, message discarded");
                incr(&self.stats.messages_discarded);
            }
            Ok(_) => incr(&self.stats.messages_published),
            Err(e) => {
                warn!("publish failed: {}", e);
                incr(&self.stats.publish_errors);
            }
        }
    }

    /// Publish records until the output queue is closed and drained, then
    /// give the sink back
    pub fn run(mut self, records: Receiver<FlowRecord>) -> S {
        for record in records.iter() {
            self.publish(&record);
        }
        info!("output queue closed, publisher stopping");
        self.sink
    }
}
