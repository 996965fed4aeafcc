use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, shared by all stages
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Datagrams read from the source
    pub datagrams_received: AtomicU64,
    /// Failed reads from the source (timeouts excluded)
    pub receive_errors: AtomicU64,
    /// Datagrams without a NetFlow v5 header
    pub datagrams_skipped: AtomicU64,
    /// Records sent to the output queue
    pub records_decoded: AtomicU64,
    /// Declared records missing from truncated datagrams
    pub records_truncated: AtomicU64,
    /// Datagrams discarded after a worker panic
    pub worker_panics: AtomicU64,
    /// Messages sent to at least one subscriber
    pub messages_published: AtomicU64,
    /// Messages dropped because no subscriber was connected
    pub messages_discarded: AtomicU64,
    pub serialize_errors: AtomicU64,
    pub publish_errors: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub receive_errors: u64,
    pub datagrams_skipped: u64,
    pub records_decoded: u64,
    pub records_truncated: u64,
    pub worker_panics: u64,
    pub messages_published: u64,
    pub messages_discarded: u64,
    pub serialize_errors: u64,
    pub publish_errors: u64,
}

#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BridgeStats {
    pub fn new() -> Self {
        BridgeStats::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            datagrams_skipped: self.datagrams_skipped.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            records_truncated: self.records_truncated.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            serialize_errors: self.serialize_errors.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}
