use crate::buffer::{BufferPool, Datagram};
use crate::source::DatagramSource;
use crate::stats::{incr, BridgeStats};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receive loop
///
/// Reads datagrams from a source into pooled buffers, and submits each one
/// to the worker pool. Submission blocks while the job queue is full.
pub struct Dispatcher {
    pool: BufferPool,
    jobs: Sender<Datagram>,
    stats: Arc<BridgeStats>,
}

impl Dispatcher {
    pub fn new(pool: BufferPool, jobs: Sender<Datagram>, stats: Arc<BridgeStats>) -> Self {
        Dispatcher { pool, jobs, stats }
    }

    /// Run until the source is exhausted, `running` is cleared, or the
    /// workers are gone
    ///
    /// Receive errors are logged and counted, and do not stop the loop.
    pub fn run(&mut self, source: &mut dyn DatagramSource, running: &AtomicBool) {
        debug!(
            "receive loop starting: {} buffers of {} bytes",
            self.pool.capacity(),
            self.pool.buffer_size()
        );
        while running.load(Ordering::SeqCst) {
            let mut datagram = self.pool.acquire();
            match source.recv(datagram.buffer_mut()) {
                Ok(Some(len)) => {
                    datagram.set_len(len);
                    incr(&self.stats.datagrams_received);
                    trace!("dispatching datagram ({} bytes)", len);
                    if self.jobs.send(datagram).is_err() {
                        warn!("job queue closed, stopping receive loop");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("source exhausted");
                    break;
                }
                Err(e) if e.is_timeout() => (),
                Err(e) => {
                    warn!("receive failed: {}", e);
                    incr(&self.stats.receive_errors);
                }
            }
        }
        debug!("receive loop stopped");
    }
}
