use crate::buffer::Datagram;
use crate::stats::{incr, BridgeStats};
use crossbeam_channel::{Receiver, Sender};
use libnetflow_tools::{decode, Error, FlowRecord, FlowRecords};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

pub const DEFAULT_NUM_WORKERS: usize = 100;

/// Datagram decoder run by the workers
pub type DecodeFn = for<'a> fn(&'a [u8]) -> FlowRecords<'a>;

pub struct Worker {
    pub(crate) _id: usize,
    pub(crate) handler: thread::JoinHandle<()>,
}

/// Outcome of decoding one datagram
enum Handled {
    Done,
    /// Output queue is closed
    Closed,
}

/// Fixed set of decoding threads
///
/// All workers take datagrams from the same job queue, decode them and push
/// the records to the output queue, in datagram order. Pushing blocks while
/// the output queue is full. A worker exits when the job queue is closed and
/// drained, or when the output queue is closed.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start `n_workers` threads decoding NetFlow v5
    pub fn start(
        n_workers: usize,
        jobs: Receiver<Datagram>,
        output: Sender<FlowRecord>,
        stats: Arc<BridgeStats>,
    ) -> Result<Self, Error> {
        Self::start_with(n_workers, jobs, output, stats, decode)
    }

    /// Start `n_workers` threads running `decoder` on each datagram
    pub fn start_with(
        n_workers: usize,
        jobs: Receiver<Datagram>,
        output: Sender<FlowRecord>,
        stats: Arc<BridgeStats>,
        decoder: DecodeFn,
    ) -> Result<Self, Error> {
        let n_workers = n_workers.max(1);
        let mut workers = Vec::with_capacity(n_workers);
        for i in 0..n_workers {
            let jobs = jobs.clone();
            let output = output.clone();
            let stats = stats.clone();
            let n = format!("worker {}", i);
            let builder = thread::Builder::new();
            let handler = builder.name(n).spawn(move || {
                trace!("worker thread {} starting", i);
                for datagram in jobs.iter() {
                    let res = catch_unwind(AssertUnwindSafe(|| {
                        handle_datagram(i, &datagram, decoder, &output, &stats)
                    }));
                    match res {
                        Ok(Handled::Done) => (),
                        Ok(Handled::Closed) => {
                            debug!("thread {}: output queue closed", i);
                            break;
                        }
                        Err(panic) => {
                            warn!(
                                "thread {} panicked, datagram discarded ({} bytes)\n{:?}",
                                i,
                                datagram.len(),
                                panic
                            );
                            incr(&stats.worker_panics);
                        }
                    }
                }
                trace!("worker thread {} exiting", i);
            })?;
            workers.push(Worker { _id: i, handler });
        }
        debug!("started {} workers", n_workers);
        Ok(WorkerPool { workers })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Wait for all workers to exit
    pub fn join(self) {
        for w in self.workers {
            if let Err(e) = w.handler.join() {
                warn!("worker {} exited abnormally: {:?}", w._id, e);
            }
        }
    }
}

fn handle_datagram(
    i: usize,
    datagram: &[u8],
    decoder: DecodeFn,
    output: &Sender<FlowRecord>,
    stats: &BridgeStats,
) -> Handled {
    let mut records = decoder(datagram);
    let declared = records.declared();
    let available = records.available();
    match records.header() {
        Some(h) => trace!(
            "thread {}: datagram seq={} count={}",
            i,
            h.flow_sequence,
            h.count
        ),
        None => {
            debug!(
                "thread {}: not a NetFlow v5 datagram ({} bytes), skipped",
                i,
                datagram.len()
            );
            incr(&stats.datagrams_skipped);
            return Handled::Done;
        }
    }
    if records.truncated() {
        debug!(
            "thread {}: truncated datagram, {} records declared, {} available",
            i, declared, available
        );
        stats
            .records_truncated
            .fetch_add((declared - available) as u64, Ordering::Relaxed);
    }
    for record in records.by_ref() {
        if output.send(record).is_err() {
            return Handled::Closed;
        }
        incr(&stats.records_decoded);
    }
    Handled::Done
}
