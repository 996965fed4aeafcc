use crate::buffer::BufferPool;
use crate::dispatcher::Dispatcher;
use crate::publisher::Publisher;
use crate::sink::Sink;
use crate::source::DatagramSource;
use crate::stats::{BridgeStats, StatsSnapshot};
use crate::worker_pool::{WorkerPool, DEFAULT_NUM_WORKERS};
use crossbeam_channel::bounded;
use libnetflow_tools::{Config, Error};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

pub const DEFAULT_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_OUTPUT_QUEUE_SIZE: usize = 1000;
/// Receive buffer size, larger datagrams are truncated
pub const DEFAULT_BUFFER_SIZE: usize = 1500;

/// Pipeline sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub num_workers: usize,
    /// Capacity of the datagram (work) queue
    pub queue_size: usize,
    /// Capacity of the record (output) queue
    pub output_queue_size: usize,
    pub buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            num_workers: DEFAULT_NUM_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            output_queue_size: DEFAULT_OUTPUT_QUEUE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Read `num_workers`, `queue_size`, `output_queue_size` and `buffer_size`
    ///
    /// Missing or invalid values are replaced by defaults. The worker count
    /// is at least 1.
    pub fn from_config(config: &Config) -> Self {
        let d = BridgeConfig::default();
        BridgeConfig {
            num_workers: config
                .get_usize("num_workers")
                .unwrap_or(d.num_workers)
                .max(1),
            queue_size: config.get_usize("queue_size").unwrap_or(d.queue_size),
            output_queue_size: config
                .get_usize("output_queue_size")
                .unwrap_or(d.output_queue_size),
            buffer_size: config
                .get_usize("buffer_size")
                .filter(|&sz| sz > 0)
                .unwrap_or(d.buffer_size),
        }
    }
}

/// NetFlow v5 to pub/sub bridge
///
/// Wires one dispatcher (on the calling thread), a pool of decode workers and
/// one publisher thread through bounded queues.
pub struct Bridge {
    config: BridgeConfig,
    stats: Arc<BridgeStats>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Bridge {
            config,
            stats: Arc::new(BridgeStats::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current values of the pipeline counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the pipeline until the source is exhausted or `running` is cleared
    ///
    /// In-flight datagrams and records are drained before returning. The sink
    /// is given back once the publisher has stopped.
    pub fn run<S>(
        &self,
        source: &mut dyn DatagramSource,
        sink: S,
        running: &AtomicBool,
    ) -> Result<S, Error>
    where
        S: Sink + Send + 'static,
    {
        let cfg = self.config;
        let (jobs_tx, jobs_rx) = bounded(cfg.queue_size);
        let (records_tx, records_rx) = bounded(cfg.output_queue_size);

        let publisher = Publisher::new(sink, self.stats.clone());
        let publisher = thread::Builder::new()
            .name("publisher".to_owned())
            .spawn(move || publisher.run(records_rx))?;

        let workers = WorkerPool::start(cfg.num_workers, jobs_rx, records_tx, self.stats.clone())?;
        info!(
            "bridge started: {} workers, queue sizes {}/{}",
            workers.num_workers(),
            cfg.queue_size,
            cfg.output_queue_size
        );

        let pool = BufferPool::new(
            cfg.num_workers + cfg.queue_size + 1,
            cfg.buffer_size,
        );
        let mut dispatcher = Dispatcher::new(pool, jobs_tx, self.stats.clone());
        dispatcher.run(source, running);
        // closing the work queue stops the workers once it is drained
        drop(dispatcher);

        debug!("waiting for workers");
        workers.join();
        debug!("waiting for publisher");
        let sink = publisher
            .join()
            .map_err(|_| Error::Generic("publisher thread panicked"))?;

        let s = self.stats.snapshot();
        info!(
            "bridge stopped: {} datagrams received, {} receive errors, {} skipped",
            s.datagrams_received, s.receive_errors, s.datagrams_skipped
        );
        info!(
            "records: {} decoded, {} truncated, {} published, {} discarded ({} serialize errors, {} publish errors)",
            s.records_decoded,
            s.records_truncated,
            s.messages_published,
            s.messages_discarded,
            s.serialize_errors,
            s.publish_errors
        );
        if s.worker_panics > 0 {
            info!("{} datagrams discarded after worker panics", s.worker_panics);
        }
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_config_from_config() {
        let mut config = Config::default();
        assert_eq!(BridgeConfig::from_config(&config), BridgeConfig::default());
        config.set("num_workers", 0_i64);
        config.set("queue_size", 10_i64);
        config.set("output_queue_size", 20_i64);
        config.set("buffer_size", 9000_i64);
        let cfg = BridgeConfig::from_config(&config);
        assert_eq!(cfg.num_workers, 1);
        assert_eq!(cfg.queue_size, 10);
        assert_eq!(cfg.output_queue_size, 20);
        assert_eq!(cfg.buffer_size, 9000);
        config.set("num_workers", -3_i64);
        assert_eq!(BridgeConfig::from_config(&config).num_workers, DEFAULT_NUM_WORKERS);
    }
}
