use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use super::CountAggregator;

/// Reports waiting for the reporter thread before new ones are refused.
pub const REPORT_QUEUE_DEPTH: usize = 256;

const NO_CAPACITY: u64 = u64::MAX;

/// Runs another aggregator on a dedicated `count-reporter` thread.
///
/// `report_count` only enqueues, so slow sinks (a REST backend that accepts connections
/// but never answers) cannot stall the frame pump. Dropping the handle closes the queue
/// and waits for the thread to drain what is already queued.
pub struct BackgroundAggregator {
    reports: Option<SyncSender<usize>>,
    capacity: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundAggregator {
    pub fn spawn<A>(aggregator: A) -> Result<Self>
    where
        A: CountAggregator + 'static,
    {
        Self::spawn_with_depth(aggregator, REPORT_QUEUE_DEPTH)
    }

    pub fn spawn_with_depth<A>(mut aggregator: A, depth: usize) -> Result<Self>
    where
        A: CountAggregator + 'static,
    {
        let capacity = Arc::new(AtomicU64::new(encode(aggregator.capacity())));
        let (tx, rx) = mpsc::sync_channel::<usize>(depth.max(1));
        let shared = capacity.clone();
        let handle = thread::Builder::new()
            .name("count-reporter".to_string())
            .spawn(move || {
                for count in rx {
                    if let Err(err) = aggregator.report_count(count) {
                        log::warn!("BackgroundAggregator: count report failed: {:#}", err);
                    }
                    shared.store(encode(aggregator.capacity()), Ordering::Relaxed);
                }
            })
            .context("spawn count reporter")?;
        Ok(Self {
            reports: Some(tx),
            capacity,
            handle: Some(handle),
        })
    }

    /// Close the queue and wait for queued reports to be delivered.
    pub fn shutdown(&mut self) {
        self.reports = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("BackgroundAggregator: reporter thread panicked");
            }
        }
    }
}

fn encode(capacity: Option<u32>) -> u64 {
    capacity.map(u64::from).unwrap_or(NO_CAPACITY)
}

impl CountAggregator for BackgroundAggregator {
    /// Never blocks: a full queue drops the report.
    fn report_count(&mut self, count: usize) -> Result<()> {
        let reports = self
            .reports
            .as_ref()
            .ok_or_else(|| anyhow!("count reporter has shut down"))?;
        match reports.try_send(count) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!(
                "count reporter is behind; dropped count {}",
                count
            )),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("count reporter has stopped")),
        }
    }

    fn capacity(&self) -> Option<u32> {
        match self.capacity.load(Ordering::Relaxed) {
            NO_CAPACITY => None,
            value => u32::try_from(value).ok(),
        }
    }
}

impl Drop for BackgroundAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
