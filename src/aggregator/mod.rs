//! Count aggregation.
//!
//! Turns the pump's per-detection head counts into occupancy records:
//! - `OccupancyStatus`: normal / near / over capacity
//! - `OccupancyAggregator`: baseline + delta tracking, one entry/exit event per change
//! - `CountSink`: where records go (`RestSink`, `LocalStore`, `FallbackSink`)
//! - `BackgroundAggregator`: moves delivery off the caller's thread

mod background;
mod fallback;
mod rest;
mod status;
mod store;

use std::collections::VecDeque;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use background::{BackgroundAggregator, REPORT_QUEUE_DEPTH};
pub use fallback::{FallbackSink, DEFAULT_RETRY_AFTER};
pub use rest::RestSink;
pub use status::{OccupancyStatus, DEFAULT_NEAR_RATIO};
pub use store::{LocalStore, OutboxItem, OutboxKind, DEFAULT_OUTBOX_LIMIT};

use crate::now_s;

/// Default number of count log entries kept in memory.
pub const DEFAULT_LOG_LIMIT: usize = 500;

/// One reported head count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLogEntry {
    pub count: usize,
    pub status: OccupancyStatus,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryExitKind {
    Entry,
    Exit,
}

/// A change in head count. `count` is the magnitude of the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryExitEvent {
    #[serde(rename = "type")]
    pub kind: EntryExitKind,
    pub count: usize,
    pub timestamp: u64,
}

/// Receives head counts from the frame pump.
pub trait CountAggregator: Send {
    fn report_count(&mut self, count: usize) -> Result<()>;

    /// Capacity of the monitored location, when known.
    fn capacity(&self) -> Option<u32>;
}

/// Destination for count records of one location.
pub trait CountSink: Send {
    fn record_count(&mut self, entry: &CountLogEntry) -> Result<()>;

    fn record_entry_exit(&mut self, event: &EntryExitEvent) -> Result<()>;

    fn fetch_capacity(&mut self) -> Result<Option<u32>>;
}

/// Derives status and entry/exit events from successive counts.
///
/// The first report only sets the baseline. Every later change emits exactly one event
/// whose magnitude is the absolute delta. Unchanged counts are logged in memory but not
/// forwarded to the sink.
pub struct OccupancyAggregator<S: CountSink> {
    sink: S,
    capacity: Option<u32>,
    near_ratio: f32,
    last_count: Option<usize>,
    log: VecDeque<CountLogEntry>,
    log_limit: usize,
}

impl<S: CountSink> OccupancyAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            capacity: None,
            near_ratio: DEFAULT_NEAR_RATIO,
            last_count: None,
            log: VecDeque::new(),
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }

    pub fn with_capacity(mut self, capacity: Option<u32>) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_near_ratio(mut self, ratio: f32) -> Self {
        self.near_ratio = ratio;
        self
    }

    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit.max(1);
        self
    }

    /// Ask the sink for the location capacity; keeps the current value on failure.
    pub fn refresh_capacity(&mut self) -> Option<u32> {
        match self.sink.fetch_capacity() {
            Ok(Some(capacity)) => self.capacity = Some(capacity),
            Ok(None) => {}
            Err(err) => log::warn!("OccupancyAggregator: capacity lookup failed: {:#}", err),
        }
        self.capacity
    }

    /// Record `count`, returning the entry/exit event it produced, if any.
    pub fn report(&mut self, count: usize) -> Result<Option<EntryExitEvent>> {
        let timestamp = now_s()?;
        let status = OccupancyStatus::from_count(count, self.capacity, self.near_ratio);
        let entry = CountLogEntry {
            count,
            status,
            timestamp,
        };
        if self.log.len() >= self.log_limit {
            self.log.pop_front();
        }
        self.log.push_back(entry.clone());

        let previous = self.last_count.replace(count);
        if previous == Some(count) {
            return Ok(None);
        }
        let event = previous.map(|previous| EntryExitEvent {
            kind: if count > previous {
                EntryExitKind::Entry
            } else {
                EntryExitKind::Exit
            },
            count: count.abs_diff(previous),
            timestamp,
        });

        if status != OccupancyStatus::Normal {
            log::info!("OccupancyAggregator: {} people ({})", count, status);
        }
        let recorded = self.sink.record_count(&entry);
        let announced = match &event {
            Some(event) => self.sink.record_entry_exit(event),
            None => Ok(()),
        };
        recorded?;
        announced?;
        Ok(event)
    }

    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }

    pub fn status(&self) -> OccupancyStatus {
        self.log
            .back()
            .map(|entry| entry.status)
            .unwrap_or(OccupancyStatus::Normal)
    }

    /// In-memory count log, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &CountLogEntry> {
        self.log.iter()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: CountSink> CountAggregator for OccupancyAggregator<S> {
    fn report_count(&mut self, count: usize) -> Result<()> {
        self.report(count).map(|_| ())
    }

    fn capacity(&self) -> Option<u32> {
        self.capacity
    }
}
