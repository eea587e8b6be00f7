use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use super::store::{LocalStore, OutboxItem, OutboxKind};
use super::{CountLogEntry, CountSink, EntryExitEvent, RestSink};

/// Default wait before an offline sink tries the remote again.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Outbox records read per flush round.
const FLUSH_BATCH: usize = 64;

/// Remote-first sink with a local outbox.
///
/// Every record is mirrored locally. Delivery to the remote is attempted after the
/// outbox has been drained, so the backend always sees records in order. A failed
/// delivery queues the record and marks the sink offline. While offline, records go
/// straight to the outbox until the retry delay has passed.
pub struct FallbackSink<R: CountSink = RestSink> {
    remote: R,
    local: LocalStore,
    online: bool,
    retry_after: Duration,
    next_attempt: Option<Instant>,
}

impl<R: CountSink> FallbackSink<R> {
    pub fn new(remote: R, local: LocalStore) -> Self {
        Self {
            remote,
            local,
            online: true,
            retry_after: DEFAULT_RETRY_AFTER,
            next_attempt: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    fn backing_off(&self) -> bool {
        !self.online
            && self
                .next_attempt
                .is_some_and(|next_attempt| Instant::now() < next_attempt)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Deliver queued records in order. Stops at the first remote failure.
    pub fn flush(&mut self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let batch = self.local.pending(FLUSH_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for item in batch {
                self.send_queued(&item)?;
                self.local.remove(item.id)?;
                delivered += 1;
            }
        }
        if delivered > 0 {
            log::info!("FallbackSink: flushed {} queued record(s)", delivered);
        }
        Ok(delivered)
    }

    fn send_queued(&mut self, item: &OutboxItem) -> Result<()> {
        let decoded = match item.kind {
            OutboxKind::Count => serde_json::from_str::<CountLogEntry>(&item.payload_json)
                .map(|entry| self.remote.record_count(&entry)),
            OutboxKind::EntryExit => serde_json::from_str::<EntryExitEvent>(&item.payload_json)
                .map(|event| self.remote.record_entry_exit(&event)),
        };
        match decoded {
            Ok(sent) => sent,
            Err(err) => {
                log::warn!("FallbackSink: dropping corrupt outbox item {}: {}", item.id, err);
                Ok(())
            }
        }
    }

    fn deliver<T, F>(&mut self, kind: OutboxKind, record: &T, send: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&mut R) -> Result<()>,
    {
        if self.backing_off() {
            return self.local.enqueue(kind, &serde_json::to_string(record)?);
        }
        let outcome = self.flush().and_then(|_| send(&mut self.remote));
        match outcome {
            Ok(()) => {
                if !self.online {
                    log::info!("FallbackSink: backend reachable again");
                    self.online = true;
                }
                self.next_attempt = None;
                Ok(())
            }
            Err(err) => {
                if self.online {
                    log::warn!("FallbackSink: backend unreachable, queueing locally: {:#}", err);
                    self.online = false;
                }
                self.next_attempt = Some(Instant::now() + self.retry_after);
                self.local.enqueue(kind, &serde_json::to_string(record)?)
            }
        }
    }
}

impl<R: CountSink> CountSink for FallbackSink<R> {
    fn record_count(&mut self, entry: &CountLogEntry) -> Result<()> {
        self.local.record_count(entry)?;
        self.deliver(OutboxKind::Count, entry, |remote| remote.record_count(entry))
    }

    fn record_entry_exit(&mut self, event: &EntryExitEvent) -> Result<()> {
        self.local.record_entry_exit(event)?;
        self.deliver(OutboxKind::EntryExit, event, |remote| {
            remote.record_entry_exit(event)
        })
    }

    fn fetch_capacity(&mut self) -> Result<Option<u32>> {
        if self.backing_off() {
            return self.local.fetch_capacity();
        }
        match self.remote.fetch_capacity() {
            Ok(capacity) => {
                self.local.cache_capacity(capacity)?;
                Ok(capacity)
            }
            Err(err) => {
                log::warn!("FallbackSink: using cached capacity: {:#}", err);
                self.local.fetch_capacity()
            }
        }
    }
}
