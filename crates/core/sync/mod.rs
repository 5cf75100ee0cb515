//! Index synchronizer: keeps the spatial index in step with the change feed.
//!
//! Delivery is at-least-once and may be out of order, so every event is
//! applied through [`SpatialIndex::apply_versioned`]. Stale, duplicate and
//! malformed events are logged and counted, never reported back to the
//! producer.

pub mod event;

pub use event::{EventKind, MutationEvent};

use crate::error::{ProximityError, Result};
use crate::index::{ApplyOutcome, SpatialIndex};
use crossbeam_channel::{Receiver, Sender};
use proxima_types::entity::EntityId;
use proxima_types::stats::SyncStats;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Per-worker queue depth between the router and a worker.
const WORKER_QUEUE: usize = 1024;

#[derive(Debug, Default)]
struct SyncCounters {
    applied: AtomicU64,
    stale: AtomicU64,
    duplicate: AtomicU64,
    not_found: AtomicU64,
    rejected: AtomicU64,
}

impl SyncCounters {
    fn record(&self, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Applied => &self.applied,
            ApplyOutcome::Stale => &self.stale,
            ApplyOutcome::Duplicate => &self.duplicate,
            ApplyOutcome::NotFound => &self.not_found,
            ApplyOutcome::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SyncStats {
        SyncStats {
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Applies change-feed events to a shared [`SpatialIndex`].
///
/// Cheap to clone; clones share the index and the counters.
#[derive(Debug, Clone)]
pub struct IndexSynchronizer {
    index: Arc<SpatialIndex>,
    workers: usize,
    counters: Arc<SyncCounters>,
}

impl IndexSynchronizer {
    pub fn new(index: Arc<SpatialIndex>, workers: usize) -> Self {
        Self {
            index,
            workers: workers.max(1),
            counters: Arc::new(SyncCounters::default()),
        }
    }

    /// Applies one event.
    pub fn apply(&self, event: &MutationEvent) -> ApplyOutcome {
        let outcome = match event
            .to_change()
            .and_then(|change| self.index.apply_versioned(change))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!(
                    "rejected {:?} event for {} (version {}): {}",
                    event.event_type,
                    event.entity_id,
                    event.version,
                    e
                );
                ApplyOutcome::Rejected
            }
        };
        match outcome {
            ApplyOutcome::Stale | ApplyOutcome::Duplicate => log::debug!(
                "ignored {:?} {:?} event for {} (version {})",
                outcome,
                event.event_type,
                event.entity_id,
                event.version
            ),
            ApplyOutcome::NotFound => log::debug!(
                "delete of unindexed entity {} (version {})",
                event.entity_id,
                event.version
            ),
            ApplyOutcome::Applied | ApplyOutcome::Rejected => {}
        }
        self.counters.record(outcome);
        outcome
    }

    /// Parses and applies one JSON line of the feed.
    pub fn apply_json_line(&self, line: &str) -> ApplyOutcome {
        match MutationEvent::from_json(line) {
            Ok(event) => self.apply(&event),
            Err(e) => {
                log::warn!("rejected malformed feed line: {}", e);
                self.counters.record(ApplyOutcome::Rejected);
                ApplyOutcome::Rejected
            }
        }
    }

    /// Applies events in order and returns the tally for this batch alone.
    pub fn apply_batch<I>(&self, events: I) -> SyncStats
    where
        I: IntoIterator<Item = MutationEvent>,
    {
        let mut batch = SyncStats::default();
        for event in events {
            match self.apply(&event) {
                ApplyOutcome::Applied => batch.applied += 1,
                ApplyOutcome::Stale => batch.stale += 1,
                ApplyOutcome::Duplicate => batch.duplicate += 1,
                ApplyOutcome::NotFound => batch.not_found += 1,
                ApplyOutcome::Rejected => batch.rejected += 1,
            }
        }
        batch
    }

    /// Worker that owns events for `entity_id`.
    fn shard_of(&self, entity_id: &EntityId) -> usize {
        let mut hasher = FxHasher::default();
        entity_id.hash(&mut hasher);
        (hasher.finish() % self.workers as u64) as usize
    }

    /// Consumes `receiver` on background threads until it disconnects.
    ///
    /// A router thread hashes each event's entity id to one of the worker
    /// threads, so events for one entity are applied in arrival order while
    /// different entities proceed in parallel.
    pub fn run(&self, receiver: Receiver<MutationEvent>) -> Result<SyncHandle> {
        let mut senders: Vec<Sender<MutationEvent>> = Vec::with_capacity(self.workers);
        let mut workers = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let (tx, rx) = crossbeam_channel::bounded::<MutationEvent>(WORKER_QUEUE);
            let sync = self.clone();
            let handle = thread::Builder::new()
                .name(format!("proxima-sync-{i}"))
                .spawn(move || {
                    for event in rx.iter() {
                        sync.apply(&event);
                    }
                })
                .map_err(|e| ProximityError::Internal(format!("failed to spawn sync worker: {e}")))?;
            senders.push(tx);
            workers.push(handle);
        }

        let sync = self.clone();
        let router = thread::Builder::new()
            .name("proxima-sync-router".into())
            .spawn(move || {
                for event in receiver.iter() {
                    let shard = sync.shard_of(&event.entity_id);
                    if senders[shard].send(event).is_err() {
                        log::warn!("sync worker {} is gone; stopping router", shard);
                        break;
                    }
                }
                // Dropping the senders lets the workers drain and exit.
            })
            .map_err(|e| ProximityError::Internal(format!("failed to spawn sync router: {e}")))?;

        log::info!("index synchronizer running with {} workers", self.workers);
        Ok(SyncHandle { router, workers })
    }

    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }
}

/// Background threads started by [`IndexSynchronizer::run`].
#[derive(Debug)]
pub struct SyncHandle {
    router: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    /// Waits until the feed has disconnected and every queued event has
    /// been applied.
    pub fn join(self) -> Result<()> {
        let mut panicked = 0usize;
        if self.router.join().is_err() {
            panicked += 1;
        }
        for worker in self.workers {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(ProximityError::Internal(format!(
                "{panicked} synchronizer thread(s) panicked"
            )));
        }
        Ok(())
    }
}
