//! Per-collection handle and sweep scope tokens.
//!
//! A [`GcHandle`] identifies one collection. Sweep code asks it for a scope
//! token, counts kept and swept cells into the token without touching
//! shared state, and the token publishes the counts when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::tracing::{next_gc_id, GcId};

/// Counters accumulated over one collection's sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStatistics {
    /// Heap objects that survived.
    pub kept_objects: u64,
    /// Heap objects reclaimed.
    pub swept_objects: u64,
    /// Extra data records that survived.
    pub kept_extra_objects: u64,
    /// Extra data records reclaimed.
    pub swept_extra_objects: u64,
    /// Wall time spent inside sweep scopes.
    pub sweep_duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    kept_objects: AtomicU64,
    swept_objects: AtomicU64,
    kept_extra_objects: AtomicU64,
    swept_extra_objects: AtomicU64,
    sweep_nanos: AtomicU64,
}

impl Counters {
    fn add_duration(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.sweep_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

/// Handle to one garbage collection.
///
/// Cheap to clone; clones share statistics.
#[derive(Debug, Clone)]
pub struct GcHandle {
    id: GcId,
    counters: Arc<Counters>,
}

impl GcHandle {
    /// Start a handle for the next collection.
    #[must_use]
    pub fn next() -> Self {
        Self::create(next_gc_id())
    }

    /// Handle for the collection `id`.
    #[must_use]
    pub fn create(id: GcId) -> Self {
        Self {
            id,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The collection this handle belongs to.
    #[must_use]
    pub const fn id(&self) -> GcId {
        self.id
    }

    /// Epoch number of the collection.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.id.0
    }

    /// Token for sweeping heap objects.
    #[must_use]
    pub fn sweep(&self) -> GcSweepScope {
        GcSweepScope {
            counters: Arc::clone(&self.counters),
            kept: 0,
            swept: 0,
            started: Instant::now(),
        }
    }

    /// Token for sweeping extra data records.
    #[must_use]
    pub fn sweep_extra_objects(&self) -> GcSweepExtraObjectsScope {
        GcSweepExtraObjectsScope {
            counters: Arc::clone(&self.counters),
            kept: 0,
            swept: 0,
            started: Instant::now(),
        }
    }

    /// Counters published by every scope dropped so far.
    #[must_use]
    pub fn statistics(&self) -> SweepStatistics {
        let c = &self.counters;
        SweepStatistics {
            kept_objects: c.kept_objects.load(Ordering::Relaxed),
            swept_objects: c.swept_objects.load(Ordering::Relaxed),
            kept_extra_objects: c.kept_extra_objects.load(Ordering::Relaxed),
            swept_extra_objects: c.swept_extra_objects.load(Ordering::Relaxed),
            sweep_duration: Duration::from_nanos(c.sweep_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Scope token of a heap object sweep.
#[derive(Debug)]
pub struct GcSweepScope {
    counters: Arc<Counters>,
    kept: u64,
    swept: u64,
    started: Instant,
}

impl GcSweepScope {
    /// Count a surviving object.
    pub fn add_kept_object(&mut self) {
        self.kept += 1;
    }

    /// Count a reclaimed object.
    pub fn add_swept_object(&mut self) {
        self.swept += 1;
    }

    /// Objects kept so far in this scope.
    #[must_use]
    pub const fn kept(&self) -> u64 {
        self.kept
    }

    /// Objects swept so far in this scope.
    #[must_use]
    pub const fn swept(&self) -> u64 {
        self.swept
    }
}

impl Drop for GcSweepScope {
    fn drop(&mut self) {
        self.counters.kept_objects.fetch_add(self.kept, Ordering::Relaxed);
        self.counters.swept_objects.fetch_add(self.swept, Ordering::Relaxed);
        self.counters.add_duration(self.started.elapsed());
    }
}

/// Scope token of an extra data sweep.
#[derive(Debug)]
pub struct GcSweepExtraObjectsScope {
    counters: Arc<Counters>,
    kept: u64,
    swept: u64,
    started: Instant,
}

impl GcSweepExtraObjectsScope {
    /// Count a surviving record.
    pub fn add_kept_object(&mut self) {
        self.kept += 1;
    }

    /// Count a reclaimed record.
    pub fn add_swept_object(&mut self) {
        self.swept += 1;
    }

    /// Records kept so far in this scope.
    #[must_use]
    pub const fn kept(&self) -> u64 {
        self.kept
    }

    /// Records swept so far in this scope.
    #[must_use]
    pub const fn swept(&self) -> u64 {
        self.swept
    }
}

impl Drop for GcSweepExtraObjectsScope {
    fn drop(&mut self) {
        self.counters
            .kept_extra_objects
            .fetch_add(self.kept, Ordering::Relaxed);
        self.counters
            .swept_extra_objects
            .fetch_add(self.swept, Ordering::Relaxed);
        self.counters.add_duration(self.started.elapsed());
    }
}
