use std::collections::VecDeque;
use std::time::Duration;

use crate::distributor::DistributorStats;
use crate::grid::{ClusterGrid, EnqueueSummary};

/// Cumulative streaming statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    pub ticks: u64,
    pub recenters: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub selection_fallbacks: u64,
    pub results_received: u64,
    pub accepted: u64,
    pub stale_dropped: u64,
    pub duplicate_dropped: u64,
    pub malformed_dropped: u64,
    pub drained: u64,
    pub disposed: u64,
    pub active_clusters: usize,
    pub pending_clusters: usize,
    pub requested_clusters: usize,
    pub last_tick_time: Duration,
}

impl StreamStats {
    pub(crate) fn record_enqueue(&mut self, summary: EnqueueSummary) {
        self.accepted += summary.accepted as u64;
        self.stale_dropped += summary.stale as u64;
        self.duplicate_dropped += summary.duplicate as u64;
        self.malformed_dropped += summary.malformed as u64;
    }

    pub(crate) fn sync(&mut self, grid: &ClusterGrid, distributor: &DistributorStats) {
        self.dispatched = distributor.dispatched;
        self.dispatch_failures = distributor.dispatch_failures;
        self.selection_fallbacks = distributor.fallbacks;
        self.results_received = distributor.results_received;
        self.disposed = grid.disposed_total();
        self.active_clusters = grid.active_len();
        self.pending_clusters = grid.pending_len();
        self.requested_clusters = grid.requested_len();
    }
}

/// Rolling window of recent tick durations. Holds at least one sample.
#[derive(Debug)]
pub struct TickTimer {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(dt);
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.samples.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
