//! Worker distribution: which background unit serves a population request,
//! and routing of its results back into the cluster grid.

use std::sync::Arc;

use cosmos_common::{ClusterCoord, GenerationParameters, StreamConfig, TOTAL_WEIGHT, WorkerSpec};
use crossbeam_channel::Receiver;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::StreamError;
use crate::grid::{ClusterGrid, EnqueueSummary};
use crate::worker::{GenerationRequest, GenerationResult, Generator, WorkerUnit};

/// Discrete distribution over pool entries, stored as prefix sums.
#[derive(Debug, Clone)]
pub struct WeightedTable {
    cumulative: Vec<u32>,
}

impl WeightedTable {
    pub fn new(weights: impl IntoIterator<Item = u32>) -> Self {
        let cumulative = weights
            .into_iter()
            .scan(0u32, |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();
        Self { cumulative }
    }

    pub fn from_specs(specs: &[WorkerSpec]) -> Self {
        Self::new(specs.iter().map(|s| s.weight))
    }

    pub fn total(&self) -> u32 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// First entry whose cumulative weight exceeds `draw`.
    ///
    /// `None` when the draw falls at or past the total, which the caller must
    /// resolve to a fallback entry.
    pub fn select(&self, draw: f64) -> Option<usize> {
        let index = self.cumulative.partition_point(|&c| f64::from(c) <= draw);
        (index < self.cumulative.len()).then_some(index)
    }
}

/// Result of picking a unit for a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The origin cluster, always routed to the origin unit.
    Origin(usize),
    Weighted(usize),
    /// The draw selected nothing; the origin unit was used instead.
    Fallback(usize),
}

impl Selection {
    pub fn unit(&self) -> usize {
        match *self {
            Selection::Origin(u) | Selection::Weighted(u) | Selection::Fallback(u) => u,
        }
    }
}

/// Counters kept by the distributor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributorStats {
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub fallbacks: u64,
    pub results_received: u64,
    pub stale_epoch_results: u64,
}

/// Pool of background units plus the weighted selection policy.
pub struct WorkerDistributor {
    units: Vec<WorkerUnit>,
    table: WeightedTable,
    origin_unit: usize,
    rng: SmallRng,
    results: Receiver<GenerationResult>,
    parameters: Arc<GenerationParameters>,
    cluster_size: f32,
    stats: DistributorStats,
}

impl WorkerDistributor {
    /// Spawn one unit per configured worker, asking `provide` for each
    /// unit's generator.
    pub fn spawn<P>(config: &StreamConfig, provide: P) -> Result<Self, StreamError>
    where
        P: FnMut(&WorkerSpec) -> Option<Box<dyn Generator>>,
    {
        Self::spawn_with_rng(config, provide, SmallRng::from_os_rng())
    }

    pub fn spawn_with_rng<P>(
        config: &StreamConfig,
        mut provide: P,
        rng: SmallRng,
    ) -> Result<Self, StreamError>
    where
        P: FnMut(&WorkerSpec) -> Option<Box<dyn Generator>>,
    {
        config.validate()?;
        let origin_unit = config.origin_worker_index().ok_or(
            cosmos_common::ConfigError::UnknownOriginWorker {
                kind: config.origin_worker.kind,
                subkind: config.origin_worker.subkind,
            },
        )?;

        let (result_sender, results) = crossbeam_channel::unbounded();
        let mut units = Vec::with_capacity(config.workers.len());
        for (index, spec) in config.workers.iter().enumerate() {
            let generator = provide(spec).ok_or(StreamError::MissingGenerator {
                kind: spec.kind,
                subkind: spec.subkind,
            })?;
            units.push(WorkerUnit::spawn(
                index,
                *spec,
                generator,
                result_sender.clone(),
            )?);
        }

        tracing::info!(
            units = units.len(),
            origin = %config.origin_worker,
            "worker distributor ready"
        );

        Ok(Self {
            units,
            table: WeightedTable::from_specs(&config.workers),
            origin_unit,
            rng,
            results,
            parameters: Arc::new(config.generation.clone()),
            cluster_size: config.cluster_size,
            stats: DistributorStats::default(),
        })
    }

    pub fn units(&self) -> impl Iterator<Item = &WorkerSpec> {
        self.units.iter().map(WorkerUnit::spec)
    }

    pub fn origin_unit(&self) -> usize {
        self.origin_unit
    }

    pub fn stats(&self) -> &DistributorStats {
        &self.stats
    }

    /// Pick the unit that should populate `coord`.
    pub fn select_worker_for(&mut self, coord: ClusterCoord) -> Selection {
        if coord.is_origin() {
            return Selection::Origin(self.origin_unit);
        }
        let draw = self.rng.random::<f64>() * f64::from(TOTAL_WEIGHT);
        self.resolve(draw)
    }

    fn resolve(&mut self, draw: f64) -> Selection {
        match self.table.select(draw) {
            Some(unit) => Selection::Weighted(unit),
            None => {
                self.stats.fallbacks += 1;
                tracing::warn!(draw, "weighted selection fell through, using origin unit");
                Selection::Fallback(self.origin_unit)
            }
        }
    }

    /// Send a generation request for `coord` to its selected unit.
    ///
    /// Returns as soon as the request is queued on the unit's channel.
    pub fn dispatch(
        &mut self,
        coord: ClusterCoord,
        epoch: u64,
        universe: u32,
    ) -> Result<Selection, StreamError> {
        let selection = self.select_worker_for(coord);
        let request = GenerationRequest {
            epoch,
            universe,
            cluster_size: self.cluster_size,
            clusters: vec![coord],
            parameters: Arc::clone(&self.parameters),
        };
        match self.units[selection.unit()].post(request) {
            Ok(()) => {
                self.stats.dispatched += 1;
                tracing::trace!(%coord, unit = selection.unit(), "dispatched generation request");
                Ok(selection)
            }
            Err(e) => {
                self.stats.dispatch_failures += 1;
                Err(e)
            }
        }
    }

    /// Forward every result that has already arrived into the grid.
    ///
    /// Never blocks. Results issued in an older epoch are dropped whole.
    pub fn receive_into(&mut self, grid: &mut ClusterGrid, epoch: u64) -> EnqueueSummary {
        let mut summary = EnqueueSummary::default();
        while let Ok(result) = self.results.try_recv() {
            self.stats.results_received += 1;
            if result.epoch != epoch {
                self.stats.stale_epoch_results += 1;
                tracing::trace!(
                    unit = result.unit,
                    result_epoch = result.epoch,
                    epoch,
                    "dropping result from previous epoch"
                );
                continue;
            }
            summary += grid.enqueue_payload(result.batches, result.spec.kind, result.spec.subkind);
        }
        summary
    }
}
