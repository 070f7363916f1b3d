//! Background compute units.
//!
//! Each unit is a dedicated thread owning one [`Generator`]. It receives
//! [`GenerationRequest`]s on its own channel, processes them one at a time
//! and posts a single [`GenerationResult`] per request to a result channel
//! shared by the whole pool. Units never touch grid state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use cosmos_common::{AttributeBatch, ClusterCoord, GenerationParameters, WorkerSpec};
use crossbeam_channel::{Receiver, Sender};

use crate::error::StreamError;

/// Produces attribute buffers for a cluster off the control loop.
pub trait Generator: Send {
    fn generate(&mut self, coord: ClusterCoord, request: &GenerationRequest) -> AttributeBatch;
}

impl<F> Generator for F
where
    F: FnMut(ClusterCoord, &GenerationRequest) -> AttributeBatch + Send,
{
    fn generate(&mut self, coord: ClusterCoord, request: &GenerationRequest) -> AttributeBatch {
        self(coord, request)
    }
}

/// Inbound message to a unit.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Stream epoch the request was issued in; results from older epochs are stale.
    pub epoch: u64,
    pub universe: u32,
    pub cluster_size: f32,
    pub clusters: Vec<ClusterCoord>,
    pub parameters: Arc<GenerationParameters>,
}

/// Outbound message from a unit: one batch per requested coordinate,
/// tagged with the unit's fixed kind and subkind.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub epoch: u64,
    pub unit: usize,
    pub spec: WorkerSpec,
    pub batches: Vec<(ClusterCoord, AttributeBatch)>,
}

/// Handle to a running background unit.
pub struct WorkerUnit {
    index: usize,
    spec: WorkerSpec,
    requests: Option<Sender<GenerationRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerUnit {
    /// Spawn the unit's thread. Failure to spawn means the host cannot run
    /// background work at all.
    pub fn spawn(
        index: usize,
        spec: WorkerSpec,
        mut generator: Box<dyn Generator>,
        results: Sender<GenerationResult>,
    ) -> Result<Self, StreamError> {
        let (request_sender, request_receiver) = crossbeam_channel::unbounded();

        let handle = std::thread::Builder::new()
            .name(format!("cosmos-{}-{}", spec.kind, spec.subkind))
            .spawn(move || run_unit(index, spec, generator.as_mut(), request_receiver, results))
            .map_err(|source| StreamError::WorkerSpawn {
                kind: spec.kind,
                subkind: spec.subkind,
                source,
            })?;

        tracing::debug!(
            unit = index,
            kind = %spec.kind,
            subkind = %spec.subkind,
            "background unit started"
        );

        Ok(Self {
            index,
            spec,
            requests: Some(request_sender),
            handle: Some(handle),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Post a request without waiting for it to be processed.
    pub fn post(&self, request: GenerationRequest) -> Result<(), StreamError> {
        let unit = self.index;
        self.requests
            .as_ref()
            .ok_or(StreamError::UnitDisconnected { unit })?
            .send(request)
            .map_err(|_| StreamError::UnitDisconnected { unit })
    }
}

impl Drop for WorkerUnit {
    fn drop(&mut self) {
        // Closing the request channel ends the unit's receive loop.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(unit = self.index, "background unit panicked");
            }
        }
    }
}

fn run_unit(
    index: usize,
    spec: WorkerSpec,
    generator: &mut dyn Generator,
    requests: Receiver<GenerationRequest>,
    results: Sender<GenerationResult>,
) {
    while let Ok(request) = requests.recv() {
        let started = Instant::now();
        let batches = request
            .clusters
            .iter()
            .map(|coord| (*coord, generator.generate(*coord, &request)))
            .collect();

        tracing::trace!(
            unit = index,
            clusters = request.clusters.len(),
            elapsed = ?started.elapsed(),
            "generation request complete"
        );

        let result = GenerationResult {
            epoch: request.epoch,
            unit: index,
            spec,
            batches,
        };
        if results.send(result).is_err() {
            break;
        }
    }
    tracing::debug!(unit = index, "background unit stopped");
}
