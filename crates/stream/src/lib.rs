//! Streaming: cluster grid, background generation, frame-budgeted draining.
//!
//! # Invariants
//! - A cluster is in at most one of queued, pending and active.
//! - The control loop never blocks on background work.
//! - At most one pending payload is turned into matter per drain delay.
//! - The origin cluster is never disposed while streaming.

mod budget;
mod distributor;
mod drain;
mod error;
mod grid;
mod matter;
mod worker;

pub use budget::{StreamStats, TickTimer};
pub use distributor::{DistributorStats, Selection, WeightedTable, WorkerDistributor};
pub use drain::{DrainLoop, StreamContext, TickAction, TickReport};
pub use error::StreamError;
pub use grid::{ClusterGrid, ClusterState, ClusterStatus, EnqueueSummary, PendingCluster};
pub use matter::{Matter, MatterFactory};
pub use worker::{GenerationRequest, GenerationResult, Generator, WorkerUnit};

pub fn crate_info() -> &'static str {
    "cosmos-stream v0.1.0"
}
