//! Shared types and configuration for the cosmos streaming engine.
//!
//! # Invariants
//! - Cluster coordinates produced by the grid always have `y == 0`.
//! - A validated [`StreamConfig`] has worker weights summing to 100 and an
//!   origin worker present in the pool.

pub mod config;
pub mod types;

pub use config::{
    ConfigError, GalaxyParameters, GenerationParameters, HexColor, NebulaParameters,
    RatioRange, StarfieldParameters, StreamConfig, TOTAL_WEIGHT, WorkerRef, WorkerSpec,
};
pub use types::{AttributeBatch, AttributeLayer, ClusterCoord, ContentKind, ContentSubkind};

pub fn crate_info() -> &'static str {
    "cosmos-common v0.1.0"
}
