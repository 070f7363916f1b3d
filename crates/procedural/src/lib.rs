//! Procedural content for the cosmos streaming engine.
//!
//! Background generators that turn a cluster request into attribute
//! buffers, and a headless [`Scene`] that plays the matter factory role.
//!
//! # Invariants
//! - Generators emit positions local to the cluster center; only
//!   [`PointCloudMatter`] moves them into world space.
//! - Every layer in a generated batch has matching position and color counts.

mod galaxy;
mod nebula;
mod sampling;
mod scene;
mod starfield;

use cosmos_common::{ContentKind, ContentSubkind, WorkerSpec};
use cosmos_stream::Generator;

pub use galaxy::GalaxyGenerator;
pub use nebula::{NebulaGenerator, NebulaVariant};
pub use scene::{Bounds, ObjectId, PointCloudMatter, Scene, SceneFactory, SceneObject, SharedScene};
pub use starfield::{StarfieldGenerator, StarfieldShape};

/// Generator for a worker spec, or `None` when the kind and subkind do not
/// belong together.
pub fn generator_for(spec: &WorkerSpec) -> Option<Box<dyn Generator>> {
    let generator: Box<dyn Generator> = match (spec.kind, spec.subkind) {
        (ContentKind::Starfield, ContentSubkind::Open) => {
            Box::new(StarfieldGenerator::new(StarfieldShape::Open))
        }
        (ContentKind::Starfield, ContentSubkind::Globular) => {
            Box::new(StarfieldGenerator::new(StarfieldShape::Globular))
        }
        (ContentKind::Nebula, ContentSubkind::Emission) => {
            Box::new(NebulaGenerator::new(NebulaVariant::Emission))
        }
        (ContentKind::Nebula, ContentSubkind::Remnant) => {
            Box::new(NebulaGenerator::new(NebulaVariant::Remnant))
        }
        (ContentKind::Galaxy, ContentSubkind::Spiral) => Box::new(GalaxyGenerator::new()),
        _ => return None,
    };
    Some(generator)
}

pub fn crate_info() -> &'static str {
    "cosmos-procedural v0.1.0"
}
