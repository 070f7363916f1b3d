use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Discrete coordinate of a cluster in the streaming grid.
///
/// Clusters only stream on the horizontal plane, so `y` is always 0 for
/// coordinates produced by the grid. Equality and hashing are structural.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ClusterCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ClusterCoord {
    /// The spawn cluster. Always populated, never disposed.
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate on the streaming plane (`y = 0`).
    pub fn planar(x: i32, z: i32) -> Self {
        Self { x, y: 0, z }
    }

    pub fn is_origin(&self) -> bool {
        *self == Self::ORIGIN
    }

    /// Chebyshev distance on the XZ plane.
    pub fn planar_distance(&self, other: ClusterCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// World-space center of this cluster for the given cluster size.
    pub fn world_center(&self, cluster_size: f32) -> Vec3 {
        Vec3::new(
            self.x as f32 * cluster_size,
            self.y as f32 * cluster_size,
            self.z as f32 * cluster_size,
        )
    }
}

impl fmt::Display for ClusterCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Kind of content a cluster is populated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Starfield,
    Nebula,
    Galaxy,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentKind::Starfield => "starfield",
            ContentKind::Nebula => "nebula",
            ContentKind::Galaxy => "galaxy",
        };
        f.write_str(name)
    }
}

/// Variant within a [`ContentKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSubkind {
    Open,
    Globular,
    Emission,
    Remnant,
    Spiral,
}

impl fmt::Display for ContentSubkind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentSubkind::Open => "open",
            ContentSubkind::Globular => "globular",
            ContentSubkind::Emission => "emission",
            ContentSubkind::Remnant => "remnant",
            ContentSubkind::Spiral => "spiral",
        };
        f.write_str(name)
    }
}

/// One named point layer: positions in cluster-local space plus RGB colors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeLayer {
    pub label: String,
    pub positions: Vec<Vec3>,
    pub colors: Vec<[f32; 3]>,
}

impl AttributeLayer {
    pub fn with_capacity(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            positions: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, position: Vec3, color: [f32; 3]) {
        self.positions.push(position);
        self.colors.push(color);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Attribute buffers produced by a background unit for a single cluster.
///
/// The streaming core treats this as opaque; only the matter matching the
/// producing unit's kind interprets the layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeBatch {
    pub layers: Vec<AttributeLayer>,
}

impl AttributeBatch {
    pub fn new(layers: Vec<AttributeLayer>) -> Self {
        Self { layers }
    }

    /// Total number of points across all layers.
    pub fn point_count(&self) -> usize {
        self.layers.iter().map(AttributeLayer::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// A batch is usable when it carries points and every layer has one
    /// color per position.
    pub fn is_well_formed(&self) -> bool {
        !self.is_empty()
            && self
                .layers
                .iter()
                .all(|l| l.positions.len() == l.colors.len())
    }
}
