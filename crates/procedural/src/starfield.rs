//! Starfield generators: loose open clusters and dense globular balls.

use cosmos_common::{AttributeBatch, AttributeLayer, ClusterCoord, StarfieldParameters};
use cosmos_stream::{GenerationRequest, Generator};
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::sampling;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarfieldShape {
    /// Uniform inside the cluster cube.
    Open,
    /// Uniform spherical coordinates, dense toward the center.
    Globular,
}

/// Bright layer followed by three fainter passes.
const LAYERS: [&str; 4] = ["bright", "first_pass", "second_pass", "third_pass"];

pub struct StarfieldGenerator {
    shape: StarfieldShape,
    rng: SmallRng,
}

impl StarfieldGenerator {
    pub fn new(shape: StarfieldShape) -> Self {
        Self::with_rng(shape, SmallRng::from_os_rng())
    }

    pub fn with_rng(shape: StarfieldShape, rng: SmallRng) -> Self {
        Self { shape, rng }
    }

    pub fn shape(&self) -> StarfieldShape {
        self.shape
    }

    fn star_color(&mut self, params: &StarfieldParameters) -> [f32; 3] {
        if self.rng.random::<f32>() < params.white_ratio {
            params.white.rgb()
        } else {
            sampling::pick_color(&mut self.rng, &params.palette, params.white)
        }
    }

    fn star_position(&mut self, cluster_size: f32) -> Vec3 {
        match self.shape {
            StarfieldShape::Open => sampling::in_cube(&mut self.rng, cluster_size),
            StarfieldShape::Globular => sampling::spherical(&mut self.rng, cluster_size / 2.0),
        }
    }
}

impl Generator for StarfieldGenerator {
    fn generate(&mut self, _coord: ClusterCoord, request: &GenerationRequest) -> AttributeBatch {
        let params = &request.parameters.starfield;
        let mut layers = Vec::with_capacity(LAYERS.len());

        for (i, label) in LAYERS.iter().enumerate() {
            let share = if i == 0 { params.bright } else { params.pass };
            let count = sampling::layer_count(&mut self.rng, params.budget, share);
            let mut layer = AttributeLayer::with_capacity(*label, count);
            for _ in 0..count {
                let position = self.star_position(request.cluster_size);
                let color = self.star_color(params);
                layer.push(position, color);
            }
            layers.push(layer);
        }

        AttributeBatch::new(layers)
    }
}
