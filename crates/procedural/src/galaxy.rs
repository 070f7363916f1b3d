//! Spiral galaxy generator.

use std::f32::consts::TAU;

use cosmos_common::{AttributeBatch, AttributeLayer, ClusterCoord, GalaxyParameters};
use cosmos_stream::{GenerationRequest, Generator};
use glam::{Quat, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::sampling;

/// Share of the budget spent on the arm, dust and halo layers.
const ARM_SHARE: f32 = 0.6;
const DUST_SHARE: f32 = 0.25;

pub struct GalaxyGenerator {
    rng: SmallRng,
}

impl GalaxyGenerator {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    pub fn with_rng(rng: SmallRng) -> Self {
        Self { rng }
    }

    /// Scatter offset on one axis: `randomness * radius * u^power` with a random sign.
    fn scatter(&mut self, params: &GalaxyParameters, radius: f32) -> f32 {
        let magnitude = self.rng.random::<f32>().powf(params.randomness_power);
        let sign = if self.rng.random::<bool>() { 1.0 } else { -1.0 };
        sign * magnitude * params.randomness * radius
    }

    fn arm_layer(
        &mut self,
        label: &str,
        count: usize,
        params: &GalaxyParameters,
        max_radius: f32,
        brightness: f32,
        tilt: Quat,
    ) -> AttributeLayer {
        let branches = params.branches.max(1);
        let mut layer = AttributeLayer::with_capacity(label, count);
        for i in 0..count {
            let radius = self.rng.random::<f32>() * max_radius;
            let branch_angle = (i as u32 % branches) as f32 / branches as f32 * TAU;
            let spin_angle = if max_radius > 0.0 {
                radius / max_radius * params.spin * TAU
            } else {
                0.0
            };
            let angle = branch_angle + spin_angle;

            let offset = Vec3::new(
                self.scatter(params, radius),
                self.scatter(params, radius),
                self.scatter(params, radius),
            );
            let position = Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius) + offset;
            let position = tilt * position;

            let t = if max_radius > 0.0 { radius / max_radius } else { 0.0 };
            let color = params.inside_color.lerp(params.outside_color, t);
            layer.push(position, sampling::shade(color, brightness));
        }
        layer
    }

    fn halo_layer(
        &mut self,
        count: usize,
        params: &GalaxyParameters,
        max_radius: f32,
    ) -> AttributeLayer {
        let mut layer = AttributeLayer::with_capacity("third_pass", count);
        for _ in 0..count {
            let position = sampling::spherical(&mut self.rng, max_radius * 0.25);
            layer.push(position, params.inside_color.rgb());
        }
        layer
    }
}

impl Default for GalaxyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for GalaxyGenerator {
    fn generate(&mut self, _coord: ClusterCoord, request: &GenerationRequest) -> AttributeBatch {
        let params = &request.parameters.galaxy;
        let max_radius = params.radius * request.cluster_size;
        let budget = params.budget as f32;
        let arms = (budget * ARM_SHARE) as usize;
        let dust = (budget * DUST_SHARE) as usize;
        let halo = (params.budget as usize).saturating_sub(arms + dust);
        // Whole-degree tilt of the disc about X, shared by both arm layers.
        let degrees = self.rng.random_range(0..360u16);
        let tilt = Quat::from_rotation_x(f32::from(degrees).to_radians());

        AttributeBatch::new(vec![
            self.arm_layer("first_pass", arms, params, max_radius, 1.0, tilt),
            self.arm_layer("second_pass", dust, params, max_radius, 0.4, tilt),
            self.halo_layer(halo, params, max_radius),
        ])
    }
}
