//! Random sampling helpers shared by the generators.

use std::f32::consts::{PI, TAU};

use cosmos_common::{HexColor, RatioRange};
use glam::Vec3;
use rand::Rng;

/// Uniform value in the inclusive range. Non-finite bounds yield zero.
pub(crate) fn in_range(rng: &mut impl Rng, range: RatioRange) -> f32 {
    if !(range.min.is_finite() && range.max.is_finite()) {
        return 0.0;
    }
    if range.max <= range.min {
        return range.min;
    }
    rng.random_range(range.min..=range.max)
}

/// Point count for a layer taking a random share of `budget`.
pub(crate) fn layer_count(rng: &mut impl Rng, budget: u32, share: RatioRange) -> usize {
    (budget as f32 * in_range(rng, share)).floor().max(0.0) as usize
}

/// Uniform direction on the unit sphere.
pub(crate) fn unit_vector(rng: &mut impl Rng) -> Vec3 {
    let z: f32 = rng.random_range(-1.0..=1.0);
    let theta: f32 = rng.random_range(0.0..TAU);
    let planar = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(planar * theta.cos(), planar * theta.sin(), z)
}

/// Point from spherical coordinates with uniformly drawn angles and radius,
/// which concentrates points toward the center.
pub(crate) fn spherical(rng: &mut impl Rng, max_radius: f32) -> Vec3 {
    let phi: f32 = rng.random_range(0.0..PI);
    let theta: f32 = rng.random_range(0.0..TAU);
    let radius = rng.random::<f32>() * max_radius;
    Vec3::new(
        radius * phi.sin() * theta.sin(),
        radius * phi.cos(),
        radius * phi.sin() * theta.cos(),
    )
}

/// Uniform point in an axis-aligned cube of edge `size` centered on zero.
pub(crate) fn in_cube(rng: &mut impl Rng, size: f32) -> Vec3 {
    let half = size / 2.0;
    Vec3::new(
        rng.random_range(-half..=half),
        rng.random_range(-half..=half),
        rng.random_range(-half..=half),
    )
}

pub(crate) fn pick_color(rng: &mut impl Rng, palette: &[HexColor], fallback: HexColor) -> [f32; 3] {
    if palette.is_empty() {
        return fallback.rgb();
    }
    palette[rng.random_range(0..palette.len())].rgb()
}

/// Scale every channel by `factor`, clamped to `[0, 1]`.
pub(crate) fn shade(color: [f32; 3], factor: f32) -> [f32; 3] {
    color.map(|c| (c * factor).clamp(0.0, 1.0))
}
