//! Nebula generators: emission clouds and supernova remnant shells.

use cosmos_common::{AttributeBatch, AttributeLayer, ClusterCoord, HexColor, NebulaParameters};
use cosmos_stream::{GenerationRequest, Generator};
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::sampling;

const NEUTRAL: HexColor = HexColor([1.0, 1.0, 1.0]);

/// Remnant shell radius as a fraction of the cluster size.
const REMNANT_RADIUS: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NebulaVariant {
    Emission,
    Remnant,
}

pub struct NebulaGenerator {
    variant: NebulaVariant,
    rng: SmallRng,
}

impl NebulaGenerator {
    pub fn new(variant: NebulaVariant) -> Self {
        Self::with_rng(variant, SmallRng::from_os_rng())
    }

    pub fn with_rng(variant: NebulaVariant, rng: SmallRng) -> Self {
        Self { variant, rng }
    }

    pub fn variant(&self) -> NebulaVariant {
        self.variant
    }

    fn emission(&mut self, params: &NebulaParameters, cluster_size: f32) -> Vec<AttributeLayer> {
        let clouds = sampling::in_range(&mut self.rng, params.clouds).round().max(1.0) as usize;
        let spread = cluster_size * 0.3;
        let centers: Vec<(Vec3, [f32; 3])> = (0..clouds)
            .map(|_| {
                let distance = spread * self.rng.random::<f32>();
                let center = sampling::unit_vector(&mut self.rng) * distance;
                let color = sampling::pick_color(&mut self.rng, &params.emission_palette, NEUTRAL);
                (center, color)
            })
            .collect();
        let cloud_radius = params.cloud_radius * cluster_size;

        let gas_count = params.budget as usize;
        let mut gas = AttributeLayer::with_capacity("gas", gas_count);
        for _ in 0..gas_count {
            let (center, color) = centers[self.rng.random_range(0..centers.len())];
            // Squared falloff packs gas toward each cloud's center.
            let falloff = self.rng.random::<f32>().powi(2);
            let offset = sampling::unit_vector(&mut self.rng) * cloud_radius * falloff;
            let brightness = self.rng.random_range(0.6..=1.0);
            gas.push(center + offset, sampling::shade(color, brightness));
        }

        let core_count = gas_count / 10;
        let mut cores = AttributeLayer::with_capacity("cores", core_count);
        for _ in 0..core_count {
            let (center, color) = centers[self.rng.random_range(0..centers.len())];
            let distance = cloud_radius * 0.2 * self.rng.random::<f32>();
            let offset = sampling::unit_vector(&mut self.rng) * distance;
            cores.push(center + offset, sampling::shade(color, 1.6));
        }

        vec![gas, cores]
    }

    fn remnant(&mut self, params: &NebulaParameters, cluster_size: f32) -> Vec<AttributeLayer> {
        let radius = cluster_size * REMNANT_RADIUS;
        let thickness = params.shell_thickness.clamp(0.0, 1.0);

        let shell_count = params.budget as usize;
        let mut shell = AttributeLayer::with_capacity("shell", shell_count);
        for _ in 0..shell_count {
            let direction = sampling::unit_vector(&mut self.rng);
            let r = radius * (1.0 - thickness * self.rng.random::<f32>());
            // Latitude bands pick the palette entry so filaments read as layered.
            let band = ((direction.y + 1.0) * 0.5 * params.remnant_palette.len() as f32) as usize;
            let color = params
                .remnant_palette
                .get(band.min(params.remnant_palette.len().saturating_sub(1)))
                .copied()
                .unwrap_or(NEUTRAL)
                .rgb();
            shell.push(direction * r, color);
        }

        let ejecta_count = shell_count / 20;
        let mut ejecta = AttributeLayer::with_capacity("ejecta", ejecta_count);
        for _ in 0..ejecta_count {
            let position = sampling::unit_vector(&mut self.rng) * radius * self.rng.random::<f32>();
            let color = sampling::pick_color(&mut self.rng, &params.remnant_palette, NEUTRAL);
            ejecta.push(position, sampling::shade(color, 0.5));
        }

        vec![shell, ejecta]
    }
}

impl Generator for NebulaGenerator {
    fn generate(&mut self, _coord: ClusterCoord, request: &GenerationRequest) -> AttributeBatch {
        let params = &request.parameters.nebula;
        let layers = match self.variant {
            NebulaVariant::Emission => self.emission(params, request.cluster_size),
            NebulaVariant::Remnant => self.remnant(params, request.cluster_size),
        };
        AttributeBatch::new(layers)
    }
}
