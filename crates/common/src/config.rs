//! Streaming configuration.
//!
//! Loaded from YAML or JSON; every field has a default so partial files are
//! accepted. [`StreamConfig::validate`] must pass before the streaming core
//! is built from a config.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ContentKind, ContentSubkind};

/// Worker selection weights are percentages.
pub const TOTAL_WEIGHT: u32 = 100;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("cluster size must be positive and finite, got {0}")]
    InvalidClusterSize(f32),
    #[error("neighborhood radius must not be negative, got {0}")]
    NegativeRadius(i32),
    #[error("worker pool is empty")]
    EmptyPool,
    #[error("worker weights must sum to 100, got {total}")]
    InvalidWeights { total: u64 },
    #[error("origin worker {kind}/{subkind} is not in the pool")]
    UnknownOriginWorker {
        kind: ContentKind,
        subkind: ContentSubkind,
    },
    #[error("invalid color {0:?}, expected #rrggbb")]
    InvalidColor(String),
    #[error("invalid range for {name}: min {min}, max {max}")]
    InvalidRange { name: &'static str, min: f32, max: f32 },
    #[error("invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },
}

/// Names a worker by its content kind and subkind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerRef {
    pub kind: ContentKind,
    pub subkind: ContentSubkind,
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subkind)
    }
}

/// A background unit in the pool and its selection weight (percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub kind: ContentKind,
    pub subkind: ContentSubkind,
    pub weight: u32,
}

impl WorkerSpec {
    pub fn new(kind: ContentKind, subkind: ContentSubkind, weight: u32) -> Self {
        Self {
            kind,
            subkind,
            weight,
        }
    }

    pub fn worker_ref(&self) -> WorkerRef {
        WorkerRef {
            kind: self.kind,
            subkind: self.subkind,
        }
    }
}

/// RGB color parsed from a `#rrggbb` string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub [f32; 3]);

impl HexColor {
    pub fn rgb(&self) -> [f32; 3] {
        self.0
    }

    pub fn lerp(&self, other: HexColor, t: f32) -> [f32; 3] {
        let [r0, g0, b0] = self.0;
        let [r1, g1, b1] = other.0;
        [r0 + (r1 - r0) * t, g0 + (g1 - g0) * t, b0 + (b1 - b0) * t]
    }
}

impl TryFrom<String> for HexColor {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = value
            .strip_prefix('#')
            .filter(|d| d.len() == 6 && d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| ConfigError::InvalidColor(value.clone()))?;
        let channel = |i: usize| -> Result<f32, ConfigError> {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|_| ConfigError::InvalidColor(value.clone()))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<&str> for HexColor {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        let [r, g, b] = color.0.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

/// Inclusive `[min, max]` ratio range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioRange {
    pub min: f32,
    pub max: f32,
}

impl RatioRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let finite = self.min.is_finite() && self.max.is_finite();
        if !finite || self.min < 0.0 || self.min > self.max {
            return Err(ConfigError::InvalidRange {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarfieldParameters {
    /// Reference point count; each layer takes a random share of it.
    pub budget: u32,
    pub bright: RatioRange,
    pub pass: RatioRange,
    /// Probability that a star is near-white rather than a palette color.
    pub white_ratio: f32,
    pub white: HexColor,
    pub palette: Vec<HexColor>,
}

impl Default for StarfieldParameters {
    fn default() -> Self {
        Self {
            budget: 50_000,
            bright: RatioRange::new(0.05, 0.1),
            pass: RatioRange::new(0.2, 0.3),
            white_ratio: 0.6,
            white: HexColor([0.933, 0.937, 1.0]),
            palette: vec![
                HexColor([0.667, 0.749, 1.0]),
                HexColor([1.0, 0.8, 0.435]),
                HexColor([1.0, 0.824, 0.631]),
                HexColor([0.608, 0.69, 1.0]),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NebulaParameters {
    pub budget: u32,
    /// Number of gas clouds in an emission nebula.
    pub clouds: RatioRange,
    /// Cloud radius as a fraction of the cluster size.
    pub cloud_radius: f32,
    /// Shell thickness of a remnant as a fraction of its radius.
    pub shell_thickness: f32,
    pub emission_palette: Vec<HexColor>,
    pub remnant_palette: Vec<HexColor>,
}

impl Default for NebulaParameters {
    fn default() -> Self {
        Self {
            budget: 30_000,
            clouds: RatioRange::new(3.0, 7.0),
            cloud_radius: 0.15,
            shell_thickness: 0.12,
            emission_palette: vec![
                HexColor([0.98, 0.32, 0.42]),
                HexColor([0.93, 0.45, 0.71]),
                HexColor([0.55, 0.25, 0.85]),
            ],
            remnant_palette: vec![
                HexColor([0.3, 0.75, 0.95]),
                HexColor([0.45, 0.95, 0.7]),
                HexColor([0.98, 0.6, 0.25]),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaxyParameters {
    pub budget: u32,
    pub branches: u32,
    pub spin: f32,
    /// Galaxy radius as a fraction of the cluster size.
    pub radius: f32,
    pub randomness: f32,
    pub randomness_power: f32,
    pub inside_color: HexColor,
    pub outside_color: HexColor,
}

impl Default for GalaxyParameters {
    fn default() -> Self {
        Self {
            budget: 60_000,
            branches: 4,
            spin: 1.0,
            radius: 0.4,
            randomness: 0.3,
            randomness_power: 3.0,
            inside_color: HexColor([1.0, 0.38, 0.19]),
            outside_color: HexColor([0.11, 0.22, 0.52]),
        }
    }
}

/// Parameters forwarded verbatim to background units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    pub starfield: StarfieldParameters,
    pub nebula: NebulaParameters,
    pub galaxy: GalaxyParameters,
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}

fn unit_interval(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}

/// Configuration consumed by the streaming core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Edge length of a cluster in world units.
    pub cluster_size: f32,
    /// Delay between scheduling a drain and building its matter.
    pub drain_delay_ms: u64,
    /// Radius (in clusters) of the square neighborhood kept populated.
    pub neighborhood_radius: i32,
    pub workers: Vec<WorkerSpec>,
    /// Unit that always serves the origin and absorbs selection fallbacks.
    pub origin_worker: WorkerRef,
    pub generation: GenerationParameters,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cluster_size: 2000.0,
            drain_delay_ms: 50,
            neighborhood_radius: 1,
            workers: vec![
                WorkerSpec::new(ContentKind::Starfield, ContentSubkind::Open, 50),
                WorkerSpec::new(ContentKind::Starfield, ContentSubkind::Globular, 25),
                WorkerSpec::new(ContentKind::Nebula, ContentSubkind::Emission, 15),
                WorkerSpec::new(ContentKind::Nebula, ContentSubkind::Remnant, 10),
            ],
            origin_worker: WorkerRef {
                kind: ContentKind::Starfield,
                subkind: ContentSubkind::Open,
            },
            generation: GenerationParameters::default(),
        }
    }
}

impl StreamConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    /// Index of the origin worker in `workers`, if present.
    pub fn origin_worker_index(&self) -> Option<usize> {
        self.workers
            .iter()
            .position(|w| w.worker_ref() == self.origin_worker)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cluster_size.is_finite() && self.cluster_size > 0.0) {
            return Err(ConfigError::InvalidClusterSize(self.cluster_size));
        }
        if self.neighborhood_radius < 0 {
            return Err(ConfigError::NegativeRadius(self.neighborhood_radius));
        }
        if self.workers.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        let total: u64 = self.workers.iter().map(|w| u64::from(w.weight)).sum();
        if total != u64::from(TOTAL_WEIGHT) {
            return Err(ConfigError::InvalidWeights { total });
        }
        if self.origin_worker_index().is_none() {
            return Err(ConfigError::UnknownOriginWorker {
                kind: self.origin_worker.kind,
                subkind: self.origin_worker.subkind,
            });
        }
        let starfield = &self.generation.starfield;
        starfield.bright.validate("starfield.bright")?;
        starfield.pass.validate("starfield.pass")?;
        unit_interval("starfield.white_ratio", starfield.white_ratio)?;

        let nebula = &self.generation.nebula;
        nebula.clouds.validate("nebula.clouds")?;
        non_negative("nebula.cloud_radius", nebula.cloud_radius)?;
        unit_interval("nebula.shell_thickness", nebula.shell_thickness)?;

        let galaxy = &self.generation.galaxy;
        non_negative("galaxy.radius", galaxy.radius)?;
        non_negative("galaxy.randomness", galaxy.randomness)?;
        non_negative("galaxy.randomness_power", galaxy.randomness_power)?;
        if !galaxy.spin.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "galaxy.spin",
                value: galaxy.spin,
            });
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a `.yaml`/`.yml` or `.json` config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&data)?,
            "json" => serde_json::from_str(&data)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }
}
