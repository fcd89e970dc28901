//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level terrain configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Heightfield synthesis parameters.
    pub generator: GeneratorConfig,
    /// Material layers driving tessellation strength and collision displacement.
    pub materials: MaterialConfig,
    /// Terrain tile streaming.
    pub streaming: StreamingConfig,
    /// Collision tile streaming and tessellation.
    pub collision: CollisionConfig,
    /// Generation backend selection.
    pub backend: BackendConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// One noise octave: `noise(p * scale + offset) ^ power`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoiseLayer {
    /// Frequency multiplier applied to the world position.
    pub scale: f32,
    /// Exponent shaping the `[0, 1]` noise value (plateaus above 1, bulges below).
    pub power: f32,
}

impl NoiseLayer {
    pub const fn new(scale: f32, power: f32) -> Self {
        Self { scale, power }
    }
}

impl Default for NoiseLayer {
    fn default() -> Self {
        Self::new(0.01, 1.0)
    }
}

/// Heightfield and biome synthesis parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Seed for the Perlin permutation table.
    pub seed: u32,
    /// Samples per tile side (`N`); neighbouring tiles share their edge row.
    pub tile_samples: u32,
    /// World distance between adjacent samples in meters.
    pub grid_size: f32,
    /// Offset added to every noise lookup, shifting the whole world.
    pub offset: [f32; 2],
    /// First factor of the base continent layer.
    pub base_a: NoiseLayer,
    /// Second factor of the base continent layer.
    pub base_b: NoiseLayer,
    /// Rolling hills.
    pub hills: NoiseLayer,
    /// Fine detail, also used (at double frequency) to perturb biome borders.
    pub detail: NoiseLayer,
    /// Large-scale plateaus.
    pub plateaus: NoiseLayer,
    /// First amplitude modulation layer.
    pub modulation_a: NoiseLayer,
    /// Second amplitude modulation layer.
    pub modulation_b: NoiseLayer,
    pub base_height: f32,
    pub hills_height: f32,
    pub detail_height: f32,
    pub plateau_height: f32,
    /// Relative weight of `modulation_b` against `modulation_a`.
    pub modulation_b_weight: f32,
    /// How strongly the modulation layers scale the summed height.
    pub modulation_strength: f32,
    /// Frequency of the temperature field (grass vs. dirt).
    pub temperature_scale: f32,
    pub temperature_blend: f32,
    pub temperature_random: f32,
    pub sand_blend: f32,
    pub sand_random: f32,
    pub snow_blend: f32,
    pub snow_random: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            tile_samples: 65,
            grid_size: 2.0,
            offset: [1234.5, 678.25],
            base_a: NoiseLayer::new(0.0021, 1.4),
            base_b: NoiseLayer::new(0.0043, 1.0),
            hills: NoiseLayer::new(0.011, 2.0),
            detail: NoiseLayer::new(0.047, 1.0),
            plateaus: NoiseLayer::new(0.0012, 3.0),
            modulation_a: NoiseLayer::new(0.0017, 1.0),
            modulation_b: NoiseLayer::new(0.0031, 1.0),
            base_height: 140.0,
            hills_height: 30.0,
            detail_height: 4.0,
            plateau_height: 60.0,
            modulation_b_weight: 0.5,
            modulation_strength: 0.6,
            temperature_scale: 0.0007,
            temperature_blend: 6.0,
            temperature_random: 0.3,
            sand_blend: 12.0,
            sand_random: 0.2,
            snow_blend: 8.0,
            snow_random: 0.2,
        }
    }
}

impl GeneratorConfig {
    /// Sum of the height amplitudes; heights are normalized against it for biome selection.
    pub fn max_height(&self) -> f32 {
        self.base_height + self.hills_height + self.detail_height + self.plateau_height
    }

    /// World-space edge length of one terrain tile: `(N - 1) * grid_size`.
    pub fn tile_world_size(&self) -> f32 {
        self.tile_samples.saturating_sub(1) as f32 * self.grid_size
    }
}

/// Per-material tessellation limits and displacement detail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaterialLayer {
    /// Maximum tessellation strength on up-facing surfaces.
    pub top: f32,
    /// Maximum tessellation strength on steep surfaces.
    pub sides: f32,
    /// Maximum tessellation strength on down-facing surfaces.
    pub bottom: f32,
    /// Frequency of the displacement detail for this material.
    pub displacement_scale: f32,
    /// Amplitude of the displacement detail for this material.
    pub displacement_strength: f32,
}

impl MaterialLayer {
    pub const fn new(
        top: f32,
        sides: f32,
        bottom: f32,
        displacement_scale: f32,
        displacement_strength: f32,
    ) -> Self {
        Self {
            top,
            sides,
            bottom,
            displacement_scale,
            displacement_strength,
        }
    }
}

impl Default for MaterialLayer {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0, 0.5, 0.5)
    }
}

/// Material layers, in splat channel order: grass, dirt, sand, snow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaterialConfig {
    /// Subtracted from `|normal|` before computing triplanar blend weights.
    pub blend_offset: f32,
    /// Exponent sharpening the triplanar blend weights.
    pub blend_exponent: f32,
    pub layers: [MaterialLayer; 4],
    /// Global multiplier on the per-material displacement.
    pub displacement_strength: f32,
    /// Maximum displacement along the normal in meters.
    pub displacement_distance: f32,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            blend_offset: 0.2,
            blend_exponent: 4.0,
            layers: [
                MaterialLayer::new(1.0, 0.6, 0.3, 0.5, 0.3),
                MaterialLayer::new(0.8, 0.8, 0.4, 0.35, 0.5),
                MaterialLayer::new(0.5, 0.4, 0.2, 0.8, 0.2),
                MaterialLayer::new(0.6, 0.5, 0.3, 0.25, 0.4),
            ],
            displacement_strength: 1.0,
            displacement_distance: 0.5,
        }
    }
}

/// Load priority and rate settings shared by the terrain and collision grids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Tiles within this Chebyshev radius of the focus are loaded.
    pub load_radius: u32,
    /// Extra band beyond `load_radius` before a tile becomes evictable.
    pub load_border: u32,
    /// Minimum time between two loads in milliseconds (0 = no spacing).
    pub time_between_loads_ms: u64,
    /// Maximum loads started per tick (0 = unlimited).
    pub max_loads_per_tick: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: 4,
            load_border: 1,
            time_between_loads_ms: 16,
            max_loads_per_tick: 0,
        }
    }
}

impl StreamingConfig {
    pub fn time_between_loads(&self) -> Duration {
        Duration::from_millis(self.time_between_loads_ms)
    }
}

/// How tessellated collision vertices are pushed along their normals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisplacementKind {
    /// Collider follows the interpolated surface.
    Disabled,
    /// Displacement evaluated on the CPU from the material layers.
    Cpu,
    /// Displacement computed by a compute shader.
    Gpu,
}

/// Collision tile streaming and tessellation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollisionConfig {
    /// Disable to stream render tiles only.
    pub enabled: bool,
    /// Vertices per collision tile side (2..=64).
    pub tile_vertex_count: u32,
    pub streaming: StreamingConfig,
    /// Target maximum triangle edge length after tessellation, in meters.
    pub max_edge_length: f32,
    /// Upper bound on the subdivisions of one coarse edge, 1..=64.
    pub max_edge_subdivisions: u32,
    /// Scale edge lengths by the tessellation strength of their endpoints.
    pub strength_weighted: bool,
    pub displacement: DisplacementKind,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tile_vertex_count: 17,
            streaming: StreamingConfig {
                load_radius: 1,
                load_border: 1,
                time_between_loads_ms: 0,
                max_loads_per_tick: 3,
            },
            max_edge_length: 0.75,
            max_edge_subdivisions: 16,
            strength_weighted: true,
            displacement: DisplacementKind::Cpu,
        }
    }
}

/// Which backend synthesizes terrain tiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Worker threads evaluating the synthesizer.
    Cpu,
    /// Compute shader dispatch with asynchronous readback.
    Gpu,
}

/// Generation backend settings. `kind` is fixed for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// CPU worker threads; `None` picks from the core count, `Some(0)` generates inline.
    pub worker_threads: Option<usize>,
    /// Maximum queued generation requests.
    pub max_in_flight: usize,
    /// WGSL module with the `generate_heights` and `finalize_samples` entry points.
    pub terrain_shader: Option<PathBuf>,
    /// WGSL module with the `compute_offsets` entry point.
    pub displacement_shader: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Cpu,
            worker_threads: None,
            max_in_flight: 64,
            terrain_shader: None,
            displacement_shader: None,
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Validation ---

impl Config {
    /// Reject values the terrain pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let generator = &self.generator;
        if !(2..=1025).contains(&generator.tile_samples) {
            return Err(ConfigError::invalid(
                "generator.tile_samples",
                format!("{} is outside 2..=1025", generator.tile_samples),
            ));
        }
        if !(generator.grid_size.is_finite() && generator.grid_size > 0.0) {
            return Err(ConfigError::invalid(
                "generator.grid_size",
                format!("{} must be a positive number", generator.grid_size),
            ));
        }
        let layers = [
            ("generator.base_a", generator.base_a),
            ("generator.base_b", generator.base_b),
            ("generator.hills", generator.hills),
            ("generator.detail", generator.detail),
            ("generator.plateaus", generator.plateaus),
            ("generator.modulation_a", generator.modulation_a),
            ("generator.modulation_b", generator.modulation_b),
        ];
        for (field, layer) in layers {
            if !(layer.scale.is_finite() && layer.power.is_finite()) {
                return Err(ConfigError::invalid(field, "scale and power must be finite"));
            }
        }
        if generator.modulation_b_weight <= -1.0 {
            return Err(ConfigError::invalid(
                "generator.modulation_b_weight",
                "must be greater than -1",
            ));
        }

        let collision = &self.collision;
        if !(2..=64).contains(&collision.tile_vertex_count) {
            return Err(ConfigError::invalid(
                "collision.tile_vertex_count",
                format!("{} is outside 2..=64", collision.tile_vertex_count),
            ));
        }
        if !(collision.max_edge_length.is_finite() && collision.max_edge_length > 0.0) {
            return Err(ConfigError::invalid(
                "collision.max_edge_length",
                format!("{} must be a positive number", collision.max_edge_length),
            ));
        }
        if !(1..=64).contains(&collision.max_edge_subdivisions) {
            return Err(ConfigError::invalid(
                "collision.max_edge_subdivisions",
                format!("{} is outside 1..=64", collision.max_edge_subdivisions),
            ));
        }

        if self.backend.max_in_flight == 0 {
            return Err(ConfigError::invalid("backend.max_in_flight", "must be at least 1"));
        }
        if self.backend.kind == BackendKind::Gpu && self.backend.terrain_shader.is_none() {
            return Err(ConfigError::invalid(
                "backend.terrain_shader",
                "the GPU backend needs a terrain shader module",
            ));
        }
        if collision.enabled
            && collision.displacement == DisplacementKind::Gpu
            && self.backend.displacement_shader.is_none()
        {
            return Err(ConfigError::invalid(
                "backend.displacement_shader",
                "GPU displacement needs a displacement shader module",
            ));
        }
        Ok(())
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for loam (`<config_dir>/loam`), or `./loam` if unknown.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loam")
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
