//! Engine configuration.
//!
//! Every value has a default tuned for a desktop-class machine running a few
//! thousand balloons at 60 ticks per second. Configurations can be written as
//! partial JSON documents; missing fields fall back to their defaults.
//!
//! # Example
//!
//! ```ignore
//! let config = EngineConfig::from_json_str(r#"{
//!     "max_capacity": 20000,
//!     "physics": { "damping": 0.98 },
//!     "lod": { "hysteresis": 2.0 }
//! }"#)?;
//! ```

use crate::error::ConfigError;
use crate::lod::LodTier;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard upper bound on the number of entity slots.
    pub max_capacity: usize,
    /// Population spawned when the engine is built.
    pub initial_population: usize,
    /// Fixed simulation timestep in seconds.
    pub fixed_dt: f32,
    /// Maximum fixed ticks run per [`Engine::advance`](crate::Engine::advance) call.
    pub max_substeps: u32,
    /// Worker pool size. 0 lets rayon pick one thread per core.
    pub worker_threads: usize,
    /// Entities per contiguous work range in the parallel integration phase.
    pub chunk_size: usize,
    pub physics: PhysicsConfig,
    pub rope: RopeConfig,
    pub spatial: SpatialConfig,
    pub lod: LodConfig,
    pub governor: GovernorConfig,
    pub spawn: SpawnConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_capacity: 50_000,
            initial_population: 1_000,
            fixed_dt: 1.0 / 60.0,
            max_substeps: 4,
            worker_threads: 0,
            chunk_size: 1024,
            physics: PhysicsConfig::default(),
            rope: RopeConfig::default(),
            spatial: SpatialConfig::default(),
            lod: LodConfig::default(),
            governor: GovernorConfig::default(),
            spawn: SpawnConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every value is within its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(msg.to_string()))
            }
        }

        check(self.max_capacity > 0, "max_capacity must be > 0")?;
        check(
            self.fixed_dt.is_finite() && self.fixed_dt > 0.0,
            "fixed_dt must be a positive number",
        )?;
        check(self.max_substeps > 0, "max_substeps must be > 0")?;
        check(self.chunk_size > 0, "chunk_size must be > 0")?;

        let p = &self.physics;
        check(
            p.damping > 0.0 && p.damping <= 1.0,
            "physics.damping must be in (0, 1]",
        )?;
        check(
            p.wind_sample_fraction > 0.0 && p.wind_sample_fraction <= 1.0,
            "physics.wind_sample_fraction must be in (0, 1]",
        )?;
        check(p.balloon_density > 0.0, "physics.balloon_density must be > 0")?;
        check(
            p.density_altitude_step > 0.0 && p.density_temperature_step > 0.0,
            "physics density quantization steps must be > 0",
        )?;

        let r = &self.rope;
        check(r.nodes_per_rope >= 2, "rope.nodes_per_rope must be >= 2")?;
        check(r.length > 0.0, "rope.length must be > 0")?;
        check(r.tolerance > 0.0, "rope.tolerance must be > 0")?;

        check(self.spatial.cell_size > 0.0, "spatial.cell_size must be > 0")?;

        check(!self.lod.tiers.is_empty(), "lod.tiers must not be empty")?;
        check(self.lod.max_iterations > 0, "lod.max_iterations must be > 0")?;
        check(self.lod.hysteresis >= 0.0, "lod.hysteresis must be >= 0")?;

        let g = &self.governor;
        check(
            g.low_water_ms < g.high_water_ms,
            "governor.low_water_ms must be below governor.high_water_ms",
        )?;
        check(g.window > 0, "governor.window must be > 0")?;

        let s = &self.spawn;
        check(
            s.radius_min > 0.0 && s.radius_min <= s.radius_max,
            "spawn radius range must be positive and ordered",
        )?;
        check(s.anchor_spacing > 0.0, "spawn.anchor_spacing must be > 0")?;
        Ok(())
    }
}

/// Force model and integration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Velocity scale applied after every integration step (< 1).
    pub damping: f32,
    /// Gravitational acceleration magnitude.
    pub gravity: f32,
    /// Effective density of a balloon (gas plus envelope), kg/m³. Also sets its mass.
    pub balloon_density: f32,
    /// Sea-level air temperature in °C.
    pub sea_level_temperature: f32,
    /// Temperature drop per metre of altitude.
    pub lapse_rate: f32,
    /// Altitude quantization step for the ambient density cache, metres.
    pub density_altitude_step: f32,
    /// Temperature quantization step for the ambient density cache, °C.
    pub density_temperature_step: f32,
    /// Fraction of integrated steps on which an entity takes a fresh wind
    /// sample. Each entity refreshes at least once every `ceil(1 / fraction)`
    /// of its own integrated steps.
    pub wind_sample_fraction: f32,
    /// Drag coupling between wind and balloon cross-section.
    pub wind_coupling: f32,
    /// Torque applied by wind per unit force, drives the sway.
    pub sway_strength: f32,
    /// Angular velocity scale per tick.
    pub angular_damping: f32,
    /// Collision passes per tick.
    pub collision_iterations: u32,
    /// Fraction of penetration removed per collision pass.
    pub penetration_correction: f32,
    /// Keep balloons within rope reach of their anchor.
    pub tether_limit: bool,
    /// Impulse above which a balloon starts deforming.
    pub deform_impulse: f32,
    /// Health lost per unit impulse above `deform_impulse`.
    pub damage_per_impulse: f32,
    /// Seconds a bursting balloon stays visible before it is destroyed.
    pub burst_duration: f32,
    /// Squash decay rate per second.
    pub squash_recovery: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            damping: 0.995,
            gravity: 9.81,
            balloon_density: 0.9,
            sea_level_temperature: 15.0,
            lapse_rate: 0.0065,
            density_altitude_step: 0.5,
            density_temperature_step: 0.25,
            wind_sample_fraction: 0.25,
            wind_coupling: 0.6,
            sway_strength: 2.0,
            angular_damping: 0.95,
            collision_iterations: 1,
            penetration_correction: 0.8,
            tether_limit: true,
            deform_impulse: 0.15,
            damage_per_impulse: 1.5,
            burst_duration: 0.25,
            squash_recovery: 4.0,
        }
    }
}

/// Tether settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RopeConfig {
    /// Nodes per rope including the pinned root and the balloon-attached tip.
    pub nodes_per_rope: usize,
    /// Total rest length of a rope.
    pub length: f32,
    /// Verlet velocity retention per tick.
    pub damping: f32,
    /// Downward acceleration on rope nodes.
    pub gravity: f32,
    /// Fraction of the owning balloon's wind sample applied to its rope.
    pub wind_influence: f32,
    /// Accepted segment deviation from rest length after relaxation.
    pub tolerance: f32,
    /// Deviations above `tolerance * severity_ratio` are logged.
    pub severity_ratio: f32,
}

impl Default for RopeConfig {
    fn default() -> Self {
        Self {
            nodes_per_rope: 8,
            length: 4.0,
            damping: 0.98,
            gravity: 9.81,
            wind_influence: 0.3,
            tolerance: 0.02,
            severity_ratio: 5.0,
        }
    }
}

/// Broad-phase grid settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Edge length of a grid cell. Should be at least the largest balloon diameter.
    pub cell_size: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { cell_size: 1.0 }
    }
}

/// Level-of-detail table and camera settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Tiers ordered by increasing distance threshold.
    pub tiers: Vec<LodTier>,
    /// Distance margin an entity must cross beyond a threshold to change tier.
    pub hysteresis: f32,
    /// Global cap on rope solver iterations at full quality.
    pub max_iterations: u32,
    /// Camera position used when no camera collaborator is supplied.
    pub camera_position: Vec3,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            tiers: LodTier::default_table(),
            hysteresis: 2.0,
            max_iterations: 16,
            camera_position: Vec3::new(0.0, 10.0, 60.0),
        }
    }
}

/// Performance governor thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Frame time above which quality is reduced, in milliseconds.
    pub high_water_ms: f32,
    /// Frame time below which quality may be restored, in milliseconds.
    pub low_water_ms: f32,
    /// Consecutive samples beyond a mark before quality changes.
    pub sustain_samples: u32,
    /// Number of samples in the rolling metrics window.
    pub window: usize,
    /// Allow quality to be restored once load drops.
    pub allow_restore: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            high_water_ms: 18.0,
            low_water_ms: 12.0,
            sustain_samples: 30,
            window: 60,
            allow_restore: true,
        }
    }
}

/// Spawn layout and per-balloon parameter ranges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Seed for per-slot jitter. The same slot always spawns the same balloon.
    pub seed: u64,
    /// Distance between neighbouring anchors on the ground grid.
    pub anchor_spacing: f32,
    /// Ground height of the anchors.
    pub ground_height: f32,
    /// Fraction of the rope length the balloon starts above its anchor.
    pub initial_extension: f32,
    /// Horizontal jitter applied to the spawn position.
    pub jitter: f32,
    pub radius_min: f32,
    pub radius_max: f32,
    pub buoyancy_coefficient: f32,
    pub elasticity: f32,
    pub health: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub transparency: f32,
    /// Base colours picked per slot.
    pub palette: Vec<[f32; 3]>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_ba11,
            anchor_spacing: 1.6,
            ground_height: 0.0,
            initial_extension: 0.9,
            jitter: 0.1,
            radius_min: 0.35,
            radius_max: 0.5,
            buoyancy_coefficient: 1.0,
            elasticity: 0.8,
            health: 1.0,
            metallic: 0.1,
            roughness: 0.35,
            transparency: 0.05,
            palette: vec![
                [0.90, 0.15, 0.20],
                [0.95, 0.75, 0.10],
                [0.15, 0.55, 0.90],
                [0.25, 0.80, 0.35],
                [0.70, 0.30, 0.85],
                [0.95, 0.45, 0.70],
            ],
        }
    }
}
