//! # skytether - tethered balloon simulation
//!
//! CPU simulation of tens of thousands of buoyant, wind-blown balloons, each
//! tied to a ground anchor by a rope, packed into a single instance buffer
//! for one batched draw call.
//!
//! skytether keeps entity state in flat per-field arrays and runs each tick
//! as a short sequence of parallel phases, so the population can be scaled
//! from hundreds to 50,000+ without changing how you drive it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use skytether::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let mut engine = Engine::builder(EngineConfig::default())
//!         .with_wind(GustyWind::default())
//!         .with_population(5_000)
//!         .build()?;
//!
//!     for _ in 0..600 {
//!         engine.tick();
//!     }
//!     println!("{:?}", engine.metrics());
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! Every balloon lives in a slot of the [`EntityStore`]. Slots are addressed
//! by index, bounded by `max_capacity`, and reused after a balloon is
//! destroyed. Indices can change meaning across a population change; hold an
//! [`EntityHandle`] and check it with [`EntityStore::is_current`] if you need
//! to keep track of one balloon.
//!
//! ### Collaborators
//!
//! The engine does not model weather or cameras itself. It asks three
//! collaborators, all of which can be plain closures:
//!
//! ```ignore
//! Engine::builder(config)
//!     .with_wind(|p: Vec3, t: f32| Vec3::new((t * 0.3).sin() * 2.0, 0.0, 0.5))
//!     .with_environment(|altitude: f32, _temp: f32| 1.225 - altitude * 1e-4)
//!     .with_camera(|p: Vec3| p.distance(eye))
//!     .build()?;
//! ```
//!
//! ### Quality control
//!
//! The [`LodController`] lowers rope iterations and physics update rate with
//! camera distance. The [`PerformanceGovernor`] watches frame times passed
//! to [`Engine::sample_frame`] and steps quality down (or back up) when the
//! frame budget is missed for a sustained period.
//!
//! ### Rendering
//!
//! After each tick, [`Engine::instances`] holds one [`InstanceRecord`] per
//! live balloon in slot order. [`InstanceRenderer`] uploads them to a wgpu
//! vertex buffer and draws the lot with one instanced call.
//!
//! ## Feature Overview
//!
//! | Feature | Effect |
//! |---------|--------|
//! | [`Feature::Wind`] | wind force and rope wind |
//! | [`Feature::Collision`] | grid broad phase and impulse response |
//! | [`Feature::Ropes`] | rope solve |
//! | [`Feature::Lod`] | distance tiers and update throttling |
//! | [`Feature::Deformation`] | impact squash |
//! | [`Feature::Bursting`] | impact damage and bursting |

pub mod clock;
pub mod config;
pub mod engine;
pub mod entity;
pub mod environment;
pub mod error;
pub mod features;
pub mod governor;
pub mod gpu;
pub mod lod;
pub mod manager;
pub mod physics;
pub mod render;
pub mod rope;
pub mod spatial;
pub mod spawn;

pub use bytemuck;
pub use clock::SimClock;
pub use config::{
    EngineConfig, GovernorConfig, LodConfig, PhysicsConfig, RopeConfig, SpatialConfig, SpawnConfig,
};
pub use engine::{Engine, EngineBuilder, PopulationChange, TickStats};
pub use entity::{
    BalloonParams, BalloonState, Body, EntityHandle, EntityStore, Material, Vitals, WindSample,
};
pub use environment::{
    CameraDistance, ConstantWind, Environment, FixedCamera, GustyWind, StandardAtmosphere, WindField,
};
pub use error::{ConfigError, EngineError, ErrorKind, Subsystem};
pub use features::{Feature, FeatureSet};
pub use glam::{Quat, Vec2, Vec3, Vec4};
pub use governor::{ErrorStats, GovernorAction, Metrics, PerformanceGovernor};
pub use gpu::{CameraUniform, InstanceRenderer};
pub use lod::{LodController, LodState, LodTable, LodTier};
pub use manager::SimulationManager;
pub use render::{InstanceRecord, RenderBridge};
pub use rope::{Rope, RopeNode, RopeSolver};
pub use spatial::SpatialHashGrid;
pub use spawn::{SpawnContext, SpawnLayout};

/// Convenient re-exports for common usage.
///
/// # Usage
///
/// ```ignore
/// use skytether::prelude::*;
/// ```
///
/// This imports:
/// - [`Engine`] and [`EngineConfig`] - build and drive a simulation
/// - [`Feature`], [`Subsystem`], [`Metrics`] - commands and reporting
/// - the collaborator traits and their default models
/// - [`InstanceRecord`] and [`InstanceRenderer`] - the rendering boundary
/// - [`Vec3`], [`Quat`] - glam types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, PopulationChange};
    pub use crate::environment::{
        CameraDistance, ConstantWind, Environment, FixedCamera, GustyWind, StandardAtmosphere, WindField,
    };
    pub use crate::error::{EngineError, Subsystem};
    pub use crate::features::Feature;
    pub use crate::governor::{ErrorStats, Metrics};
    pub use crate::gpu::{CameraUniform, InstanceRenderer};
    pub use crate::manager::SimulationManager;
    pub use crate::render::InstanceRecord;
    pub use crate::{Quat, Vec2, Vec3, Vec4};
}
