//! The simulation engine.
//!
//! [`Engine`] is the single context object that owns every piece of shared
//! state: the entity store, the spatial grid, the integrator, the ropes, the
//! LOD controller, the render bridge, the governor and the worker pool. Each
//! tick runs its phases in a fixed order, joining all parallel work before
//! the next phase starts:
//!
//! 1. density cache fill (single-threaded)
//! 2. force integration (parallel over contiguous index ranges)
//! 3. grid rebuild (parallel keys, then sort), collision resolution (index order)
//! 4. rope solve (parallel across ropes)
//! 5. LOD recompute (parallel)
//! 6. instance buffer rebuild (parallel, slot order), then release of destroyed slots
//!
//! Population changes and resets take `&mut self`, so they can only happen
//! between ticks.
//!
//! # Example
//!
//! ```ignore
//! use skytether::prelude::*;
//!
//! let mut engine = Engine::builder(EngineConfig::default())
//!     .with_wind(ConstantWind(Vec3::new(2.0, 0.0, 0.0)))
//!     .with_camera(|p: Vec3| p.distance(Vec3::new(0.0, 10.0, 80.0)))
//!     .build()?;
//!
//! engine.set_population(10_000);
//! loop {
//!     let ticks = engine.advance(frame_seconds);
//!     renderer.upload(&device, &queue, engine.instances());
//!     engine.sample_frame(frame_ms, engine.memory_mb());
//! }
//! ```

use crate::clock::SimClock;
use crate::config::EngineConfig;
use crate::entity::{BalloonParams, BalloonState, Body, EntityStore};
use crate::environment::{CameraDistance, Environment, FixedCamera, GustyWind, StandardAtmosphere, WindField};
use crate::error::{EngineError, Subsystem};
use crate::features::{Feature, FeatureSet};
use crate::governor::{ErrorStats, GovernorAction, Metrics, PerformanceGovernor};
use crate::lod::{LodController, LodTable};
use crate::manager::SimulationManager;
use crate::physics::{PhysicsIntegrator, StepContext};
use crate::render::{InstanceRecord, RenderBridge};
use crate::rope::{RopeSolver, RopeTarget};
use crate::spatial::SpatialHashGrid;
use crate::spawn::SpawnLayout;
use glam::Vec3;
use std::time::Instant;

/// Result of a population request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PopulationChange {
    pub requested: usize,
    /// Live count after the change.
    pub achieved: usize,
    pub capacity: usize,
}

impl PopulationChange {
    /// Whether the request was clamped to capacity.
    #[inline]
    pub fn was_clamped(&self) -> bool {
        self.requested > self.capacity
    }
}

/// Counters from the most recent tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickStats {
    pub integrated: usize,
    /// Entities held by LOD throttling.
    pub frozen: usize,
    pub wind_samples: usize,
    pub contacts: usize,
    pub impulses: usize,
    pub bursts_started: usize,
    pub destroyed: usize,
    pub instabilities: usize,
    pub ropes_solved: usize,
    pub rope_max_deviation: f32,
    pub physics_ms: f32,
    pub render_ms: f32,
}

/// Builder for [`Engine`].
///
/// Collaborators not supplied fall back to [`GustyWind`],
/// [`StandardAtmosphere`] and a [`FixedCamera`] at `lod.camera_position`.
pub struct EngineBuilder {
    config: EngineConfig,
    wind: Option<Box<dyn WindField>>,
    environment: Option<Box<dyn Environment>>,
    camera: Option<Box<dyn CameraDistance>>,
    features: FeatureSet,
}

impl EngineBuilder {
    /// Set the wind sampler.
    pub fn with_wind<W: WindField + 'static>(mut self, wind: W) -> Self {
        self.wind = Some(Box::new(wind));
        self
    }

    /// Set the ambient density model.
    pub fn with_environment<E: Environment + 'static>(mut self, environment: E) -> Self {
        self.environment = Some(Box::new(environment));
        self
    }

    /// Set the camera distance function used for LOD.
    pub fn with_camera<C: CameraDistance + 'static>(mut self, camera: C) -> Self {
        self.camera = Some(Box::new(camera));
        self
    }

    /// Start with a feature switched on or off.
    ///
    /// Unsupported features are ignored here; use
    /// [`Engine::set_feature`] to get them reported.
    pub fn with_feature(mut self, feature: Feature, enabled: bool) -> Self {
        let _ = self.features.set(feature, enabled);
        self
    }

    /// Override the worker pool size. 0 uses one thread per core.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    /// Override the initial population.
    pub fn with_population(mut self, population: usize) -> Self {
        self.config.initial_population = population;
        self
    }

    /// Validate the configuration, start the worker pool and spawn the
    /// initial population.
    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        config.validate()?;

        let table = LodTable::new(config.lod.tiers.clone(), config.lod.hysteresis)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("skytether-worker-{}", i))
            .build()?;

        let layout = SpawnLayout::new(
            config.spawn.clone(),
            config.max_capacity,
            config.rope.length,
            config.physics.balloon_density,
        );
        let wind: Box<dyn WindField> = match self.wind {
            Some(wind) => wind,
            None => Box::new(GustyWind::default()),
        };
        let environment: Box<dyn Environment> = match self.environment {
            Some(environment) => environment,
            None => Box::new(StandardAtmosphere::default()),
        };
        let camera: Box<dyn CameraDistance> = match self.camera {
            Some(camera) => camera,
            None => Box::new(FixedCamera {
                position: config.lod.camera_position,
            }),
        };

        let mut engine = Engine {
            store: EntityStore::new(config.max_capacity, layout),
            grid: SpatialHashGrid::new(config.spatial.cell_size),
            physics: PhysicsIntegrator::new(config.physics.clone(), config.rope.length),
            ropes: RopeSolver::new(config.rope.clone()),
            lod: LodController::new(table),
            bridge: RenderBridge::new(),
            governor: PerformanceGovernor::new(config.governor.clone(), config.lod.max_iterations),
            clock: SimClock::new(config.fixed_dt, config.max_substeps),
            features: self.features,
            wind,
            environment,
            camera,
            positions: Vec::new(),
            spawned: Vec::new(),
            population: 0,
            last_tick: TickStats::default(),
            pool,
            config,
        };

        log::info!(
            "engine started: capacity {}, {} worker threads, dt {:.4}s",
            engine.config.max_capacity,
            engine.pool.current_num_threads(),
            engine.config.fixed_dt
        );
        engine.set_population(engine.config.initial_population);
        Ok(engine)
    }
}

/// Owns the simulation and runs it one fixed tick at a time.
pub struct Engine {
    config: EngineConfig,
    pool: rayon::ThreadPool,
    store: EntityStore,
    grid: SpatialHashGrid,
    physics: PhysicsIntegrator,
    ropes: RopeSolver,
    lod: LodController,
    bridge: RenderBridge,
    governor: PerformanceGovernor,
    clock: SimClock,
    features: FeatureSet,
    wind: Box<dyn WindField>,
    environment: Box<dyn Environment>,
    camera: Box<dyn CameraDistance>,
    /// Scratch positions for grid and LOD.
    positions: Vec<Vec3>,
    /// Scratch list of slots spawned by a grow.
    spawned: Vec<usize>,
    /// Population restored by [`reset`](Engine::reset).
    population: usize,
    last_tick: TickStats,
}

impl Engine {
    /// Start building an engine from a configuration.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            wind: None,
            environment: None,
            camera: None,
            features: FeatureSet::default(),
        }
    }

    /// Build an engine with the default collaborators.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(config).build()
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one fixed-timestep tick.
    pub fn tick(&mut self) {
        let tick_start = Instant::now();
        let dt = self.config.fixed_dt;
        let sim_time = self.clock.sim_time();
        let features = self.features;
        let mut stats = TickStats::default();

        // Density cache is filled before the parallel phase only reads it.
        self.physics
            .prepare(self.store.bodies(), self.store.live_mask(), &*self.environment);

        // Forces and integration.
        let ctx = StepContext {
            dt,
            sim_time: sim_time as f32,
            features,
            chunk_size: self.config.chunk_size,
            wind: &*self.wind,
            environment: &*self.environment,
            lod: features.is_enabled(Feature::Lod).then_some(&self.lod),
        };
        let physics = &self.physics;
        let store = &mut self.store;
        let report = self.pool.install(|| physics.integrate(store.physics_view(), &ctx));
        stats.integrated = report.integrated;
        stats.frozen = report.frozen;
        stats.wind_samples = report.wind_samples;
        stats.instabilities = report.instabilities.len();

        if let Some(&index) = report.instabilities.first() {
            log::warn!(
                "{} ({} entities this tick)",
                EngineError::NumericInstability { index },
                report.instabilities.len()
            );
        }
        self.governor
            .record_errors(Subsystem::Physics, report.instabilities.len(), sim_time);
        if let Some(&index) = report.wind_faults.first() {
            log::debug!(
                "{} ({} entities this tick)",
                EngineError::SubsystemFault {
                    subsystem: Subsystem::Physics,
                    index,
                    reason: "non-finite wind sample",
                },
                report.wind_faults.len()
            );
        }
        self.governor
            .record_errors(Subsystem::Physics, report.wind_faults.len(), sim_time);

        for &index in &report.burst_complete {
            if self.store.destroy(index) {
                stats.destroyed += 1;
            }
        }

        // Broad phase, then collisions. The grid is rebuilt in full before
        // the first query.
        if features.is_enabled(Feature::Collision) {
            self.positions.clear();
            self.positions
                .extend(self.store.bodies().iter().map(|b| b.position));
            let grid = &mut self.grid;
            let positions = &self.positions;
            let live = self.store.live_mask();
            let cell_size = self.config.spatial.cell_size;
            let skipped = self.pool.install(|| grid.rebuild(positions, live, cell_size));
            if skipped > 0 {
                self.governor.record_errors(Subsystem::Spatial, skipped, sim_time);
            }

            let (bodies, vitals, params) = self.store.contact_view();
            let collisions = self
                .physics
                .resolve_collisions(bodies, vitals, params, &self.grid, features);
            stats.contacts = collisions.contacts;
            stats.impulses = collisions.impulses;
            stats.bursts_started = collisions.bursts_started.len();
            if !collisions.bursts_started.is_empty() {
                log::debug!("{} balloons started bursting", collisions.bursts_started.len());
            }
        }

        // Ropes.
        if features.is_enabled(Feature::Ropes) {
            let cap = self.governor.iteration_cap();
            let lod_enabled = features.is_enabled(Feature::Lod);
            let store = &self.store;
            let lod = &self.lod;
            let ropes = &mut self.ropes;
            let rope_report = self.pool.install(|| {
                ropes.solve(dt, features.is_enabled(Feature::Wind), |index| {
                    if !store.is_live(index) {
                        return None;
                    }
                    let body = &store.bodies()[index];
                    let params = &store.params()[index];
                    let attach = (store.vitals()[index].state < BalloonState::Bursting)
                        .then(|| attach_point(body, params));
                    let iterations = if lod_enabled {
                        lod.iterations(&store.lod_states()[index], cap)
                    } else {
                        lod.table().tier(0).solver_iterations.min(cap).max(1)
                    };
                    Some(RopeTarget {
                        attach,
                        wind: store.wind_samples()[index].velocity,
                        iterations,
                    })
                })
            });
            stats.ropes_solved = rope_report.solved;
            stats.rope_max_deviation = rope_report.max_deviation;

            if rope_report.severe > 0 {
                if let Some(&(index, deviation)) = rope_report
                    .divergent
                    .iter()
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                {
                    log::debug!(
                        "{} ({} ropes above severity threshold)",
                        EngineError::ConstraintDivergence { index, deviation },
                        rope_report.severe
                    );
                }
            }
            self.governor
                .record_errors(Subsystem::Rope, rope_report.divergent.len(), sim_time);
            if let Some(&index) = rope_report.faults.first() {
                log::warn!(
                    "{} ({} ropes this tick)",
                    EngineError::SubsystemFault {
                        subsystem: Subsystem::Rope,
                        index,
                        reason: "non-finite rope rebuilt",
                    },
                    rope_report.faults.len()
                );
            }
            self.governor
                .record_errors(Subsystem::Rope, rope_report.faults.len(), sim_time);
        }

        // Tiers for the next tick.
        if features.is_enabled(Feature::Lod) {
            self.positions.clear();
            self.positions
                .extend(self.store.bodies().iter().map(|b| b.position));
            let lod = &self.lod;
            let positions = &self.positions;
            let camera = &*self.camera;
            let (states, live) = self.store.lod_view();
            let faults = self
                .pool
                .install(|| lod.recompute(states, positions, live, camera));
            self.governor.record_errors(Subsystem::Lod, faults, sim_time);
        }
        let physics_ms = elapsed_ms(tick_start);

        // Instance buffer, then recycle slots it no longer references.
        let render_start = Instant::now();
        let bridge = &mut self.bridge;
        let store = &self.store;
        let instances = self.pool.install(|| bridge.build(store));
        self.store.release_pending();
        let render_ms = elapsed_ms(render_start);

        stats.physics_ms = physics_ms;
        stats.render_ms = render_ms;
        self.governor.record_tick(physics_ms, render_ms, instances);
        self.last_tick = stats;
        self.clock.advance_tick();

        let total_ms = physics_ms + render_ms;
        log::trace!(
            "tick {}: physics {:.3} ms, render {:.3} ms, {} instances, {} contacts, rope deviation {:.4}",
            self.clock.ticks(),
            physics_ms,
            render_ms,
            instances,
            stats.contacts,
            stats.rope_max_deviation
        );
        if total_ms > dt * 1000.0 {
            log::debug!(
                "tick took {:.2} ms for {} live balloons, over the {:.2} ms step",
                total_ms,
                self.store.live_count(),
                dt * 1000.0
            );
        }
    }

    /// Feed real elapsed time and run the fixed ticks that are due.
    ///
    /// Returns the number of ticks run.
    pub fn advance(&mut self, real_dt: f32) -> usize {
        let due = self.clock.accumulate(real_dt);
        for _ in 0..due {
            self.tick();
        }
        due
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Respawn the last requested population at its spawn configuration.
    ///
    /// Balloons destroyed since the last [`set_population`](Self::set_population)
    /// come back, and every balloon returns to `Normal`. Ropes, timing history
    /// and the clock start over. Error counters are kept.
    pub fn reset(&mut self) {
        let live = self.store.reset(self.population);
        for index in 0..live {
            self.respawn_rope(index);
        }
        self.grid = SpatialHashGrid::new(self.config.spatial.cell_size);
        self.physics.clear_cache();
        self.governor.reset();
        self.governor.apply_to(&mut self.features);
        self.clock.reset();
        self.last_tick = TickStats::default();
        let instances = self.bridge.build(&self.store);
        self.governor.set_rendered_instances(instances);
        log::info!("simulation reset with {} balloons", live);
    }

    /// Grow or shrink towards `target` live balloons, clamped to capacity.
    pub fn set_population(&mut self, requested: usize) -> PopulationChange {
        let capacity = self.store.capacity();
        if requested > capacity {
            log::warn!(
                "{}",
                EngineError::CapacityExceeded {
                    requested,
                    capacity,
                }
            );
            self.governor
                .record_error(Subsystem::Population, self.clock.sim_time());
        }
        let target = requested.min(capacity);

        // Slots destroyed since the last tick are still referenced by the
        // current instance buffer.
        if self.store.pending_count() > 0 {
            self.rebuild_instances();
        }

        let before = self.store.live_count();
        if target > before {
            let mut spawned = std::mem::take(&mut self.spawned);
            spawned.clear();
            self.store.grow_into(target - before, &mut spawned);
            for &index in &spawned {
                self.respawn_rope(index);
            }
            self.spawned = spawned;
            self.governor
                .set_rendered_instances(self.bridge.build(&self.store));
        } else if target < before {
            self.store.shrink(before - target);
            self.rebuild_instances();
        }

        let achieved = self.store.live_count();
        self.population = achieved;
        if achieved != before {
            log::debug!("population {} -> {} (requested {})", before, achieved, requested);
        }
        PopulationChange {
            requested,
            achieved,
            capacity,
        }
    }

    /// Destroy one balloon. Its slot is reused only after the next instance
    /// buffer rebuild. Returns `false` if the slot was not live.
    pub fn destroy(&mut self, index: usize) -> bool {
        self.store.destroy(index)
    }

    /// Toggle a feature by name.
    ///
    /// Unknown and unsupported features leave the feature set untouched and
    /// return [`EngineError::UnsupportedFeature`].
    pub fn set_feature_enabled(&mut self, name: &str, enabled: bool) -> Result<(), EngineError> {
        let result = name
            .parse::<Feature>()
            .and_then(|feature| self.features.set(feature, enabled));
        self.note_feature_result(&result);
        result
    }

    /// Toggle a feature.
    pub fn set_feature(&mut self, feature: Feature, enabled: bool) -> Result<(), EngineError> {
        let result = self.features.set(feature, enabled);
        self.note_feature_result(&result);
        result
    }

    fn note_feature_result(&mut self, result: &Result<(), EngineError>) {
        if let Err(e) = result {
            log::warn!("{}", e);
            self.governor
                .record_error(Subsystem::Features, self.clock.sim_time());
        }
    }

    /// Feed one frame's total time and memory to the governor and apply any
    /// quality change to the feature set.
    pub fn sample_frame(&mut self, frame_time_ms: f32, memory_mb: f32) -> GovernorAction {
        let action = self.governor.sample(frame_time_ms, memory_mb);
        if action != GovernorAction::None {
            self.governor.apply_to(&mut self.features);
        }
        action
    }

    /// Place a live balloon directly. Its rope is rebuilt.
    pub fn set_body(&mut self, index: usize, body: Body) -> Result<(), EngineError> {
        if !self.store.is_live(index) {
            return Err(EngineError::SubsystemFault {
                subsystem: Subsystem::Population,
                index,
                reason: "slot is not live",
            });
        }
        if !body.is_finite() {
            return Err(EngineError::NumericInstability { index });
        }
        self.store.set_body(index, body);
        self.respawn_rope(index);
        Ok(())
    }

    /// Replace the physical constants of a live balloon.
    pub fn set_params(&mut self, index: usize, params: BalloonParams) -> Result<(), EngineError> {
        if !self.store.is_live(index) {
            return Err(EngineError::SubsystemFault {
                subsystem: Subsystem::Population,
                index,
                reason: "slot is not live",
            });
        }
        let valid = params.radius.is_finite()
            && params.radius > 0.0
            && params.mass.is_finite()
            && params.mass > 0.0
            && params.anchor.is_finite();
        if !valid {
            return Err(EngineError::SubsystemFault {
                subsystem: Subsystem::Population,
                index,
                reason: "radius and mass must be positive and finite",
            });
        }
        self.store.set_params(index, params);
        self.respawn_rope(index);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn metrics(&self) -> Metrics {
        Metrics {
            rendered_instances: self.bridge.count(),
            ..self.governor.metrics()
        }
    }

    pub fn error_stats(&self, subsystem: Subsystem) -> ErrorStats {
        self.governor.error_stats(subsystem)
    }

    /// Instance records from the last rebuild, in slot order.
    #[inline]
    pub fn instances(&self) -> &[InstanceRecord] {
        self.bridge.records()
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.bridge.count()
    }

    #[inline]
    pub fn render_bridge(&self) -> &RenderBridge {
        &self.bridge
    }

    #[inline]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[inline]
    pub fn ropes(&self) -> &RopeSolver {
        &self.ropes
    }

    /// Grid from the last collision phase.
    #[inline]
    pub fn grid(&self) -> &SpatialHashGrid {
        &self.grid
    }

    #[inline]
    pub fn lod(&self) -> &LodController {
        &self.lod
    }

    #[inline]
    pub fn governor(&self) -> &PerformanceGovernor {
        &self.governor
    }

    #[inline]
    pub fn features(&self) -> FeatureSet {
        self.features
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Clock access for pause and time scale.
    #[inline]
    pub fn clock_mut(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    #[inline]
    pub fn sim_time(&self) -> f64 {
        self.clock.sim_time()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.store.live_count()
    }

    #[inline]
    pub fn last_tick(&self) -> &TickStats {
        &self.last_tick
    }

    /// Approximate heap usage of entity, rope, grid and instance data.
    pub fn memory_bytes(&self) -> usize {
        self.store.memory_bytes()
            + self.ropes.memory_bytes()
            + self.grid.len() * std::mem::size_of::<(glam::IVec3, u32)>()
            + self.bridge.records().len() * InstanceRecord::SIZE
            + self.positions.capacity() * std::mem::size_of::<Vec3>()
    }

    #[inline]
    pub fn memory_mb(&self) -> f32 {
        self.memory_bytes() as f32 / (1024.0 * 1024.0)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn rebuild_instances(&mut self) {
        let instances = self.bridge.build(&self.store);
        self.store.release_pending();
        self.governor.set_rendered_instances(instances);
    }

    fn respawn_rope(&mut self, index: usize) {
        let body = self.store.bodies()[index];
        let params = self.store.params()[index];
        self.ropes
            .respawn(index, params.anchor, attach_point(&body, &params));
    }
}

/// Point on the balloon surface facing its anchor.
#[inline]
fn attach_point(body: &Body, params: &BalloonParams) -> Vec3 {
    let toward_anchor = (params.anchor - body.position).normalize_or(Vec3::NEG_Y);
    body.position + toward_anchor * params.radius
}

#[inline]
fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

impl SimulationManager for Engine {
    fn name(&self) -> &str {
        "balloons"
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        feature.is_supported()
    }

    fn try_change_count(&mut self, target: usize) -> PopulationChange {
        self.set_population(target)
    }

    fn performance_metrics(&self) -> Metrics {
        self.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ConstantWind;

    fn config(capacity: usize, population: usize) -> EngineConfig {
        EngineConfig {
            max_capacity: capacity,
            initial_population: population,
            worker_threads: 2,
            chunk_size: 64,
            ..EngineConfig::default()
        }
    }

    fn calm_engine(capacity: usize, population: usize) -> Engine {
        Engine::builder(config(capacity, population))
            .with_wind(ConstantWind(Vec3::ZERO))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_spawns_initial_population() {
        let engine = calm_engine(100, 40);
        assert_eq!(engine.live_count(), 40);
        assert_eq!(engine.instance_count(), 40);
        assert_eq!(engine.ropes().ropes().len(), 40);
        assert_eq!(engine.ticks(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut cfg = config(10, 5);
        cfg.fixed_dt = 0.0;
        let err = Engine::new(cfg).err().unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_set_population_clamps_and_counts() {
        let mut engine = calm_engine(50, 10);
        let change = engine.set_population(80);
        assert_eq!(change.achieved, 50);
        assert_eq!(change.requested, 80);
        assert!(change.was_clamped());
        assert_eq!(engine.error_stats(Subsystem::Population).count, 1);

        let change = engine.set_population(20);
        assert_eq!(change.achieved, 20);
        assert!(!change.was_clamped());
        assert_eq!(engine.instance_count(), 20);
        assert_eq!(engine.store().free_count(), 30);
    }

    #[test]
    fn test_tick_advances_clock_and_rebuilds_instances() {
        let mut engine = calm_engine(64, 64);
        for _ in 0..5 {
            engine.tick();
        }
        assert_eq!(engine.ticks(), 5);
        assert!((engine.sim_time() - 5.0 * engine.config().fixed_dt as f64).abs() < 1e-9);
        assert_eq!(engine.instance_count(), 64);
        assert_eq!(engine.last_tick().integrated + engine.last_tick().frozen, 64);
    }

    #[test]
    fn test_advance_runs_due_ticks() {
        let mut engine = calm_engine(8, 8);
        let dt = engine.config().fixed_dt;
        assert_eq!(engine.advance(dt * 2.5), 2);
        assert_eq!(engine.advance(dt * 0.6), 1);
        assert_eq!(engine.ticks(), 3);
    }

    #[test]
    fn test_destroyed_slot_not_rendered_or_reused_early() {
        let mut engine = calm_engine(4, 4);
        assert!(engine.destroy(1));
        // Still in the instance buffer built before the destroy.
        assert_eq!(engine.instance_count(), 4);
        assert_eq!(engine.store().free_count(), 0);

        engine.tick();
        assert_eq!(engine.instance_count(), 3);
        assert!(!engine.render_bridge().slots().contains(&1));
        assert_eq!(engine.store().free_count(), 1);

        let change = engine.set_population(4);
        assert_eq!(change.achieved, 4);
        assert!(engine.store().is_live(1));
    }

    #[test]
    fn test_unsupported_feature_is_reported() {
        let mut engine = calm_engine(4, 4);
        let before = engine.features();
        let err = engine.set_feature_enabled("fluid", true).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFeature(_)));
        assert!(engine.set_feature_enabled("hovercraft", true).is_err());
        assert_eq!(engine.features(), before);
        assert_eq!(engine.error_stats(Subsystem::Features).count, 2);

        engine.set_feature_enabled("Wind", false).unwrap();
        assert!(!engine.features().is_enabled(Feature::Wind));
    }

    #[test]
    fn test_reset_restores_spawn_state() {
        let mut engine = Engine::builder(config(32, 32))
            .with_wind(ConstantWind(Vec3::new(4.0, 0.0, 0.0)))
            .build()
            .unwrap();
        let spawn: Vec<Vec3> = engine.store().bodies().iter().map(|b| b.position).collect();
        for _ in 0..30 {
            engine.tick();
        }
        engine.destroy(3);
        engine.reset();

        assert_eq!(engine.live_count(), 32);
        assert_eq!(engine.instance_count(), 32);
        assert_eq!(engine.ticks(), 0);
        let now: Vec<Vec3> = engine.store().bodies().iter().map(|b| b.position).collect();
        assert_eq!(now, spawn);
        assert!(engine
            .store()
            .vitals()
            .iter()
            .all(|v| v.state == BalloonState::Normal));
    }

    #[test]
    fn test_set_body_rejects_non_finite() {
        let mut engine = calm_engine(2, 2);
        let body = Body {
            position: Vec3::new(f32::NAN, 0.0, 0.0),
            ..Body::default()
        };
        assert!(matches!(
            engine.set_body(0, body),
            Err(EngineError::NumericInstability { index: 0 })
        ));
        assert!(engine.set_body(5, Body::default()).is_err());
    }

    #[test]
    fn test_governor_downgrade_suppresses_features() {
        let mut cfg = config(4, 4);
        cfg.governor.sustain_samples = 2;
        let mut engine = Engine::builder(cfg).build().unwrap();
        for _ in 0..6 {
            engine.sample_frame(100.0, 1.0);
        }
        assert_eq!(engine.metrics().quality_level, 3);
        assert!(!engine.features().is_enabled(Feature::Bursting));
        assert!(engine.features().is_user_enabled(Feature::Bursting));
    }

    #[test]
    fn test_as_simulation_manager() {
        let engine = calm_engine(16, 4);
        let mut managers: Vec<Box<dyn SimulationManager>> = vec![Box::new(engine)];
        let manager = &mut managers[0];
        assert_eq!(manager.name(), "balloons");
        assert!(manager.supports_feature(Feature::Ropes));
        assert!(!manager.supports_feature(Feature::Swarm));
        assert_eq!(manager.try_change_count(12).achieved, 12);
        assert_eq!(manager.performance_metrics().rendered_instances, 12);
    }
}
