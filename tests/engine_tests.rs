//! End-to-end behaviour of the engine through its public API.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use skytether::physics::{buoyant_force, resolve_contact};
use skytether::{
    BalloonParams, BalloonState, Body, ConstantWind, Engine, EngineConfig, Feature, LodTable, LodTier,
    Rope, RopeConfig, Subsystem,
};

fn config(capacity: usize, population: usize) -> EngineConfig {
    EngineConfig {
        max_capacity: capacity,
        initial_population: population,
        worker_threads: 2,
        chunk_size: 128,
        ..EngineConfig::default()
    }
}

fn all_finite(engine: &Engine) -> bool {
    let store = engine.store();
    store
        .live_indices()
        .all(|i| store.bodies()[i].position.is_finite() && store.bodies()[i].velocity.is_finite())
}

// ============================================================================
// State stays finite
// ============================================================================

#[test]
fn test_state_stays_finite_for_random_populations() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut engine = Engine::builder(config(600, 0))
        .with_wind(|p: Vec3, t: f32| Vec3::new((p.z * 0.3 + t).sin() * 25.0, 3.0, (p.x * 0.2).cos() * 25.0))
        .build()
        .unwrap();

    for _ in 0..6 {
        let n = rng.gen_range(0..=600);
        engine.set_population(n);
        for _ in 0..40 {
            engine.tick();
        }
        assert!(all_finite(&engine));
        assert!(engine.live_count() <= 600);
    }
}

#[test]
fn test_broken_wind_samples_are_contained() {
    // Half the field returns NaN; those entities see no wind instead.
    let mut engine = Engine::builder(config(200, 200))
        .with_wind(|p: Vec3, _t: f32| if p.x > 0.0 { Vec3::splat(f32::NAN) } else { Vec3::X })
        .build()
        .unwrap();
    for _ in 0..60 {
        engine.tick();
    }
    assert!(all_finite(&engine));
    let stats = engine.error_stats(Subsystem::Physics);
    assert!(stats.count > 0);
    assert!(stats.last_error_time_seconds.is_some());
}

// ============================================================================
// Buoyancy
// ============================================================================

#[test]
fn test_buoyancy_lifts_when_air_is_denser() {
    let mut engine = Engine::builder(config(64, 64))
        .with_wind(ConstantWind(Vec3::ZERO))
        .with_environment(|_altitude: f32, _temperature: f32| 1.2)
        .build()
        .unwrap();
    engine.tick();
    let store = engine.store();
    assert!(store.live_indices().all(|i| store.bodies()[i].acceleration.y > 0.0));
}

#[test]
fn test_buoyancy_vanishes_at_equal_density() {
    let params = BalloonParams {
        radius: 0.45,
        mass: 0.3,
        ..BalloonParams::default()
    };
    let force = buoyant_force(&params, 0.9, 0.9, 9.81);
    assert!(force.length() < 1e-6);
    let force = buoyant_force(&params, 1.2, 0.9, 9.81);
    assert!(force.y > 0.0);
}

// ============================================================================
// Ropes
// ============================================================================

#[test]
fn test_rope_relaxes_within_tolerance_between_static_anchors() {
    let config = RopeConfig::default();
    let mut rope = Rope::new(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), config.nodes_per_rope, config.length);
    let dt = 1.0 / 60.0;
    for _ in 0..600 {
        rope.integrate(Vec3::NEG_Y * config.gravity, dt, config.damping);
        rope.relax(16);
    }
    assert!(
        rope.max_deviation() < config.tolerance,
        "deviation {}",
        rope.max_deviation()
    );
    assert_eq!(rope.root(), Vec3::ZERO);
    assert_eq!(rope.tip(), Vec3::new(3.0, 0.0, 0.0));
}

#[test]
fn test_fresh_ropes_record_no_rope_errors() {
    let mut engine = Engine::builder(config(96, 64))
        .with_wind(ConstantWind(Vec3::ZERO))
        .with_environment(|_altitude: f32, _temperature: f32| 0.9)
        .with_camera(|_p: Vec3| 0.0)
        .build()
        .unwrap();
    let tolerance = engine.config().rope.tolerance;
    let store = engine.store();
    for i in store.live_indices() {
        assert!(engine.ropes().rope(i).unwrap().max_deviation() < tolerance);
    }

    engine.tick();
    assert!(engine.last_tick().rope_max_deviation < tolerance);
    assert_eq!(engine.error_stats(Subsystem::Rope).count, 0);

    // Growth and reset lay out new ropes the same way.
    engine.set_population(96);
    engine.tick();
    engine.reset();
    engine.tick();
    assert_eq!(engine.error_stats(Subsystem::Rope).count, 0);
}

#[test]
fn test_rope_tips_follow_balloons() {
    let mut engine = Engine::builder(config(16, 16))
        .with_wind(ConstantWind(Vec3::new(3.0, 0.0, 0.0)))
        .build()
        .unwrap();
    for _ in 0..30 {
        engine.tick();
    }
    let store = engine.store();
    for i in store.live_indices() {
        let rope = engine.ropes().rope(i).unwrap();
        let body = &store.bodies()[i];
        let radius = store.params()[i].radius;
        assert!((rope.tip().distance(body.position) - radius).abs() < 1e-3);
        assert_eq!(rope.root(), store.params()[i].anchor);
    }
}

// ============================================================================
// LOD
// ============================================================================

#[test]
fn test_lod_iterations_never_increase_with_distance() {
    let table = LodTable::new(LodTier::default_table(), 2.0).unwrap();
    let mut rng = SmallRng::seed_from_u64(3);
    for _ in 0..1_000 {
        let d1: f32 = rng.gen_range(0.0..900.0);
        let d2: f32 = d1 + rng.gen_range(0.0..300.0);
        assert!(table.tier_for(d1).solver_iterations >= table.tier_for(d2).solver_iterations);
    }
}

#[test]
fn test_throttled_balloons_still_refresh_wind() {
    // Every balloon sits in the farthest tier, integrated once every few ticks.
    let config = config(8, 8);
    let stride = (1.0 / config.physics.wind_sample_fraction).ceil() as usize;
    let far = *LodTier::default_table().last().unwrap();
    let mut engine = Engine::builder(config)
        .with_wind(ConstantWind(Vec3::new(3.0, 0.0, 0.0)))
        .with_camera(|_p: Vec3| 1_000.0)
        .with_feature(Feature::Bursting, false)
        .build()
        .unwrap();

    for _ in 0..stride * far.update_interval_ticks as usize + 1 {
        engine.tick();
    }

    let store = engine.store();
    let last = engine.lod().table().tiers().len() - 1;
    let starved: Vec<usize> = store
        .live_indices()
        .filter(|&i| store.wind_samples()[i].velocity != Vec3::new(3.0, 0.0, 0.0))
        .collect();
    assert!(store.live_indices().all(|i| store.lod_states()[i].tier == last));
    assert!(starved.is_empty(), "no wind sample for {:?}", starved);
}

// ============================================================================
// Render bridge
// ============================================================================

#[test]
fn test_destroyed_balloons_never_rendered_until_reused() {
    let mut engine = Engine::builder(config(32, 32))
        .with_wind(ConstantWind(Vec3::ZERO))
        .build()
        .unwrap();
    engine.destroy(5);
    engine.destroy(17);
    for _ in 0..10 {
        engine.tick();
        let slots = engine.render_bridge().slots();
        assert!(!slots.contains(&5));
        assert!(!slots.contains(&17));
        assert_eq!(engine.instance_count(), 30);
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }
    engine.set_population(32);
    assert!(engine.render_bridge().slots().contains(&5));
    assert!(engine.render_bridge().slots().contains(&17));
    assert_eq!(engine.store().vitals()[5].state, BalloonState::Normal);
}

// ============================================================================
// Population
// ============================================================================

#[test]
fn test_population_never_exceeds_capacity() {
    let mut engine = Engine::builder(config(300, 0))
        .with_wind(ConstantWind(Vec3::ZERO))
        .build()
        .unwrap();
    let mut rng = SmallRng::seed_from_u64(99);
    for _ in 0..25 {
        let n = rng.gen_range(0..700);
        let change = engine.set_population(n);
        assert_eq!(change.requested, n);
        assert_eq!(change.achieved, n.min(300));
        assert_eq!(engine.live_count(), change.achieved);
        assert_eq!(engine.instance_count(), change.achieved);
        engine.tick();
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_neutral_balloons_stay_at_rest() {
    let mut engine = Engine::builder(config(1_000, 1_000))
        .with_wind(ConstantWind(Vec3::ZERO))
        .with_environment(|_altitude: f32, _temperature: f32| 0.9)
        .build()
        .unwrap();
    assert_eq!(engine.config().physics.balloon_density, 0.9);
    let start: Vec<Vec3> = engine.store().bodies().iter().map(|b| b.position).collect();

    for _ in 0..600 {
        engine.tick();
    }

    let store = engine.store();
    let total: f32 = store
        .live_indices()
        .map(|i| store.bodies()[i].position.distance(start[i]))
        .sum();
    let mean = total / store.live_count() as f32;
    assert_eq!(store.live_count(), 1_000);
    assert!(mean < 1e-3, "mean displacement {}", mean);
}

#[test]
fn test_overlapping_pair_separates() {
    let mut a = Body {
        position: Vec3::new(-0.3, 3.0, 0.0),
        velocity: Vec3::new(1.0, 0.0, 0.0),
        ..Body::default()
    };
    let mut b = Body {
        position: Vec3::new(0.3, 3.0, 0.0),
        velocity: Vec3::new(-1.0, 0.0, 0.0),
        ..Body::default()
    };
    let params = BalloonParams {
        radius: 0.45,
        mass: 0.3,
        elasticity: 0.8,
        ..BalloonParams::default()
    };
    let (impulse, normal) = resolve_contact(&mut a, &params, &mut b, &params, 0.8).unwrap();
    assert!(impulse > 0.0);
    assert!((b.velocity - a.velocity).dot(normal) >= 0.0);
}

#[test]
fn test_overlapping_pair_separates_in_engine() {
    let mut engine = Engine::builder(config(2, 2))
        .with_wind(ConstantWind(Vec3::ZERO))
        .with_environment(|_altitude: f32, _temperature: f32| 0.9)
        .build()
        .unwrap();
    engine.set_feature(Feature::Bursting, false).unwrap();

    let centre = Vec3::new(0.0, 3.0, -0.8);
    let placements = [(-0.3, 1.0), (0.3, -1.0)];
    for (index, (dx, vx)) in placements.into_iter().enumerate() {
        let mut params = engine.store().params()[index];
        params.elasticity = 0.8;
        engine.set_params(index, params).unwrap();
        engine
            .set_body(
                index,
                Body {
                    position: centre + Vec3::new(dx, 0.0, 0.0),
                    velocity: Vec3::new(vx, 0.0, 0.0),
                    ..Body::default()
                },
            )
            .unwrap();
    }

    engine.tick();
    assert!(engine.last_tick().contacts >= 1);
    let bodies = engine.store().bodies();
    let normal = (bodies[1].position - bodies[0].position).normalize();
    assert!((bodies[1].velocity - bodies[0].velocity).dot(normal) >= 0.0);
    assert!(all_finite(&engine));
}

#[test]
fn test_metrics_report_rendered_instances() {
    let mut engine = Engine::new(config(128, 100)).unwrap();
    for _ in 0..3 {
        engine.tick();
        engine.sample_frame(8.0, engine.memory_mb());
    }
    let metrics = engine.metrics();
    assert_eq!(metrics.rendered_instances, 100);
    assert!(metrics.fps > 0.0);
    assert!(metrics.memory_mb > 0.0);
    assert_eq!(metrics.quality_level, 0);
}
