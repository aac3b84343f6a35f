//! Force model, integration and collision response.
//!
//! Each tick runs in three steps:
//!
//! 1. [`PhysicsIntegrator::prepare`] fills the ambient density cache for every
//!    altitude/temperature bucket occupied by a live balloon. Single-threaded.
//! 2. [`PhysicsIntegrator::integrate`] accumulates buoyancy and wind, steps
//!    velocity and position with semi-implicit Euler, applies damping and the
//!    tether limit, and checks the result. Runs over contiguous index ranges
//!    on the worker pool.
//! 3. [`PhysicsIntegrator::resolve_collisions`] walks entities in index order
//!    and applies impulses to overlapping pairs found through the spatial grid.
//!    Single-threaded because every contact writes two entities.
//!
//! # Forces
//!
//! ```text
//! buoyancy = coefficient * volume * (ambient_density - balloon_density) * g    (+Y)
//! wind     = coupling * cross_section * (wind_sample - velocity)
//! ```
//!
//! The balloon's weight is folded into `balloon_density`, so a balloon in air
//! of its own density feels no net force.
//!
//! # Recovery
//!
//! If a step leaves any position or velocity component non-finite, the entity
//! is put back to its last stable snapshot and reported. It is never destroyed
//! for it. A balloon left non-finite by the collision pass is restored at the
//! start of the next tick, whether or not LOD throttling holds it frozen.
//! Collision residue in dense clusters is accepted; raising
//! `collision_iterations` reduces it.

use crate::config::PhysicsConfig;
use crate::entity::{BalloonParams, BalloonState, Body, PhysicsView, Vitals, WindSample};
use crate::environment::{DensityCache, Environment, WindField};
use crate::features::{Feature, FeatureSet};
use crate::lod::{LodController, LodState};
use crate::spatial::SpatialHashGrid;
use glam::{Quat, Vec3};
use rayon::prelude::*;
use std::f32::consts::PI;

/// Per-tick inputs shared by every entity.
pub struct StepContext<'a> {
    pub dt: f32,
    pub sim_time: f32,
    pub features: FeatureSet,
    /// Entities per parallel work range.
    pub chunk_size: usize,
    pub wind: &'a dyn WindField,
    pub environment: &'a dyn Environment,
    /// Update-interval throttling. `None` integrates every entity every tick.
    pub lod: Option<&'a LodController>,
}

/// Outcome of the integration phase, reduced across work ranges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntegrationReport {
    pub integrated: usize,
    /// Entities held at their last state by LOD throttling.
    pub frozen: usize,
    pub wind_samples: usize,
    /// Entities restored from their stable snapshot.
    pub instabilities: Vec<usize>,
    /// Entities whose wind sample was unusable.
    pub wind_faults: Vec<usize>,
    /// Bursting entities whose timer ran out. The caller destroys them.
    pub burst_complete: Vec<usize>,
}

impl IntegrationReport {
    fn merge(mut self, other: IntegrationReport) -> IntegrationReport {
        self.integrated += other.integrated;
        self.frozen += other.frozen;
        self.wind_samples += other.wind_samples;
        self.instabilities.extend(other.instabilities);
        self.wind_faults.extend(other.wind_faults);
        self.burst_complete.extend(other.burst_complete);
        self
    }
}

/// Outcome of the collision phase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionReport {
    /// Overlapping pairs found, summed over passes.
    pub contacts: usize,
    /// Contacts that were approaching and received an impulse.
    pub impulses: usize,
    /// Entities that started bursting this tick.
    pub bursts_started: Vec<usize>,
}

/// Buoyant force on a balloon.
#[inline]
pub fn buoyant_force(
    params: &BalloonParams,
    ambient_density: f32,
    balloon_density: f32,
    gravity: f32,
) -> Vec3 {
    Vec3::Y * (params.buoyancy_coefficient * params.volume() * (ambient_density - balloon_density) * gravity)
}

/// Aerodynamic drag towards the local wind velocity.
#[inline]
pub fn wind_force(params: &BalloonParams, wind: Vec3, velocity: Vec3, coupling: f32) -> Vec3 {
    let cross_section = PI * params.radius * params.radius;
    (wind - velocity) * (coupling * cross_section)
}

/// Impulse-based response for one overlapping pair.
///
/// Returns the impulse magnitude applied along the contact normal (zero if
/// the pair was already separating) and the normal from `a` towards `b`.
pub fn resolve_contact(
    a: &mut Body,
    pa: &BalloonParams,
    b: &mut Body,
    pb: &BalloonParams,
    penetration_correction: f32,
) -> Option<(f32, Vec3)> {
    let delta = b.position - a.position;
    let distance = delta.length();
    let min_distance = pa.radius + pb.radius;
    if distance >= min_distance {
        return None;
    }
    let normal = if distance > 1e-6 { delta / distance } else { Vec3::Y };
    let inv_a = pa.inv_mass();
    let inv_b = pb.inv_mass();
    let inv_sum = inv_a + inv_b;
    if inv_sum <= 0.0 {
        return None;
    }

    let approach = (b.velocity - a.velocity).dot(normal);
    let mut impulse = 0.0;
    if approach < 0.0 {
        let restitution = 0.5 * (pa.elasticity + pb.elasticity);
        impulse = -(1.0 + restitution) * approach / inv_sum;
        a.velocity -= normal * (impulse * inv_a);
        b.velocity += normal * (impulse * inv_b);
    }

    let correction = normal * ((min_distance - distance) * penetration_correction / inv_sum);
    a.position -= correction * inv_a;
    b.position += correction * inv_b;

    Some((impulse, normal))
}

/// Integrates balloons and resolves their contacts.
#[derive(Debug)]
pub struct PhysicsIntegrator {
    config: PhysicsConfig,
    rope_length: f32,
    density: DensityCache,
    neighbors: Vec<usize>,
}

impl PhysicsIntegrator {
    pub fn new(config: PhysicsConfig, rope_length: f32) -> Self {
        let density = DensityCache::new(config.density_altitude_step, config.density_temperature_step);
        Self {
            config,
            rope_length,
            density,
            neighbors: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    #[inline]
    pub fn density_cache(&self) -> &DensityCache {
        &self.density
    }

    /// Air temperature at an altitude.
    #[inline]
    pub fn temperature_at(&self, altitude: f32) -> f32 {
        self.config.sea_level_temperature - self.config.lapse_rate * altitude
    }

    /// Fill the density cache for every bucket a live balloon is in.
    ///
    /// Returns the number of new cache entries.
    pub fn prepare<E: Environment + ?Sized>(&mut self, bodies: &[Body], live: &[bool], env: &E) -> usize {
        let keys: Vec<_> = bodies
            .iter()
            .zip(live)
            .filter(|(_, &alive)| alive)
            .map(|(b, _)| {
                let altitude = b.position.y;
                self.density.key(altitude, self.temperature_at(altitude))
            })
            .collect();
        let added = self.density.prepare(keys, env);
        if added > 0 {
            log::debug!(
                "density cache grew by {} to {} buckets ({} queries total)",
                added,
                self.density.len(),
                self.density.misses()
            );
        }
        added
    }

    /// Forget cached densities, e.g. after swapping the environment model.
    pub fn clear_cache(&mut self) {
        self.density.clear();
    }

    /// Ambient density at an altitude, from the cache when possible.
    pub fn ambient_density<E: Environment + ?Sized>(&self, altitude: f32, env: &E) -> f32 {
        let temperature = self.temperature_at(altitude);
        match self.density.get(self.density.key(altitude, temperature)) {
            Some(density) => density,
            None => env.ambient_density(altitude, temperature),
        }
    }

    /// Advance every live entity by one fixed step.
    pub fn integrate(&self, view: PhysicsView<'_>, ctx: &StepContext<'_>) -> IntegrationReport {
        let chunk = ctx.chunk_size.max(1);
        let params = view.params;
        view.bodies
            .par_chunks_mut(chunk)
            .zip(view.stable.par_chunks_mut(chunk))
            .zip(view.vitals.par_chunks_mut(chunk))
            .zip(view.wind.par_chunks_mut(chunk))
            .zip(view.lod.par_chunks_mut(chunk))
            .enumerate()
            .map(|(c, ((((bodies, stable), vitals), wind), lod))| {
                let base = c * chunk;
                let mut report = IntegrationReport::default();
                for k in 0..bodies.len() {
                    let index = base + k;
                    self.step_entity(
                        index,
                        EntitySlot {
                            body: &mut bodies[k],
                            stable: &mut stable[k],
                            vitals: &mut vitals[k],
                            wind: &mut wind[k],
                            lod: &mut lod[k],
                            params: &params[index],
                        },
                        ctx,
                        &mut report,
                    );
                }
                report
            })
            .reduce(IntegrationReport::default, IntegrationReport::merge)
    }

    fn step_entity(
        &self,
        index: usize,
        slot: EntitySlot<'_>,
        ctx: &StepContext<'_>,
        report: &mut IntegrationReport,
    ) {
        let c = &self.config;
        let EntitySlot {
            body,
            stable,
            vitals,
            wind,
            lod,
            params,
        } = slot;

        match vitals.state {
            BalloonState::Destroyed => return,
            BalloonState::Bursting => {
                vitals.burst_timer -= ctx.dt;
                if vitals.burst_timer <= 0.0 {
                    report.burst_complete.push(index);
                }
                return;
            }
            BalloonState::Normal | BalloonState::Deforming => {}
        }

        // Left by the previous tick's collision pass.
        if !body.is_finite() {
            *body = *stable;
            wind.velocity = Vec3::ZERO;
            report.instabilities.push(index);
        }

        let interval = ctx
            .lod
            .map(|controller| controller.update_interval(lod))
            .unwrap_or(1);
        if !lod.tick(interval) {
            report.frozen += 1;
            return;
        }

        // Wind, staggered across entities.
        let mut force = Vec3::ZERO;
        if ctx.features.is_enabled(Feature::Wind) {
            if wind.advance(c.wind_sample_fraction) {
                let sample = ctx.wind.sample(body.position, ctx.sim_time);
                if sample.is_finite() {
                    wind.velocity = sample;
                    report.wind_samples += 1;
                } else {
                    wind.velocity = Vec3::ZERO;
                    report.wind_faults.push(index);
                }
            }
            force += wind_force(params, wind.velocity, body.velocity, c.wind_coupling);
        }
        let drive = force;

        let ambient = self.ambient_density(body.position.y, ctx.environment);
        force += buoyant_force(params, ambient, c.balloon_density, c.gravity);

        // Semi-implicit Euler, then damping.
        let inv_mass = params.inv_mass();
        body.acceleration = force * inv_mass;
        body.velocity += body.acceleration * ctx.dt;
        body.position += body.velocity * ctx.dt;
        body.velocity *= c.damping;

        // Sway: wind tips the balloon downwind, buoyancy rights it.
        let up = body.orientation * Vec3::Y;
        let torque =
            Vec3::Y.cross(drive) * (c.sway_strength * inv_mass) + up.cross(Vec3::Y) * c.sway_strength;
        body.angular_velocity = (body.angular_velocity + torque * ctx.dt) * c.angular_damping;
        body.orientation =
            (Quat::from_scaled_axis(body.angular_velocity * ctx.dt) * body.orientation).normalize();

        if c.tether_limit {
            self.apply_tether_limit(body, params);
        }

        if !body.is_finite() {
            *body = *stable;
            wind.velocity = Vec3::ZERO;
            report.instabilities.push(index);
            return;
        }
        *stable = *body;

        vitals.age += ctx.dt;
        if vitals.squash > 0.0 {
            vitals.squash *= (-c.squash_recovery * ctx.dt).exp();
            if vitals.squash < 1e-3 {
                vitals.squash = 0.0;
            }
        }
        report.integrated += 1;
    }

    /// Keep a balloon within rope reach of its anchor and above the ground.
    fn apply_tether_limit(&self, body: &mut Body, params: &BalloonParams) {
        let reach = self.rope_length + params.radius;
        let offset = body.position - params.anchor;
        let distance = offset.length();
        if distance > reach && distance.is_finite() {
            let normal = offset / distance;
            body.position = params.anchor + normal * reach;
            let outward = body.velocity.dot(normal);
            if outward > 0.0 {
                body.velocity -= normal * outward;
            }
        }
        let floor = params.anchor.y + params.radius;
        if body.position.y < floor {
            body.position.y = floor;
            body.velocity.y = body.velocity.y.max(0.0);
        }
    }

    /// Resolve overlapping pairs in index order.
    ///
    /// `grid` must have been rebuilt from the current positions. Each pair is
    /// handled once per pass, from its lower index. Bursting balloons do not
    /// collide.
    pub fn resolve_collisions(
        &mut self,
        bodies: &mut [Body],
        vitals: &mut [Vitals],
        params: &[BalloonParams],
        grid: &SpatialHashGrid,
        features: FeatureSet,
    ) -> CollisionReport {
        let mut report = CollisionReport::default();
        let collides = |v: &Vitals| matches!(v.state, BalloonState::Normal | BalloonState::Deforming);

        let max_radius = params
            .iter()
            .zip(vitals.iter())
            .filter(|(_, v)| collides(v))
            .map(|(p, _)| p.radius)
            .fold(0.0f32, f32::max);

        let mut neighbors = std::mem::take(&mut self.neighbors);
        for _ in 0..self.config.collision_iterations.max(1) {
            for i in 0..bodies.len() {
                if !collides(&vitals[i]) {
                    continue;
                }
                grid.query_neighbors_into(bodies[i].position, params[i].radius + max_radius, &mut neighbors);
                for &j in &neighbors {
                    if j <= i || j >= bodies.len() || !collides(&vitals[j]) {
                        continue;
                    }
                    let (head, tail) = bodies.split_at_mut(j);
                    let Some((impulse, normal)) = resolve_contact(
                        &mut head[i],
                        &params[i],
                        &mut tail[0],
                        &params[j],
                        self.config.penetration_correction,
                    ) else {
                        continue;
                    };
                    report.contacts += 1;
                    if impulse > 0.0 {
                        report.impulses += 1;
                        for (k, axis) in [(i, normal), (j, -normal)] {
                            if self.absorb_impact(&mut vitals[k], impulse, axis, features) {
                                report.bursts_started.push(k);
                            }
                        }
                    }
                }
            }
        }
        self.neighbors = neighbors;
        report
    }

    /// Apply squash and damage from one impact. Returns `true` if the balloon
    /// started bursting.
    fn absorb_impact(&self, vitals: &mut Vitals, impulse: f32, normal: Vec3, features: FeatureSet) -> bool {
        let c = &self.config;
        let excess = impulse - c.deform_impulse;
        if excess <= 0.0 {
            return false;
        }
        if features.is_enabled(Feature::Deformation) {
            let squash = (excess / c.deform_impulse.max(1e-3) * 0.1).min(0.45);
            if squash > vitals.squash {
                vitals.squash = squash;
                vitals.squash_axis = normal;
            }
            vitals.advance_to(BalloonState::Deforming);
        }
        if features.is_enabled(Feature::Bursting) {
            vitals.health -= excess * c.damage_per_impulse;
            vitals.advance_to(BalloonState::Deforming);
            if vitals.health <= 0.0 && vitals.state < BalloonState::Bursting {
                vitals.health = 0.0;
                vitals.advance_to(BalloonState::Bursting);
                vitals.burst_timer = c.burst_duration;
                return true;
            }
        }
        false
    }
}

struct EntitySlot<'a> {
    body: &'a mut Body,
    stable: &'a mut Body,
    vitals: &'a mut Vitals,
    wind: &'a mut WindSample,
    lod: &'a mut LodState,
    params: &'a BalloonParams,
}
