//! Entity storage for balloons.
//!
//! Balloon state lives in flat per-field arrays indexed by slot. A slot is
//! either live (any state other than [`BalloonState::Destroyed`]) or free. The
//! backing arrays only ever grow, up to the configured capacity; destroyed
//! slots are recycled by later growth.
//!
//! # Slot reuse
//!
//! [`destroy`](EntityStore::destroy) does not make a slot reusable right away.
//! The slot first waits in a pending queue until the engine has rebuilt the
//! instance buffer without it, then [`release_pending`](EntityStore::release_pending)
//! moves it to the free list. Indices are not stable across a grow or shrink;
//! hold an [`EntityHandle`] and check [`is_current`](EntityStore::is_current)
//! when an index has to outlive one.

use crate::lod::LodState;
use crate::spawn::{BalloonSpawn, SpawnLayout};
use glam::{Mat3, Quat, Vec3};
use std::mem::size_of;

/// Lifecycle state. Only moves forward, except through a reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BalloonState {
    #[default]
    Normal,
    /// Squashed by an impact and carrying damage.
    Deforming,
    /// Health exhausted; visible until the burst timer runs out.
    Bursting,
    Destroyed,
}

/// Kinematic state, written by the integrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub orientation: Quat,
    pub angular_velocity: Vec3,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
        }
    }
}

impl Body {
    /// Position and velocity are finite, and the orientation is usable.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
            && self.orientation.is_finite()
    }
}

/// Per-balloon constants set at spawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalloonParams {
    pub radius: f32,
    pub mass: f32,
    pub buoyancy_coefficient: f32,
    pub elasticity: f32,
    /// Ground anchor the tether is pinned to.
    pub anchor: Vec3,
}

impl Default for BalloonParams {
    fn default() -> Self {
        Self {
            radius: 0.0,
            mass: 1.0,
            buoyancy_coefficient: 0.0,
            elasticity: 0.0,
            anchor: Vec3::ZERO,
        }
    }
}

impl BalloonParams {
    #[inline]
    pub fn volume(&self) -> f32 {
        4.0 / 3.0 * std::f32::consts::PI * self.radius.powi(3)
    }

    #[inline]
    pub fn inv_mass(&self) -> f32 {
        if self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }
}

/// Surface appearance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub transparency: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::ONE,
            metallic: 0.0,
            roughness: 0.5,
            transparency: 0.0,
        }
    }
}

/// Lifecycle, damage and deformation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vitals {
    pub state: BalloonState,
    /// Seconds since spawn.
    pub age: f32,
    pub health: f32,
    /// Current squash amount in `[0, 1)`.
    pub squash: f32,
    /// Unit axis the squash compresses along.
    pub squash_axis: Vec3,
    /// Seconds left before a bursting balloon is destroyed.
    pub burst_timer: f32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            state: BalloonState::Destroyed,
            age: 0.0,
            health: 0.0,
            squash: 0.0,
            squash_axis: Vec3::Y,
            burst_timer: 0.0,
        }
    }
}

impl Vitals {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state != BalloonState::Destroyed
    }

    /// Advance the lifecycle state. Backward moves are ignored.
    #[inline]
    pub fn advance_to(&mut self, state: BalloonState) {
        if state > self.state {
            self.state = state;
        }
    }

    /// Deformation applied to the base mesh.
    ///
    /// A volume-preserving scale: compressed by `1 - squash` along the
    /// squash axis and expanded by `1 / sqrt(1 - squash)` across it.
    pub fn deformation(&self) -> Mat3 {
        if self.squash <= f32::EPSILON {
            return Mat3::IDENTITY;
        }
        let axis = self.squash_axis.normalize_or(Vec3::Y);
        let along = (1.0 - self.squash).max(0.05);
        let across = 1.0 / along.sqrt();
        // S = across * I + (along - across) * n n^T
        let outer = Mat3::from_cols(axis * axis.x, axis * axis.y, axis * axis.z);
        Mat3::IDENTITY * across + outer * (along - across)
    }
}

/// Last wind sample of a slot and its refresh cadence.
///
/// `phase` accumulates the sampling fraction on every integrated step and a
/// fresh sample is due whenever it reaches one. Cadence therefore follows the
/// entity's own integration count, so LOD throttling slows refreshes down but
/// never starves them, and the long-run share of samples is exactly the
/// configured fraction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindSample {
    pub velocity: Vec3,
    pub phase: f32,
}

impl WindSample {
    /// Fresh slot state. Initial phases are spread by slot index so that
    /// neighbouring slots refresh on different ticks.
    pub fn staggered(index: usize) -> Self {
        Self {
            velocity: Vec3::ZERO,
            phase: (index as f32 * 0.618_034).fract(),
        }
    }

    /// Count one integrated step and report whether a fresh sample is due.
    #[inline]
    pub fn advance(&mut self, fraction: f32) -> bool {
        self.phase += fraction.clamp(1e-3, 1.0);
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Generation-checked reference to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub index: usize,
    pub generation: u32,
}

/// Lazy, restartable iterator over live slot indices in ascending order.
#[derive(Clone, Debug)]
pub struct LiveIndices<'a> {
    live: &'a [bool],
    next: usize,
}

impl Iterator for LiveIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.live.len() {
            let index = self.next;
            self.next += 1;
            if self.live[index] {
                return Some(index);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.live.len() - self.next.min(self.live.len())))
    }
}

/// Capacity-bounded store of balloon slots.
#[derive(Debug)]
pub struct EntityStore {
    capacity: usize,
    layout: SpawnLayout,
    bodies: Vec<Body>,
    stable: Vec<Body>,
    params: Vec<BalloonParams>,
    materials: Vec<Material>,
    vitals: Vec<Vitals>,
    wind: Vec<WindSample>,
    lod: Vec<LodState>,
    generations: Vec<u32>,
    live: Vec<bool>,
    free: Vec<usize>,
    pending_free: Vec<usize>,
    live_count: usize,
}

impl EntityStore {
    pub fn new(capacity: usize, layout: SpawnLayout) -> Self {
        Self {
            capacity,
            layout,
            bodies: Vec::new(),
            stable: Vec::new(),
            params: Vec::new(),
            materials: Vec::new(),
            vitals: Vec::new(),
            wind: Vec::new(),
            lod: Vec::new(),
            generations: Vec::new(),
            live: Vec::new(),
            free: Vec::new(),
            pending_free: Vec::new(),
            live_count: 0,
        }
    }

    /// Maximum number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots allocated so far, live or not.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        self.live.get(index).copied().unwrap_or(false)
    }

    /// Live slot indices in ascending order.
    pub fn live_indices(&self) -> LiveIndices<'_> {
        LiveIndices {
            live: &self.live,
            next: 0,
        }
    }

    /// Add up to `delta` balloons. Returns how many were added.
    pub fn grow(&mut self, delta: usize) -> usize {
        let mut spawned = Vec::new();
        self.grow_into(delta, &mut spawned)
    }

    /// Like [`grow`](Self::grow), appending the spawned slot indices to `spawned`.
    ///
    /// Free slots are reused before new ones are allocated. Growth stops
    /// quietly at capacity.
    pub fn grow_into(&mut self, delta: usize, spawned: &mut Vec<usize>) -> usize {
        let mut added = 0;
        while added < delta {
            let index = match self.free.pop() {
                Some(index) => index,
                None if self.bodies.len() < self.capacity => self.allocate_slot(),
                None => break,
            };
            self.spawn_slot(index);
            spawned.push(index);
            added += 1;
        }
        added
    }

    /// Mark a slot destroyed and queue it for reuse. Returns `false` if the
    /// slot was not live.
    pub fn destroy(&mut self, index: usize) -> bool {
        if !self.is_live(index) {
            return false;
        }
        self.vitals[index].state = BalloonState::Destroyed;
        self.live[index] = false;
        self.live_count -= 1;
        self.pending_free.push(index);
        true
    }

    /// Destroy the `count` highest-index live balloons. Returns the indices destroyed.
    pub fn shrink(&mut self, count: usize) -> Vec<usize> {
        let victims: Vec<usize> = (0..self.live.len())
            .rev()
            .filter(|&i| self.live[i])
            .take(count)
            .collect();
        for &index in &victims {
            self.destroy(index);
        }
        victims
    }

    /// Move slots destroyed since the last call to the free list.
    ///
    /// Only call once the current instance buffer has been rebuilt.
    pub fn release_pending(&mut self) -> usize {
        let released = self.pending_free.len();
        // Lowest indices end up on top of the stack.
        self.pending_free.sort_unstable_by(|a, b| b.cmp(a));
        self.free.extend(self.pending_free.drain(..));
        released
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending_free.len()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Respawn slots `0..population` at their spawn configuration and free the rest.
    ///
    /// Returns the number of live balloons afterwards.
    pub fn reset(&mut self, population: usize) -> usize {
        let population = population.min(self.capacity);
        while self.bodies.len() < population {
            self.allocate_slot();
        }
        self.free.clear();
        self.pending_free.clear();
        self.live_count = 0;
        for index in 0..self.bodies.len() {
            if index < population {
                self.spawn_slot(index);
            } else {
                self.vitals[index] = Vitals::default();
                self.live[index] = false;
            }
        }
        self.free.extend((population..self.bodies.len()).rev());
        self.live_count
    }

    /// Handle for a live slot.
    pub fn handle(&self, index: usize) -> Option<EntityHandle> {
        self.is_live(index).then(|| EntityHandle {
            index,
            generation: self.generations[index],
        })
    }

    /// Whether a handle still refers to the balloon it was taken from.
    pub fn is_current(&self, handle: EntityHandle) -> bool {
        self.is_live(handle.index) && self.generations[handle.index] == handle.generation
    }

    /// Approximate heap usage of the backing arrays.
    pub fn memory_bytes(&self) -> usize {
        self.bodies.capacity() * size_of::<Body>()
            + self.stable.capacity() * size_of::<Body>()
            + self.params.capacity() * size_of::<BalloonParams>()
            + self.materials.capacity() * size_of::<Material>()
            + self.vitals.capacity() * size_of::<Vitals>()
            + self.wind.capacity() * size_of::<WindSample>()
            + self.lod.capacity() * size_of::<LodState>()
            + self.generations.capacity() * size_of::<u32>()
            + self.live.capacity()
            + (self.free.capacity() + self.pending_free.capacity()) * size_of::<usize>()
    }

    #[inline]
    pub fn layout(&self) -> &SpawnLayout {
        &self.layout
    }

    // ========================================================================
    // Field access
    // ========================================================================

    #[inline]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    #[inline]
    pub fn params(&self) -> &[BalloonParams] {
        &self.params
    }

    #[inline]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[inline]
    pub fn vitals(&self) -> &[Vitals] {
        &self.vitals
    }

    #[inline]
    pub fn wind_samples(&self) -> &[WindSample] {
        &self.wind
    }

    #[inline]
    pub fn lod_states(&self) -> &[LodState] {
        &self.lod
    }

    #[inline]
    pub fn live_mask(&self) -> &[bool] {
        &self.live
    }

    /// Mutable views of everything the integrator writes, plus read-only params.
    pub fn physics_view(&mut self) -> PhysicsView<'_> {
        PhysicsView {
            bodies: &mut self.bodies,
            stable: &mut self.stable,
            vitals: &mut self.vitals,
            wind: &mut self.wind,
            lod: &mut self.lod,
            params: &self.params,
        }
    }

    /// Bodies and vitals for the collision pass.
    pub fn contact_view(&mut self) -> (&mut [Body], &mut [Vitals], &[BalloonParams]) {
        (&mut self.bodies, &mut self.vitals, &self.params)
    }

    /// LOD states alongside the live mask.
    pub fn lod_view(&mut self) -> (&mut [LodState], &[bool]) {
        (&mut self.lod, &self.live)
    }

    /// Overwrite a body and its stable snapshot. Used to place balloons directly.
    pub fn set_body(&mut self, index: usize, body: Body) {
        if index < self.bodies.len() {
            self.bodies[index] = body;
            self.stable[index] = body;
        }
    }

    /// Replace the per-balloon constants of a slot.
    pub fn set_params(&mut self, index: usize, params: BalloonParams) {
        if index < self.params.len() && params.radius > 0.0 && params.mass > 0.0 {
            self.params[index] = params;
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn allocate_slot(&mut self) -> usize {
        self.bodies.push(Body::default());
        self.stable.push(Body::default());
        self.params.push(BalloonParams::default());
        self.materials.push(Material::default());
        self.vitals.push(Vitals::default());
        self.wind.push(WindSample::default());
        self.lod.push(LodState::default());
        self.generations.push(0);
        self.live.push(false);
        self.bodies.len() - 1
    }

    fn spawn_slot(&mut self, index: usize) {
        let spawn: BalloonSpawn = self.layout.spawn(index);
        let body = Body {
            position: spawn.position,
            ..Body::default()
        };
        self.bodies[index] = body;
        self.stable[index] = body;
        self.params[index] = BalloonParams {
            radius: spawn.radius,
            mass: spawn.mass,
            buoyancy_coefficient: spawn.buoyancy_coefficient,
            elasticity: spawn.elasticity,
            anchor: spawn.anchor,
        };
        self.materials[index] = Material {
            base_color: spawn.base_color,
            metallic: spawn.metallic,
            roughness: spawn.roughness,
            transparency: spawn.transparency,
        };
        self.vitals[index] = Vitals {
            state: BalloonState::Normal,
            health: spawn.health,
            ..Vitals::default()
        };
        self.wind[index] = WindSample::staggered(index);
        self.lod[index] = LodState::default();
        self.generations[index] = self.generations[index].wrapping_add(1);
        if !self.live[index] {
            self.live[index] = true;
            self.live_count += 1;
        }
    }
}

/// Disjoint borrows of the integrator's per-slot arrays.
pub struct PhysicsView<'a> {
    pub bodies: &'a mut [Body],
    pub stable: &'a mut [Body],
    pub vitals: &'a mut [Vitals],
    pub wind: &'a mut [WindSample],
    pub lod: &'a mut [LodState],
    pub params: &'a [BalloonParams],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpawnConfig;

    fn store(capacity: usize) -> EntityStore {
        EntityStore::new(
            capacity,
            SpawnLayout::new(SpawnConfig::default(), capacity, 4.0, 0.9),
        )
    }

    #[test]
    fn test_grow_clamps_at_capacity() {
        let mut store = store(10);
        assert_eq!(store.grow(4), 4);
        assert_eq!(store.grow(100), 6);
        assert_eq!(store.grow(1), 0);
        assert_eq!(store.live_count(), 10);
        assert_eq!(store.slot_count(), 10);
    }

    #[test]
    fn test_destroyed_slot_reused_only_after_release() {
        let mut store = store(4);
        store.grow(4);
        assert!(store.destroy(2));
        assert!(!store.destroy(2));
        assert_eq!(store.grow(1), 0);

        assert_eq!(store.release_pending(), 1);
        let mut spawned = Vec::new();
        assert_eq!(store.grow_into(1, &mut spawned), 1);
        assert_eq!(spawned, vec![2]);
        assert_eq!(store.vitals()[2].state, BalloonState::Normal);
    }

    #[test]
    fn test_live_indices_are_ordered_and_restartable() {
        let mut store = store(8);
        store.grow(6);
        store.destroy(1);
        store.destroy(4);
        let live = store.live_indices();
        let first: Vec<usize> = live.clone().collect();
        let second: Vec<usize> = live.collect();
        assert_eq!(first, vec![0, 2, 3, 5]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_shrink_removes_highest_indices() {
        let mut store = store(8);
        store.grow(8);
        let removed = store.shrink(3);
        assert_eq!(removed, vec![7, 6, 5]);
        assert_eq!(store.live_count(), 5);
        assert_eq!(store.pending_count(), 3);
    }

    #[test]
    fn test_handles_detect_reuse() {
        let mut store = store(2);
        store.grow(2);
        let handle = store.handle(1).unwrap();
        assert!(store.is_current(handle));
        store.destroy(1);
        assert!(!store.is_current(handle));
        store.release_pending();
        store.grow(1);
        assert!(store.is_live(1));
        assert!(!store.is_current(handle));
    }

    #[test]
    fn test_reset_respawns_prefix() {
        let mut store = store(10);
        store.grow(10);
        let original = store.bodies()[3].position;
        store.set_body(
            3,
            Body {
                position: Vec3::splat(100.0),
                ..Body::default()
            },
        );
        store.destroy(5);
        assert_eq!(store.reset(6), 6);
        assert_eq!(store.bodies()[3].position, original);
        assert_eq!(store.live_indices().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
        assert!(store.vitals()[..6].iter().all(|v| v.state == BalloonState::Normal));
        assert_eq!(store.free_count(), 4);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_state_is_monotonic() {
        let mut vitals = Vitals {
            state: BalloonState::Normal,
            ..Vitals::default()
        };
        vitals.advance_to(BalloonState::Bursting);
        vitals.advance_to(BalloonState::Deforming);
        assert_eq!(vitals.state, BalloonState::Bursting);
    }

    #[test]
    fn test_deformation_preserves_volume() {
        let vitals = Vitals {
            state: BalloonState::Deforming,
            squash: 0.3,
            squash_axis: Vec3::new(1.0, 1.0, 0.0).normalize(),
            ..Vitals::default()
        };
        let m = vitals.deformation();
        assert!((m.determinant() - 1.0).abs() < 1e-4);
        assert_eq!(Vitals::default().deformation(), Mat3::IDENTITY);
    }

    #[test]
    fn test_memory_grows_with_population() {
        let mut store = store(1000);
        let before = store.memory_bytes();
        store.grow(500);
        assert!(store.memory_bytes() > before);
    }
}
