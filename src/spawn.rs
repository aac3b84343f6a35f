//! Spawn layout for balloons and their anchors.
//!
//! Anchors sit on a square grid on the ground plane, centred on the origin and
//! sized for the store's full capacity, so slot `i` always owns the same anchor.
//! Per-slot jitter comes from an RNG seeded with the slot index, which makes a
//! respawn after [`reset`](crate::Engine::reset) reproduce the original balloon.

use crate::config::SpawnConfig;
use glam::{Vec2, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::{PI, TAU};

/// Everything needed to (re)initialize one entity slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalloonSpawn {
    pub anchor: Vec3,
    pub position: Vec3,
    pub radius: f32,
    pub mass: f32,
    pub buoyancy_coefficient: f32,
    pub elasticity: f32,
    pub health: f32,
    pub base_color: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub transparency: f32,
}

/// Context handed out per spawned slot, with helpers for common jitter patterns.
pub struct SpawnContext {
    /// Slot being spawned.
    pub index: usize,
    rng: SmallRng,
}

impl SpawnContext {
    /// Deterministic context for a slot.
    pub fn new(index: usize, seed: u64) -> Self {
        let mixed = seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            index,
            rng: SmallRng::seed_from_u64(mixed),
        }
    }

    /// Random f32 between 0.0 and 1.0.
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random f32 in `[min, max]`. Returns `min` for an empty range.
    #[inline]
    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        }
    }

    /// Random point inside a disc on the XZ plane.
    pub fn random_in_disc(&mut self, radius: f32) -> Vec2 {
        let angle = self.rng.gen_range(0.0..TAU);
        let r = radius * self.rng.gen::<f32>().sqrt();
        Vec2::new(angle.cos() * r, angle.sin() * r)
    }
}

/// Computes anchor positions and initial balloon state for slots.
#[derive(Clone, Debug)]
pub struct SpawnLayout {
    config: SpawnConfig,
    side: usize,
    rope_length: f32,
    balloon_density: f32,
}

impl SpawnLayout {
    pub fn new(config: SpawnConfig, capacity: usize, rope_length: f32, balloon_density: f32) -> Self {
        let side = (capacity.max(1) as f64).sqrt().ceil() as usize;
        Self {
            config,
            side,
            rope_length,
            balloon_density,
        }
    }

    /// Anchor of a slot on the ground grid.
    pub fn anchor(&self, index: usize) -> Vec3 {
        let half = (self.side as f32 - 1.0) * 0.5;
        let x = (index % self.side) as f32 - half;
        let z = (index / self.side) as f32 - half;
        Vec3::new(
            x * self.config.anchor_spacing,
            self.config.ground_height,
            z * self.config.anchor_spacing,
        )
    }

    /// Initial state of a slot.
    pub fn spawn(&self, index: usize) -> BalloonSpawn {
        let c = &self.config;
        let mut ctx = SpawnContext::new(index, c.seed);

        let anchor = self.anchor(index);
        let radius = ctx.random_range(c.radius_min, c.radius_max);
        let volume = 4.0 / 3.0 * PI * radius * radius * radius;
        let mass = (self.balloon_density * volume).max(1e-4);

        let jitter = ctx.random_in_disc(c.jitter);
        let rise = self.rope_length * c.initial_extension.clamp(0.0, 1.0);
        let position = anchor + Vec3::new(jitter.x, rise + radius, jitter.y);

        let base_color = if c.palette.is_empty() {
            Vec3::ONE
        } else {
            let pick = (ctx.random() * c.palette.len() as f32) as usize;
            Vec3::from(c.palette[pick.min(c.palette.len() - 1)])
        };

        BalloonSpawn {
            anchor,
            position,
            radius,
            mass,
            buoyancy_coefficient: c.buoyancy_coefficient,
            elasticity: c.elasticity.clamp(0.0, 1.0),
            health: c.health,
            base_color,
            metallic: c.metallic,
            roughness: c.roughness,
            transparency: c.transparency,
        }
    }

    #[inline]
    pub fn rope_length(&self) -> f32 {
        self.rope_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SpawnLayout {
        SpawnLayout::new(SpawnConfig::default(), 100, 4.0, 0.9)
    }

    #[test]
    fn test_spawn_is_deterministic() {
        let layout = layout();
        assert_eq!(layout.spawn(17), layout.spawn(17));
        assert_ne!(layout.spawn(17).position, layout.spawn(18).position);
    }

    #[test]
    fn test_anchors_are_unique_and_centred() {
        let layout = layout();
        let anchors: Vec<Vec3> = (0..100).map(|i| layout.anchor(i)).collect();
        for i in 0..anchors.len() {
            for j in (i + 1)..anchors.len() {
                assert!(anchors[i].distance(anchors[j]) > 1.0);
            }
        }
        let centroid = anchors.iter().copied().sum::<Vec3>() / anchors.len() as f32;
        assert!(centroid.length() < 1e-3);
    }

    #[test]
    fn test_spawn_ranges() {
        let layout = layout();
        let config = SpawnConfig::default();
        for i in 0..100 {
            let s = layout.spawn(i);
            assert!(s.radius >= config.radius_min && s.radius <= config.radius_max);
            assert!(s.mass > 0.0);
            assert!(s.position.y > s.anchor.y);
            assert!(s.position.distance(s.anchor) <= 4.0 + s.radius + config.jitter + 1e-3);
        }
    }

    #[test]
    fn test_disc_sampling() {
        let mut ctx = SpawnContext::new(3, 42);
        for _ in 0..200 {
            assert!(ctx.random_in_disc(0.5).length() <= 0.5 + 1e-6);
        }
        assert_eq!(ctx.random_range(2.0, 2.0), 2.0);
    }
}
