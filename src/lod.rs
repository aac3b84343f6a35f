//! Distance-based level of detail.
//!
//! Every live balloon is assigned a [`LodTier`] from its distance to the camera.
//! The tier decides how many relaxation iterations its rope gets and how often
//! its physics is integrated. Distant balloons in the last tier integrate only
//! every few ticks and hold their last state in between.
//!
//! # Hysteresis
//!
//! A balloon hovering right at a tier boundary would otherwise flip tiers every
//! tick. An entity moves to a farther tier only once it is more than
//! `hysteresis` past the boundary, and moves back only once it is more than
//! `hysteresis` inside it again.
//!
//! ```ignore
//! let table = LodTable::new(LodTier::default_table(), 2.0)?;
//! let near = table.tier_for(5.0);
//! let far = table.tier_for(500.0);
//! assert!(near.solver_iterations >= far.solver_iterations);
//! ```

use crate::environment::CameraDistance;
use crate::error::ConfigError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One row of the LOD table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodTier {
    /// Upper distance bound of this tier. The last tier also covers everything beyond.
    pub distance_threshold: f32,
    /// Rope relaxation iterations per tick.
    pub solver_iterations: u32,
    /// Physics is integrated once every this many ticks.
    pub update_interval_ticks: u32,
}

impl LodTier {
    pub const fn new(distance_threshold: f32, solver_iterations: u32, update_interval_ticks: u32) -> Self {
        Self {
            distance_threshold,
            solver_iterations,
            update_interval_ticks,
        }
    }

    /// Default tiers for a scene viewed from a few dozen metres away.
    pub fn default_table() -> Vec<LodTier> {
        vec![
            LodTier::new(25.0, 12, 1),
            LodTier::new(60.0, 8, 1),
            LodTier::new(120.0, 4, 2),
            LodTier::new(250.0, 2, 4),
            LodTier::new(500.0, 1, 8),
        ]
    }
}

/// Per-entity LOD bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LodState {
    /// Index into the tier table.
    pub tier: usize,
    /// Ticks elapsed since the entity was last integrated.
    pub ticks_since_update: u32,
}

impl LodState {
    /// Advance the update cadence by one tick and report whether the entity is
    /// due for integration this tick.
    pub fn tick(&mut self, interval: u32) -> bool {
        self.ticks_since_update += 1;
        if self.ticks_since_update >= interval.max(1) {
            self.ticks_since_update = 0;
            true
        } else {
            false
        }
    }
}

/// Ordered LOD tiers plus the hysteresis margin.
#[derive(Clone, Debug)]
pub struct LodTable {
    tiers: Vec<LodTier>,
    hysteresis: f32,
}

impl LodTable {
    /// Build a table, checking that tiers are ordered by distance and that
    /// fidelity never increases with distance.
    pub fn new(tiers: Vec<LodTier>, hysteresis: f32) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::Invalid("LOD table must have at least one tier".into()));
        }
        for pair in tiers.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.distance_threshold <= a.distance_threshold {
                return Err(ConfigError::Invalid(
                    "LOD tiers must be ordered by increasing distance".into(),
                ));
            }
            if b.solver_iterations > a.solver_iterations
                || b.update_interval_ticks < a.update_interval_ticks
            {
                return Err(ConfigError::Invalid(
                    "LOD fidelity must not increase with distance".into(),
                ));
            }
        }
        if tiers.iter().any(|t| t.solver_iterations == 0 || t.update_interval_ticks == 0) {
            return Err(ConfigError::Invalid(
                "LOD tiers need at least one iteration and an interval of at least one tick".into(),
            ));
        }
        Ok(Self {
            tiers,
            hysteresis: hysteresis.max(0.0),
        })
    }

    #[inline]
    pub fn tiers(&self) -> &[LodTier] {
        &self.tiers
    }

    #[inline]
    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    #[inline]
    pub fn tier(&self, index: usize) -> &LodTier {
        &self.tiers[index.min(self.tiers.len() - 1)]
    }

    /// Tier index for a distance, without hysteresis.
    pub fn index_for(&self, distance: f32) -> usize {
        self.tiers
            .iter()
            .position(|t| distance < t.distance_threshold)
            .unwrap_or(self.tiers.len() - 1)
    }

    /// Tier for a distance, without hysteresis.
    pub fn tier_for(&self, distance: f32) -> &LodTier {
        &self.tiers[self.index_for(distance)]
    }

    /// Tier index for an entity currently in `current`, applying the
    /// hysteresis margin on either side of each boundary it would cross.
    pub fn select(&self, current: usize, distance: f32) -> usize {
        let last = self.tiers.len() - 1;
        let current = current.min(last);
        // NaN distances keep the current tier.
        if distance.is_nan() {
            return current;
        }
        let raw = self.index_for(distance);
        let mut tier = current;
        if raw > current {
            while tier < last && distance > self.tiers[tier].distance_threshold + self.hysteresis {
                tier += 1;
            }
        } else if raw < current {
            while tier > 0 && distance < self.tiers[tier - 1].distance_threshold - self.hysteresis {
                tier -= 1;
            }
        }
        tier
    }
}

/// Assigns tiers to entities once per tick.
#[derive(Clone, Debug)]
pub struct LodController {
    table: LodTable,
}

impl LodController {
    pub fn new(table: LodTable) -> Self {
        Self { table }
    }

    #[inline]
    pub fn table(&self) -> &LodTable {
        &self.table
    }

    /// Stateless lookup used by callers that only need the tier for a distance.
    pub fn tier_for(&self, distance_to_camera: f32) -> &LodTier {
        self.table.tier_for(distance_to_camera)
    }

    /// Rope iterations for an entity, clamped by the governor's global cap.
    #[inline]
    pub fn iterations(&self, state: &LodState, iteration_cap: u32) -> u32 {
        self.table
            .tier(state.tier)
            .solver_iterations
            .min(iteration_cap)
            .max(1)
    }

    /// Physics update interval for an entity.
    #[inline]
    pub fn update_interval(&self, state: &LodState) -> u32 {
        self.table.tier(state.tier).update_interval_ticks
    }

    /// Recompute tiers for every live entity. Dead slots are skipped.
    ///
    /// Returns the number of entities whose camera distance was NaN; those
    /// keep their current tier.
    pub fn recompute<C: CameraDistance + ?Sized>(
        &self,
        states: &mut [LodState],
        positions: &[glam::Vec3],
        live: &[bool],
        camera: &C,
    ) -> usize {
        states
            .par_iter_mut()
            .zip(positions.par_iter())
            .zip(live.par_iter())
            .map(|((state, &position), &alive)| {
                if !alive {
                    return 0;
                }
                let distance = camera.distance(position);
                if distance.is_nan() {
                    return 1;
                }
                state.tier = self.table.select(state.tier, distance);
                0
            })
            .sum()
    }
}
