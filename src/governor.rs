//! Performance governor.
//!
//! The governor keeps rolling frame, physics and render timings and trades
//! simulation quality for throughput when frame time stays above a high-water
//! mark. It never aborts work in progress; it only shrinks the work future
//! ticks will do.
//!
//! # Quality ladder
//!
//! | Level | Rope iteration cap | Suppressed features |
//! |-------|--------------------|---------------------|
//! | 0 | `max_iterations` | none |
//! | 1 | `max_iterations / 2` | none |
//! | 2 | `max_iterations / 4` | deformation, fluid, swarm |
//! | 3 | 1 | deformation, bursting, fluid, swarm |
//!
//! One level is dropped after `sustain_samples` consecutive samples above
//! `high_water_ms` and one is restored after as many consecutive samples below
//! `low_water_ms`.
//!
//! The governor also keeps per-subsystem error counters with the simulation
//! time of the most recent error.

use crate::config::GovernorConfig;
use crate::error::Subsystem;
use crate::features::{Feature, FeatureSet};
use serde::Serialize;
use std::collections::VecDeque;

/// Highest quality level (lowest quality).
pub const MAX_LEVEL: u8 = 3;

/// Rolling performance figures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub fps: f32,
    pub physics_time_ms: f32,
    pub render_time_ms: f32,
    pub memory_mb: f32,
    pub rendered_instances: usize,
    /// Current quality level, 0 being full quality.
    pub quality_level: u8,
}

/// Error counter for one subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    pub count: u64,
    /// Simulation time of the most recent error, if any.
    pub last_error_time_seconds: Option<f64>,
}

/// Quality change decided by a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovernorAction {
    None,
    Downgrade(u8),
    Restore(u8),
}

/// Rope iteration cap for a quality level.
pub fn iteration_cap(level: u8, max_iterations: u32) -> u32 {
    match level {
        0 => max_iterations,
        1 => max_iterations / 2,
        2 => max_iterations / 4,
        _ => 1,
    }
    .max(1)
}

/// Features the governor suppresses at a quality level.
pub fn suppressed_features(level: u8) -> &'static [Feature] {
    match level {
        0 | 1 => &[],
        2 => &[Feature::Deformation, Feature::Fluid, Feature::Swarm],
        _ => &[
            Feature::Deformation,
            Feature::Bursting,
            Feature::Fluid,
            Feature::Swarm,
        ],
    }
}

#[derive(Clone, Debug)]
struct Window {
    samples: VecDeque<f32>,
    size: usize,
}

impl Window {
    fn new(size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(size.max(1)),
            size: size.max(1),
        }
    }

    fn push(&mut self, value: f32) {
        if self.samples.len() == self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f32>() / self.samples.len() as f32
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Monitors the frame budget and drives the quality ladder.
#[derive(Clone, Debug)]
pub struct PerformanceGovernor {
    config: GovernorConfig,
    max_iterations: u32,
    frame_times: Window,
    physics_times: Window,
    render_times: Window,
    memory_mb: f32,
    rendered_instances: usize,
    level: u8,
    above: u32,
    below: u32,
    errors: [ErrorStats; Subsystem::ALL.len()],
}

impl PerformanceGovernor {
    pub fn new(config: GovernorConfig, max_iterations: u32) -> Self {
        let window = config.window;
        Self {
            config,
            max_iterations,
            frame_times: Window::new(window),
            physics_times: Window::new(window),
            render_times: Window::new(window),
            memory_mb: 0.0,
            rendered_instances: 0,
            level: 0,
            above: 0,
            below: 0,
            errors: [ErrorStats::default(); Subsystem::ALL.len()],
        }
    }

    /// Feed one frame's total time and the current memory footprint.
    pub fn sample(&mut self, frame_time_ms: f32, memory_mb: f32) -> GovernorAction {
        if memory_mb.is_finite() {
            self.memory_mb = memory_mb;
        }
        if !frame_time_ms.is_finite() || frame_time_ms < 0.0 {
            return GovernorAction::None;
        }
        self.frame_times.push(frame_time_ms);

        if frame_time_ms > self.config.high_water_ms {
            self.above += 1;
            self.below = 0;
        } else if frame_time_ms < self.config.low_water_ms {
            self.below += 1;
            self.above = 0;
        } else {
            self.above = 0;
            self.below = 0;
        }

        let sustain = self.config.sustain_samples.max(1);
        if self.above >= sustain && self.level < MAX_LEVEL {
            self.level += 1;
            self.above = 0;
            log::info!(
                "frame time {:.2} ms over budget, quality lowered to level {} (rope iterations {})",
                self.frame_times.mean(),
                self.level,
                self.iteration_cap()
            );
            return GovernorAction::Downgrade(self.level);
        }
        if self.below >= sustain && self.config.allow_restore && self.level > 0 {
            self.level -= 1;
            self.below = 0;
            log::info!(
                "frame time {:.2} ms under budget, quality restored to level {}",
                self.frame_times.mean(),
                self.level
            );
            return GovernorAction::Restore(self.level);
        }
        GovernorAction::None
    }

    /// Record the engine's own phase timings for the last tick.
    pub fn record_tick(&mut self, physics_ms: f32, render_ms: f32, rendered_instances: usize) {
        self.physics_times.push(physics_ms);
        self.render_times.push(render_ms);
        self.rendered_instances = rendered_instances;
    }

    /// Update the instance count without a timing sample.
    pub fn set_rendered_instances(&mut self, rendered_instances: usize) {
        self.rendered_instances = rendered_instances;
    }

    pub fn metrics(&self) -> Metrics {
        let frame = self.frame_times.mean();
        Metrics {
            fps: if frame > 0.0 { 1000.0 / frame } else { 0.0 },
            physics_time_ms: self.physics_times.mean(),
            render_time_ms: self.render_times.mean(),
            memory_mb: self.memory_mb,
            rendered_instances: self.rendered_instances,
            quality_level: self.level,
        }
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Rope iteration cap at the current level.
    #[inline]
    pub fn iteration_cap(&self) -> u32 {
        iteration_cap(self.level, self.max_iterations)
    }

    /// Bring the governor-side feature suppression in line with the current level.
    ///
    /// User toggles are left alone.
    pub fn apply_to(&self, features: &mut FeatureSet) {
        for feature in Feature::ALL {
            features.unsuppress(feature);
        }
        for &feature in suppressed_features(self.level) {
            features.suppress(feature);
        }
    }

    /// Count `count` errors for a subsystem at simulation time `sim_time`.
    pub fn record_errors(&mut self, subsystem: Subsystem, count: usize, sim_time: f64) {
        if count == 0 {
            return;
        }
        let stats = &mut self.errors[subsystem as usize];
        stats.count += count as u64;
        stats.last_error_time_seconds = Some(sim_time);
    }

    #[inline]
    pub fn record_error(&mut self, subsystem: Subsystem, sim_time: f64) {
        self.record_errors(subsystem, 1, sim_time);
    }

    pub fn error_stats(&self, subsystem: Subsystem) -> ErrorStats {
        self.errors[subsystem as usize]
    }

    /// Return to full quality and drop timing history. Error counters are kept.
    pub fn reset(&mut self) {
        self.level = 0;
        self.above = 0;
        self.below = 0;
        self.frame_times.clear();
        self.physics_times.clear();
        self.render_times.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> PerformanceGovernor {
        PerformanceGovernor::new(
            GovernorConfig {
                high_water_ms: 18.0,
                low_water_ms: 12.0,
                sustain_samples: 3,
                window: 10,
                allow_restore: true,
            },
            16,
        )
    }

    #[test]
    fn test_sustained_overload_downgrades() {
        let mut gov = governor();
        assert_eq!(gov.sample(30.0, 10.0), GovernorAction::None);
        assert_eq!(gov.sample(30.0, 10.0), GovernorAction::None);
        assert_eq!(gov.sample(30.0, 10.0), GovernorAction::Downgrade(1));
        assert_eq!(gov.iteration_cap(), 8);
    }

    #[test]
    fn test_spike_does_not_downgrade() {
        let mut gov = governor();
        for _ in 0..10 {
            gov.sample(30.0, 10.0);
            gov.sample(30.0, 10.0);
            gov.sample(15.0, 10.0);
        }
        assert_eq!(gov.level(), 0);
    }

    #[test]
    fn test_ladder_bottoms_out_and_restores() {
        let mut gov = governor();
        for _ in 0..30 {
            gov.sample(40.0, 10.0);
        }
        assert_eq!(gov.level(), MAX_LEVEL);
        assert_eq!(gov.iteration_cap(), 1);

        let mut features = FeatureSet::default();
        gov.apply_to(&mut features);
        assert!(!features.is_enabled(Feature::Deformation));
        assert!(!features.is_enabled(Feature::Bursting));
        assert!(features.is_enabled(Feature::Wind));

        for _ in 0..3 {
            gov.sample(5.0, 10.0);
        }
        assert_eq!(gov.level(), 2);
        gov.apply_to(&mut features);
        assert!(features.is_enabled(Feature::Bursting));
        assert!(!features.is_enabled(Feature::Deformation));
    }

    #[test]
    fn test_restore_can_be_disabled() {
        let mut gov = governor();
        gov.config.allow_restore = false;
        for _ in 0..3 {
            gov.sample(40.0, 10.0);
        }
        for _ in 0..10 {
            gov.sample(1.0, 10.0);
        }
        assert_eq!(gov.level(), 1);
    }

    #[test]
    fn test_metrics() {
        let mut gov = governor();
        gov.sample(10.0, 42.0);
        gov.sample(30.0, 43.0);
        gov.record_tick(4.0, 1.0, 900);
        gov.record_tick(6.0, 3.0, 1000);
        let m = gov.metrics();
        assert!((m.fps - 50.0).abs() < 1e-3);
        assert_eq!(m.physics_time_ms, 5.0);
        assert_eq!(m.render_time_ms, 2.0);
        assert_eq!(m.memory_mb, 43.0);
        assert_eq!(m.rendered_instances, 1000);
        assert!(serde_json::to_string(&m).unwrap().contains("physics_time_ms"));
    }

    #[test]
    fn test_error_stats_per_subsystem() {
        let mut gov = governor();
        assert_eq!(gov.error_stats(Subsystem::Physics), ErrorStats::default());
        gov.record_errors(Subsystem::Physics, 3, 1.5);
        gov.record_error(Subsystem::Physics, 2.0);
        gov.record_errors(Subsystem::Rope, 0, 9.0);
        let stats = gov.error_stats(Subsystem::Physics);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.last_error_time_seconds, Some(2.0));
        assert_eq!(gov.error_stats(Subsystem::Rope).count, 0);
        assert_eq!(gov.error_stats(Subsystem::Rope).last_error_time_seconds, None);
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let mut gov = governor();
        for _ in 0..5 {
            assert_eq!(gov.sample(f32::NAN, 1.0), GovernorAction::None);
        }
        assert_eq!(gov.metrics().fps, 0.0);
    }
}
