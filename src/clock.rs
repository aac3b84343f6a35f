//! Fixed-timestep simulation clock.
//!
//! The engine always integrates with the same `dt`. Real frame time is fed to
//! [`SimClock::accumulate`], which reports how many fixed ticks are due. Leftover
//! time carries over to the next frame, and a long stall is capped at
//! `max_substeps` ticks so a slow frame cannot snowball into an even slower one.
//!
//! # Example
//!
//! ```ignore
//! let mut clock = SimClock::new(1.0 / 60.0, 4);
//!
//! // In your frame loop:
//! for _ in 0..clock.accumulate(frame_seconds) {
//!     engine.tick();
//! }
//! ```

/// Fixed-step accumulator with pause and time scale.
#[derive(Clone, Debug)]
pub struct SimClock {
    /// Fixed timestep in seconds.
    fixed_dt: f32,
    /// Upper bound on ticks produced per `accumulate` call.
    max_substeps: u32,
    /// Unconsumed real time, already scaled.
    accumulator: f32,
    /// Simulated seconds since start or last reset.
    sim_time: f64,
    /// Ticks run since start or last reset.
    ticks: u64,
    /// Time dropped because a frame needed more than `max_substeps` ticks.
    dropped: f64,
    paused: bool,
    /// Time scale multiplier (1.0 = normal speed).
    time_scale: f32,
}

impl SimClock {
    pub fn new(fixed_dt: f32, max_substeps: u32) -> Self {
        Self {
            fixed_dt,
            max_substeps: max_substeps.max(1),
            accumulator: 0.0,
            sim_time: 0.0,
            ticks: 0,
            dropped: 0.0,
            paused: false,
            time_scale: 1.0,
        }
    }

    /// Add real elapsed time and return how many fixed ticks are due.
    ///
    /// The caller is expected to run exactly that many ticks, each followed
    /// by [`advance_tick`](Self::advance_tick).
    pub fn accumulate(&mut self, real_dt: f32) -> usize {
        if self.paused || !real_dt.is_finite() || real_dt <= 0.0 {
            return 0;
        }
        self.accumulator += real_dt * self.time_scale;
        let due = (self.accumulator / self.fixed_dt).floor() as u64;
        let steps = due.min(self.max_substeps as u64);
        self.accumulator -= steps as f32 * self.fixed_dt;
        if due > steps {
            // Drop the backlog rather than carry it forward.
            self.dropped += self.accumulator as f64;
            self.accumulator = self.accumulator.rem_euclid(self.fixed_dt);
            self.dropped -= self.accumulator as f64;
        }
        steps as usize
    }

    /// Record that one fixed tick has been simulated.
    #[inline]
    pub fn advance_tick(&mut self) {
        self.ticks += 1;
        self.sim_time += self.fixed_dt as f64;
    }

    #[inline]
    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    /// Simulated seconds.
    #[inline]
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fraction of a tick left in the accumulator, for render interpolation.
    #[inline]
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.fixed_dt).clamp(0.0, 1.0)
    }

    /// Real seconds discarded because of substep capping.
    #[inline]
    pub fn dropped_time(&self) -> f64 {
        self.dropped
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Set time scale multiplier.
    ///
    /// - `1.0` = normal speed
    /// - `0.5` = half speed (slow motion)
    /// - `2.0` = double speed
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
    }

    /// Return to time zero. Pause state and time scale are kept.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.sim_time = 0.0;
        self.ticks = 0;
        self.dropped = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_new() {
        let clock = SimClock::new(0.01, 4);
        assert_eq!(clock.ticks(), 0);
        assert!(!clock.is_paused());
        assert_eq!(clock.time_scale(), 1.0);
    }

    #[test]
    fn test_accumulate_carries_remainder() {
        let mut clock = SimClock::new(0.25, 8);
        assert_eq!(clock.accumulate(0.2), 0);
        assert_eq!(clock.accumulate(0.2), 1);
        assert!((clock.alpha() - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_substeps_are_capped() {
        let mut clock = SimClock::new(0.25, 2);
        assert_eq!(clock.accumulate(10.0), 2);
        assert!(clock.alpha() < 1.0);
        assert!(clock.dropped_time() > 9.0);
    }

    #[test]
    fn test_pause_and_scale() {
        let mut clock = SimClock::new(0.25, 8);
        clock.pause();
        assert_eq!(clock.accumulate(1.0), 0);
        clock.resume();

        clock.set_time_scale(2.0);
        assert_eq!(clock.accumulate(0.5), 4);

        // Negative scale should clamp to 0
        clock.set_time_scale(-1.0);
        assert_eq!(clock.time_scale(), 0.0);
        assert_eq!(clock.accumulate(1.0), 0);
    }

    #[test]
    fn test_advance_and_reset() {
        let mut clock = SimClock::new(0.5, 4);
        clock.advance_tick();
        clock.advance_tick();
        assert_eq!(clock.ticks(), 2);
        assert!((clock.sim_time() - 1.0).abs() < 1e-9);
        clock.reset();
        assert_eq!(clock.ticks(), 0);
        assert_eq!(clock.sim_time(), 0.0);
    }
}
