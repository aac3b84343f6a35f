//! Capability-set interface for simulation managers.
//!
//! Hosts that drive several simulations (balloons today, other entity kinds
//! later) hold them as `Box<dyn SimulationManager>` and ask each one what it
//! supports instead of inspecting concrete types.
//!
//! ```ignore
//! let mut managers: Vec<Box<dyn SimulationManager>> = vec![Box::new(engine)];
//! for manager in &mut managers {
//!     if manager.supports_feature(Feature::Wind) {
//!         manager.try_change_count(5_000);
//!     }
//! }
//! ```

use crate::engine::PopulationChange;
use crate::features::Feature;
use crate::governor::Metrics;

pub trait SimulationManager: Send {
    /// Human-readable name for logs and tooling.
    fn name(&self) -> &str;

    /// Whether this manager provides `feature` at all.
    fn supports_feature(&self, feature: Feature) -> bool;

    /// Grow or shrink towards `target` entities. Never fails; the achieved
    /// count is reported.
    fn try_change_count(&mut self, target: usize) -> PopulationChange;

    fn performance_metrics(&self) -> Metrics;
}
