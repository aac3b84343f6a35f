//! Error types for skytether.
//!
//! Per-entity faults inside a tick are never returned to the caller. They are
//! recovered where they happen and counted by the
//! [`PerformanceGovernor`](crate::governor::PerformanceGovernor). The types here
//! describe those faults for logging and counters, and carry the population-level
//! failures (configuration, unsupported features) that commands do return.

use std::fmt;

/// Simulation subsystem an error is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subsystem {
    /// Force accumulation, integration and collision response.
    Physics,
    /// Broad-phase grid rebuild and queries.
    Spatial,
    /// Tether relaxation.
    Rope,
    /// Level-of-detail assignment.
    Lod,
    /// Instance buffer construction.
    Render,
    /// Growth, shrink and reset of the entity population.
    Population,
    /// Feature toggles.
    Features,
}

impl Subsystem {
    /// Every subsystem, in reporting order.
    pub const ALL: [Subsystem; 7] = [
        Subsystem::Physics,
        Subsystem::Spatial,
        Subsystem::Rope,
        Subsystem::Lod,
        Subsystem::Render,
        Subsystem::Population,
        Subsystem::Features,
    ];

    /// Stable lowercase name, used in logs and metrics output.
    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Physics => "physics",
            Subsystem::Spatial => "spatial",
            Subsystem::Rope => "rope",
            Subsystem::Lod => "lod",
            Subsystem::Render => "render",
            Subsystem::Population => "population",
            Subsystem::Features => "features",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload-free classification of an [`EngineError`], used by counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NumericInstability,
    CapacityExceeded,
    ConstraintDivergence,
    UnsupportedFeature,
    SubsystemFault,
    Config,
    ThreadPool,
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    Io(std::io::Error),
    /// The configuration file is not valid JSON for [`EngineConfig`](crate::config::EngineConfig).
    Parse(serde_json::Error),
    /// A value is out of its allowed range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Errors produced by the simulation engine.
#[derive(Debug)]
pub enum EngineError {
    /// A position or velocity component became non-finite. Recovered by
    /// restoring the entity's last stable state.
    NumericInstability { index: usize },
    /// A population request exceeded the configured maximum and was clamped.
    CapacityExceeded { requested: usize, capacity: usize },
    /// Rope relaxation left a segment further from its rest length than the
    /// configured tolerance.
    ConstraintDivergence { index: usize, deviation: f32 },
    /// A feature toggle named a feature this build does not provide.
    UnsupportedFeature(String),
    /// A collaborator or phase produced an unusable value for one entity.
    SubsystemFault {
        subsystem: Subsystem,
        index: usize,
        reason: &'static str,
    },
    /// Configuration could not be loaded or failed validation.
    Config(ConfigError),
    /// The worker pool could not be created.
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl EngineError {
    /// Classification used by error counters.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NumericInstability { .. } => ErrorKind::NumericInstability,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::ConstraintDivergence { .. } => ErrorKind::ConstraintDivergence,
            EngineError::UnsupportedFeature(_) => ErrorKind::UnsupportedFeature,
            EngineError::SubsystemFault { .. } => ErrorKind::SubsystemFault,
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::ThreadPool(_) => ErrorKind::ThreadPool,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NumericInstability { index } => {
                write!(f, "Non-finite state for entity {}, restored last stable state", index)
            }
            EngineError::CapacityExceeded { requested, capacity } => write!(
                f,
                "Requested population {} exceeds capacity {}, clamped",
                requested, capacity
            ),
            EngineError::ConstraintDivergence { index, deviation } => write!(
                f,
                "Rope {} did not converge, max segment deviation {:.4}",
                index, deviation
            ),
            EngineError::UnsupportedFeature(name) => {
                write!(f, "Feature '{}' is not supported by this build", name)
            }
            EngineError::SubsystemFault {
                subsystem,
                index,
                reason,
            } => write!(f, "{} fault on entity {}: {}", subsystem, index, reason),
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::ThreadPool(e) => write!(f, "Failed to build worker pool: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::ThreadPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for EngineError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        EngineError::ThreadPool(e)
    }
}
