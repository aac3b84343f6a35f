//! Optional subsystem toggles.
//!
//! A feature is active when the user has it enabled and the performance
//! governor has not suppressed it. The two sources are tracked separately so
//! that restoring quality never re-enables something the user turned off.

use crate::error::EngineError;
use std::fmt;
use std::str::FromStr;

/// Optional subsystems that can be toggled at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Wind forces on balloons and ropes.
    Wind,
    /// Balloon-balloon collision response.
    Collision,
    /// Tether simulation.
    Ropes,
    /// Distance-based tiering. When off every entity runs at the nearest tier.
    Lod,
    /// Impact squash.
    Deformation,
    /// Damage and bursting.
    Bursting,
    /// Fluid-style extension. Not provided by this build.
    Fluid,
    /// Swarm-style extension. Not provided by this build.
    Swarm,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Wind,
        Feature::Collision,
        Feature::Ropes,
        Feature::Lod,
        Feature::Deformation,
        Feature::Bursting,
        Feature::Fluid,
        Feature::Swarm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Wind => "wind",
            Feature::Collision => "collision",
            Feature::Ropes => "ropes",
            Feature::Lod => "lod",
            Feature::Deformation => "deformation",
            Feature::Bursting => "bursting",
            Feature::Fluid => "fluid",
            Feature::Swarm => "swarm",
        }
    }

    /// Look up a feature by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Feature> {
        let name = name.trim();
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Whether this build implements the feature.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Feature::Fluid | Feature::Swarm)
    }

    #[inline]
    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::from_name(s).ok_or_else(|| EngineError::UnsupportedFeature(s.to_string()))
    }
}

/// Current toggle state of every feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSet {
    user: u16,
    suppressed: u16,
}

impl Default for FeatureSet {
    fn default() -> Self {
        let user = Feature::ALL
            .iter()
            .filter(|f| f.is_supported())
            .fold(0, |bits, f| bits | f.bit());
        Self { user, suppressed: 0 }
    }
}

impl FeatureSet {
    /// Whether the feature is currently active.
    #[inline]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        feature.is_supported() && self.user & feature.bit() != 0 && self.suppressed & feature.bit() == 0
    }

    /// Whether the user has the feature enabled, regardless of the governor.
    #[inline]
    pub fn is_user_enabled(&self, feature: Feature) -> bool {
        self.user & feature.bit() != 0
    }

    /// User toggle. Unsupported features are rejected and left unchanged.
    pub fn set(&mut self, feature: Feature, enabled: bool) -> Result<(), EngineError> {
        if !feature.is_supported() {
            return Err(EngineError::UnsupportedFeature(feature.name().to_string()));
        }
        if enabled {
            self.user |= feature.bit();
        } else {
            self.user &= !feature.bit();
        }
        Ok(())
    }

    /// Governor-side disable.
    pub fn suppress(&mut self, feature: Feature) {
        self.suppressed |= feature.bit();
    }

    /// Lift a governor-side disable.
    pub fn unsuppress(&mut self, feature: Feature) {
        self.suppressed &= !feature.bit();
    }

    #[inline]
    pub fn is_suppressed(&self, feature: Feature) -> bool {
        self.suppressed & feature.bit() != 0
    }

    /// Active features, in declaration order.
    pub fn enabled(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.iter().copied().filter(|f| self.is_enabled(*f))
    }
}
