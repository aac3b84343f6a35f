//! External collaborators: wind, atmosphere and camera.
//!
//! The engine never discovers these on its own. They are handed to
//! [`EngineBuilder`](crate::engine::EngineBuilder) at construction time, either as
//! one of the models below or as a plain closure:
//!
//! ```ignore
//! let engine = Engine::builder(config)
//!     .with_wind(|p: Vec3, t: f32| Vec3::new((t + p.z * 0.1).sin(), 0.0, 0.5))
//!     .with_environment(|_altitude: f32, _temperature: f32| 1.2)
//!     .with_camera(|p: Vec3| p.distance(Vec3::new(0.0, 10.0, 60.0)))
//!     .build()?;
//! ```
//!
//! All collaborators are called from worker threads and must be `Send + Sync`.

use glam::Vec3;
use std::collections::HashMap;

/// Wind sampler: a vector field over position and simulation time.
pub trait WindField: Send + Sync {
    fn sample(&self, position: Vec3, sim_time: f32) -> Vec3;
}

impl<F> WindField for F
where
    F: Fn(Vec3, f32) -> Vec3 + Send + Sync,
{
    #[inline]
    fn sample(&self, position: Vec3, sim_time: f32) -> Vec3 {
        self(position, sim_time)
    }
}

/// Ambient air model.
pub trait Environment: Send + Sync {
    /// Air density in kg/m³ at an altitude (m) and temperature (°C).
    fn ambient_density(&self, altitude: f32, temperature: f32) -> f32;
}

impl<F> Environment for F
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    #[inline]
    fn ambient_density(&self, altitude: f32, temperature: f32) -> f32 {
        self(altitude, temperature)
    }
}

/// Distance from the viewer, supplied by the view layer.
pub trait CameraDistance: Send + Sync {
    fn distance(&self, position: Vec3) -> f32;
}

impl<F> CameraDistance for F
where
    F: Fn(Vec3) -> f32 + Send + Sync,
{
    #[inline]
    fn distance(&self, position: Vec3) -> f32 {
        self(position)
    }
}

// ============================================================================
// Default models
// ============================================================================

/// Uniform wind, the same everywhere and at all times.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantWind(pub Vec3);

impl WindField for ConstantWind {
    fn sample(&self, _position: Vec3, _sim_time: f32) -> Vec3 {
        self.0
    }
}

/// Prevailing wind with travelling gusts.
///
/// Gust strength varies smoothly in space and time so that neighbouring
/// balloons sway together.
#[derive(Clone, Copy, Debug)]
pub struct GustyWind {
    /// Mean wind vector.
    pub base: Vec3,
    /// Peak gust magnitude added on top of `base`.
    pub gust_strength: f32,
    /// Spatial frequency of the gust pattern (1/m).
    pub gust_scale: f32,
    /// Temporal frequency of the gust pattern (1/s).
    pub gust_frequency: f32,
}

impl Default for GustyWind {
    fn default() -> Self {
        Self {
            base: Vec3::new(1.5, 0.0, 0.4),
            gust_strength: 1.2,
            gust_scale: 0.08,
            gust_frequency: 0.35,
        }
    }
}

impl WindField for GustyWind {
    fn sample(&self, position: Vec3, sim_time: f32) -> Vec3 {
        let phase = sim_time * self.gust_frequency;
        let p = position * self.gust_scale;
        let gust = Vec3::new(
            (p.z + phase * 1.3).sin() * (p.y * 0.5 + phase).cos(),
            (p.x * 0.7 + phase * 0.6).sin() * 0.25,
            (p.x + phase * 0.9).cos() * (p.y * 0.3 - phase).sin(),
        );
        // Wind picks up with height above the ground.
        let shear = 1.0 + (position.y.max(0.0) * 0.02).min(1.0);
        (self.base + gust * self.gust_strength) * shear
    }
}

/// Exponential-atmosphere density model corrected for temperature.
#[derive(Clone, Copy, Debug)]
pub struct StandardAtmosphere {
    /// Density at sea level and `reference_temperature`.
    pub sea_level_density: f32,
    /// Altitude over which density falls by a factor of e.
    pub scale_height: f32,
    /// Temperature at which `sea_level_density` holds, °C.
    pub reference_temperature: f32,
}

impl Default for StandardAtmosphere {
    fn default() -> Self {
        Self {
            sea_level_density: 1.225,
            scale_height: 8_500.0,
            reference_temperature: 15.0,
        }
    }
}

impl Environment for StandardAtmosphere {
    fn ambient_density(&self, altitude: f32, temperature: f32) -> f32 {
        let kelvin = (temperature + 273.15).max(1.0);
        let reference = self.reference_temperature + 273.15;
        self.sea_level_density * (-altitude.max(0.0) / self.scale_height).exp() * (reference / kelvin)
    }
}

/// Camera at a fixed point.
#[derive(Clone, Copy, Debug)]
pub struct FixedCamera {
    pub position: Vec3,
}

impl CameraDistance for FixedCamera {
    fn distance(&self, position: Vec3) -> f32 {
        self.position.distance(position)
    }
}

// ============================================================================
// Ambient density cache
// ============================================================================

/// Quantized (altitude, temperature) key.
pub type DensityKey = (i32, i32);

/// Caches ambient density lookups on a quantized altitude/temperature grid.
///
/// The cache is filled single-threaded with [`prepare`](Self::prepare) before
/// the parallel integration phase, which then only reads it.
#[derive(Clone, Debug)]
pub struct DensityCache {
    altitude_step: f32,
    temperature_step: f32,
    values: HashMap<DensityKey, f32>,
    misses: u64,
}

impl DensityCache {
    pub fn new(altitude_step: f32, temperature_step: f32) -> Self {
        Self {
            altitude_step,
            temperature_step,
            values: HashMap::new(),
            misses: 0,
        }
    }

    /// Quantize an altitude/temperature pair to its cache key.
    #[inline]
    pub fn key(&self, altitude: f32, temperature: f32) -> DensityKey {
        (
            quantize(altitude, self.altitude_step),
            quantize(temperature, self.temperature_step),
        )
    }

    /// Ensure every key in `keys` has a value, querying `env` for the missing ones.
    ///
    /// Returns the number of new entries.
    pub fn prepare<E, I>(&mut self, keys: I, env: &E) -> usize
    where
        E: Environment + ?Sized,
        I: IntoIterator<Item = DensityKey>,
    {
        let mut added = 0;
        for key in keys {
            if self.values.contains_key(&key) {
                continue;
            }
            let altitude = key.0 as f32 * self.altitude_step;
            let temperature = key.1 as f32 * self.temperature_step;
            self.values.insert(key, env.ambient_density(altitude, temperature));
            added += 1;
        }
        self.misses += added as u64;
        added
    }

    /// Cached density for a key, if it has been prepared.
    #[inline]
    pub fn get(&self, key: DensityKey) -> Option<f32> {
        self.values.get(&key).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total number of collaborator queries made since creation.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[inline]
fn quantize(value: f32, step: f32) -> i32 {
    if value.is_finite() {
        (value / step).round() as i32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_collaborators() {
        let wind = |p: Vec3, t: f32| p * t;
        assert_eq!(wind.sample(Vec3::ONE, 2.0), Vec3::splat(2.0));

        let env = |a: f32, _t: f32| 1.0 - a * 0.01;
        assert!((env.ambient_density(10.0, 15.0) - 0.9).abs() < 1e-6);

        let camera = |p: Vec3| p.x;
        assert_eq!(camera.distance(Vec3::new(3.0, 0.0, 0.0)), 3.0);
    }

    #[test]
    fn test_atmosphere_decreases_with_altitude_and_heat() {
        let atm = StandardAtmosphere::default();
        let ground = atm.ambient_density(0.0, 15.0);
        assert!((ground - 1.225).abs() < 1e-4);
        assert!(atm.ambient_density(1000.0, 15.0) < ground);
        assert!(atm.ambient_density(0.0, 35.0) < ground);
    }

    #[test]
    fn test_gusty_wind_is_finite() {
        let wind = GustyWind::default();
        for i in 0..100 {
            let p = Vec3::new(i as f32 * 3.1, i as f32 * 0.7, -(i as f32) * 1.9);
            assert!(wind.sample(p, i as f32 * 0.1).is_finite());
        }
    }

    #[test]
    fn test_density_cache_queries_once_per_key() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = AtomicUsize::new(0);
        let env = |altitude: f32, _t: f32| {
            calls.fetch_add(1, Ordering::Relaxed);
            1.2 - altitude * 0.001
        };
        let mut cache = DensityCache::new(0.5, 0.25);
        let keys: Vec<DensityKey> = [0.1, 0.2, 0.24, 3.0, 3.1]
            .iter()
            .map(|&a| cache.key(a, 15.0))
            .collect();

        assert_eq!(cache.prepare(keys.iter().copied(), &env), 2);
        assert_eq!(cache.prepare(keys.iter().copied(), &env), 0);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(cache.key(0.1, 15.0)).is_some());
        assert!(cache.get(cache.key(100.0, 15.0)).is_none());
    }

    #[test]
    fn test_quantize_handles_nan() {
        let cache = DensityCache::new(1.0, 1.0);
        assert_eq!(cache.key(f32::NAN, f32::INFINITY), (0, 0));
    }
}
