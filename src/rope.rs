//! Tether simulation.
//!
//! Every balloon slot owns one [`Rope`]: a chain of nodes from the pinned
//! ground anchor (root) to the balloon (tip). Each tick a rope takes a Verlet
//! step for its free nodes, clamps its tip to the balloon, then relaxes its
//! distance constraints for the number of iterations its LOD tier allows.
//!
//! Relaxation is Gauss-Seidel: each correction reads positions written by the
//! previous one in the same sweep, so a single rope is always solved
//! sequentially. Ropes are independent of each other and are solved in
//! parallel, one task per rope.

use crate::config::RopeConfig;
use glam::Vec3;
use rayon::prelude::*;

/// One point of a rope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RopeNode {
    pub position: Vec3,
    /// Position at the previous step; the Verlet velocity is `position - previous`.
    pub previous: Vec3,
    /// Pinned nodes are never moved by integration or relaxation.
    pub pinned: bool,
    /// Rest distance to the next node.
    pub rest_length: f32,
}

impl RopeNode {
    #[inline]
    fn inv_mass(&self) -> f32 {
        if self.pinned {
            0.0
        } else {
            1.0
        }
    }
}

/// A chain of nodes ordered root to tip.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rope {
    nodes: Vec<RopeNode>,
    attached: bool,
}

impl Rope {
    /// Rope from `anchor` to `tip` with `count` nodes and total rest length
    /// `length`. The root is pinned and the tip is attached.
    ///
    /// When the two ends are closer than `length`, the slack is laid out as a
    /// circular arc sagging away from +Y, so every segment starts exactly at
    /// its rest length. Otherwise the rope is straight and stretched.
    pub fn new(anchor: Vec3, tip: Vec3, count: usize, length: f32) -> Self {
        let count = count.max(2);
        let segments = count - 1;
        let rest_length = length / segments as f32;
        let nodes = slack_layout(anchor, tip, segments, rest_length)
            .into_iter()
            .enumerate()
            .map(|(i, position)| RopeNode {
                position,
                previous: position,
                pinned: i == 0 || i == segments,
                rest_length: if i < segments { rest_length } else { 0.0 },
            })
            .collect();
        Self {
            nodes,
            attached: true,
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[RopeNode] {
        &self.nodes
    }

    #[inline]
    pub fn root(&self) -> Vec3 {
        self.nodes[0].position
    }

    #[inline]
    pub fn tip(&self) -> Vec3 {
        self.nodes[self.nodes.len() - 1].position
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Release the tip so it hangs freely.
    pub fn detach(&mut self) {
        self.attached = false;
        if let Some(tip) = self.nodes.last_mut() {
            tip.pinned = false;
        }
    }

    /// Pin the tip to a point.
    pub fn attach(&mut self, point: Vec3) {
        self.attached = true;
        if let Some(tip) = self.nodes.last_mut() {
            tip.pinned = true;
            tip.previous = tip.position;
            tip.position = point;
        }
    }

    /// Verlet step for every free node.
    pub fn integrate(&mut self, acceleration: Vec3, dt: f32, damping: f32) {
        let step = acceleration * dt * dt;
        for node in self.nodes.iter_mut().filter(|n| !n.pinned) {
            let velocity = (node.position - node.previous) * damping;
            node.previous = node.position;
            node.position += velocity + step;
        }
    }

    /// Gauss-Seidel distance relaxation. Returns the largest remaining deviation.
    pub fn relax(&mut self, iterations: u32) -> f32 {
        for _ in 0..iterations {
            for i in 0..self.nodes.len() - 1 {
                let (head, tail) = self.nodes.split_at_mut(i + 1);
                let a = &mut head[i];
                let b = &mut tail[0];
                let w = a.inv_mass() + b.inv_mass();
                if w <= 0.0 {
                    continue;
                }
                let delta = b.position - a.position;
                let distance = delta.length();
                if distance <= 1e-6 {
                    continue;
                }
                let offset = delta * ((distance - a.rest_length) / distance);
                a.position += offset * (a.inv_mass() / w);
                b.position -= offset * (b.inv_mass() / w);
            }
        }
        self.max_deviation()
    }

    /// Largest absolute difference between a segment's length and its rest length.
    pub fn max_deviation(&self) -> f32 {
        self.nodes
            .windows(2)
            .map(|pair| (pair[0].position.distance(pair[1].position) - pair[0].rest_length).abs())
            .fold(0.0, f32::max)
    }

    fn is_finite(&self) -> bool {
        self.nodes.iter().all(|n| n.position.is_finite() && n.previous.is_finite())
    }
}

/// Node positions from `anchor` to `tip` for a chain of `segments` links of
/// length `rest_length`.
///
/// Nodes sit on a circle at a fixed angular step `phi` chosen so that
/// `sin(n * phi / 2) / sin(phi / 2) = span / rest_length`; consecutive nodes
/// are then exactly `rest_length` apart and the ends land on the anchor and
/// tip.
fn slack_layout(anchor: Vec3, tip: Vec3, segments: usize, rest_length: f32) -> Vec<Vec3> {
    let n = segments as f32;
    let chord = tip - anchor;
    let span = chord.length();
    let straight = |t: f32| anchor.lerp(tip, t);
    if !span.is_finite() || span >= n * rest_length * 0.9999 || rest_length <= 0.0 {
        return (0..=segments).map(|i| straight(i as f32 / n)).collect();
    }

    let u = if span > 1e-6 { chord / span } else { Vec3::Y };
    let sag = Vec3::NEG_Y - u * u.dot(Vec3::NEG_Y);
    let w = if sag.length_squared() > 1e-8 {
        sag.normalize()
    } else {
        u.any_orthonormal_vector()
    };

    // The ratio falls from n at phi = 0 to 0 at phi = 2*pi/n.
    let ratio = span / rest_length;
    let (mut lo, mut hi) = (0.0_f32, std::f32::consts::TAU / n);
    for _ in 0..48 {
        let phi = 0.5 * (lo + hi);
        if (n * phi * 0.5).sin() / (phi * 0.5).sin() > ratio {
            lo = phi;
        } else {
            hi = phi;
        }
    }
    let phi = 0.5 * (lo + hi);
    let radius = rest_length / (2.0 * (phi * 0.5).sin());
    let half = n * phi * 0.5;
    let centre = anchor + chord * 0.5 - w * (radius * half.cos());

    let mut points: Vec<Vec3> = (0..=segments)
        .map(|i| {
            let angle = -half + i as f32 * phi;
            centre + (u * angle.sin() + w * angle.cos()) * radius
        })
        .collect();
    points[0] = anchor;
    points[segments] = tip;
    points
}

/// Per-rope input for one solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RopeTarget {
    /// Point on the balloon the tip is clamped to. `None` lets the tip hang free.
    pub attach: Option<Vec3>,
    /// The owning balloon's current wind sample.
    pub wind: Vec3,
    /// Relaxation iterations.
    pub iterations: u32,
}

/// Outcome of a solve across all ropes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RopeReport {
    pub solved: usize,
    pub max_deviation: f32,
    /// Ropes left above tolerance, with their deviation.
    pub divergent: Vec<(usize, f32)>,
    /// Divergent ropes above the severity threshold.
    pub severe: usize,
    /// Ropes that went non-finite and were rebuilt.
    pub faults: Vec<usize>,
}

impl RopeReport {
    fn merge(mut self, other: RopeReport) -> RopeReport {
        self.solved += other.solved;
        self.max_deviation = self.max_deviation.max(other.max_deviation);
        self.divergent.extend(other.divergent);
        self.severe += other.severe;
        self.faults.extend(other.faults);
        self
    }
}

/// Owns one rope per entity slot.
#[derive(Debug)]
pub struct RopeSolver {
    config: RopeConfig,
    ropes: Vec<Rope>,
}

impl RopeSolver {
    pub fn new(config: RopeConfig) -> Self {
        Self {
            config,
            ropes: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &RopeConfig {
        &self.config
    }

    #[inline]
    pub fn ropes(&self) -> &[Rope] {
        &self.ropes
    }

    #[inline]
    pub fn rope(&self, index: usize) -> Option<&Rope> {
        self.ropes.get(index)
    }

    /// Create a fresh rope for a slot, growing the rope table if needed.
    pub fn respawn(&mut self, index: usize, anchor: Vec3, tip: Vec3) {
        if self.ropes.len() <= index {
            self.ropes.resize_with(index + 1, Rope::default);
        }
        self.ropes[index] = Rope::new(anchor, tip, self.config.nodes_per_rope, self.config.length);
    }

    /// Approximate heap usage of the rope nodes.
    pub fn memory_bytes(&self) -> usize {
        self.ropes.capacity() * std::mem::size_of::<Rope>()
            + self
                .ropes
                .iter()
                .map(|r| r.nodes.capacity() * std::mem::size_of::<RopeNode>())
                .sum::<usize>()
    }

    /// Advance every rope one step.
    ///
    /// `target` is called once per rope slot and returns `None` for slots
    /// whose balloon is gone. Ropes run in parallel; each rope is solved
    /// sequentially.
    pub fn solve<F>(&mut self, dt: f32, wind_enabled: bool, target: F) -> RopeReport
    where
        F: Fn(usize) -> Option<RopeTarget> + Sync,
    {
        let config = &self.config;
        let gravity = Vec3::NEG_Y * config.gravity;
        self.ropes
            .par_iter_mut()
            .enumerate()
            .map(|(index, rope)| {
                let mut report = RopeReport::default();
                let Some(input) = target(index) else {
                    return report;
                };
                if rope.nodes.len() < 2 {
                    return report;
                }

                let wind = if wind_enabled && input.wind.is_finite() {
                    input.wind * config.wind_influence
                } else {
                    Vec3::ZERO
                };
                rope.integrate(gravity + wind, dt, config.damping);

                match input.attach {
                    Some(point) if point.is_finite() => rope.attach(point),
                    _ => {
                        if rope.attached {
                            rope.detach();
                        }
                    }
                }

                let deviation = rope.relax(input.iterations.max(1));
                if !rope.is_finite() {
                    let tip = input.attach.filter(|p| p.is_finite()).unwrap_or(rope.root());
                    *rope = Rope::new(rope.root(), tip, config.nodes_per_rope, config.length);
                    report.faults.push(index);
                    return report;
                }

                report.solved = 1;
                report.max_deviation = deviation;
                if deviation > config.tolerance {
                    report.divergent.push((index, deviation));
                    if deviation > config.tolerance * config.severity_ratio {
                        report.severe = 1;
                    }
                }
                report
            })
            .reduce(RopeReport::default, RopeReport::merge)
    }
}
