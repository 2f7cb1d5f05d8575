//! Obstacle scanner.
//!
//! Once per scan tick the scanner rotates a fixed list of observer-local
//! [`DirectionProbe`]s into world space, asks the range provider how far the
//! nearest surface is along each ray, and keeps the single closest valid
//! sample.
//!
//! The scanner itself never talks to a provider: [`ObstacleScanner::rays`]
//! yields the world rays and [`ObstacleScanner::select_nearest`] reduces the
//! answers, so the async engine can fire all queries concurrently.
//! [`ObstacleScanner::scan`] wraps both for synchronous callers.
//!
//! Ties are broken by probe declaration order: the first-declared probe with
//! the minimum distance wins, every run.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{world_direction, Pose, Vec3};

/// A named, observer-local unit direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionProbe {
    pub name: String,
    pub direction: Vec3,
}

impl DirectionProbe {
    pub fn new(name: impl Into<String>, direction: Vec3) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    /// Probe from yaw (positive = right) and pitch (positive = up), degrees.
    pub fn from_angles(name: impl Into<String>, yaw_deg: f32, pitch_deg: f32) -> Self {
        let (sy, cy) = yaw_deg.to_radians().sin_cos();
        let (sp, cp) = pitch_deg.to_radians().sin_cos();
        Self::new(name, Vec3::new(cp * sy, sp, -cp * cy))
    }
}

/// The stock probe set: forward, lateral and downward-forward cones so that
/// low obstacles and drop-offs are caught as well as walls.
pub fn default_probes() -> Vec<DirectionProbe> {
    vec![
        DirectionProbe::from_angles("forward", 0.0, 0.0),
        DirectionProbe::from_angles("forward_low", 0.0, -15.0),
        DirectionProbe::from_angles("forward_floor", 0.0, -35.0),
        DirectionProbe::from_angles("drop_off", 0.0, -60.0),
        DirectionProbe::from_angles("forward_left", -30.0, 0.0),
        DirectionProbe::from_angles("forward_right", 30.0, 0.0),
        DirectionProbe::from_angles("left", -90.0, 0.0),
        DirectionProbe::from_angles("right", 90.0, 0.0),
        DirectionProbe::from_angles("low_left", -30.0, -25.0),
        DirectionProbe::from_angles("low_right", 30.0, -25.0),
        DirectionProbe::from_angles("head_height", 0.0, 15.0),
    ]
}

/// The nearest obstacle found in one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleSample {
    /// Name of the probe that produced the sample.
    pub probe: String,
    /// World-space unit direction of the probe ray.
    pub direction: Vec3,
    /// Distance to the surface along `direction` (metres).
    pub distance: f32,
}

/// Result of one scan tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// No pose this tick; the alert state must not change.
    Skipped,
    /// Every probe came back empty or out of range.
    Clear,
    Obstacle(ObstacleSample),
}

impl ScanOutcome {
    pub fn nearest_distance(&self) -> Option<f32> {
        match self {
            ScanOutcome::Obstacle(s) => Some(s.distance),
            _ => None,
        }
    }
}

/// Reduces a fixed probe set to the nearest in-range obstacle.
#[derive(Debug, Clone)]
pub struct ObstacleScanner {
    probes: Vec<DirectionProbe>,
    max_range: f32,
}

impl ObstacleScanner {
    /// `max_range` bounds valid samples (inclusive); farther ones are
    /// discarded.
    pub fn new(probes: Vec<DirectionProbe>, max_range: f32) -> Self {
        Self {
            probes,
            max_range: max_range.max(0.0),
        }
    }

    pub fn with_default_probes(max_range: f32) -> Self {
        Self::new(default_probes(), max_range)
    }

    pub fn probes(&self) -> &[DirectionProbe] {
        &self.probes
    }

    pub fn max_range(&self) -> f32 {
        self.max_range
    }

    /// World-space ray directions, in probe declaration order.
    pub fn rays(&self, pose: &Pose) -> Vec<Vec3> {
        self.probes
            .iter()
            .map(|p| world_direction(p.direction, pose))
            .collect()
    }

    /// Pick the nearest valid sample.  `distances[i]` answers `rays[i]`;
    /// missing entries count as "no return".
    pub fn select_nearest(&self, rays: &[Vec3], distances: &[Option<f32>]) -> ScanOutcome {
        let mut best: Option<(usize, f32)> = None;
        for (i, d) in distances.iter().enumerate().take(rays.len()) {
            let Some(d) = d.filter(|d| self.is_valid(*d)) else {
                continue;
            };
            // Strict comparison keeps the first-declared probe on ties.
            if best.is_none_or(|(_, b)| d < b) {
                best = Some((i, d));
            }
        }

        match best {
            Some((i, distance)) => {
                let probe = self
                    .probes
                    .get(i)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                debug!(probe = %probe, distance, "nearest obstacle");
                ScanOutcome::Obstacle(ObstacleSample {
                    probe,
                    direction: rays[i],
                    distance,
                })
            }
            None => ScanOutcome::Clear,
        }
    }

    /// Run a full scan with a synchronous range query.
    pub fn scan<F>(&self, pose: Option<&Pose>, mut query: F) -> ScanOutcome
    where
        F: FnMut(Vec3) -> Option<f32>,
    {
        let Some(pose) = pose else {
            return ScanOutcome::Skipped;
        };
        let rays = self.rays(pose);
        let distances: Vec<Option<f32>> = rays.iter().map(|r| query(*r)).collect();
        self.select_nearest(&rays, &distances)
    }

    fn is_valid(&self, d: f32) -> bool {
        d.is_finite() && d >= 0.0 && d <= self.max_range
    }
}
