//! Maps tracking samples and scan outcomes to audio parameters.
//!
//! Two channels are produced:
//!
//! - **guidance** – volume falls off linearly with distance between
//!   `near_distance` and `far_distance`, is attenuated by how far off-axis
//!   the target lies, and is panned by the sine of the bearing.
//! - **alert** – volume rises as the nearest obstacle gets closer than the
//!   safe zone.  A two-sided hysteresis keeps the alert from chattering at
//!   the boundary.
//!
//! While an audible alert plays, guidance is ducked by
//! `alert_duck_factor` so the warning stays intelligible.

use echoguide_perception::geometry::{lateral_offset, signed_pan, Pose};
use echoguide_perception::scanner::{ObstacleSample, ScanOutcome};
use echoguide_perception::tracker::TrackingSample;
use echoguide_types::AudioControl;
use tracing::debug;

use crate::config::{GuidanceConfig, GuidanceStyle, ObstaclePanLaw};

// ────────────────────────────────────────────────────────────────────────────
// Laws
// ────────────────────────────────────────────────────────────────────────────

/// Distance-only guidance volume.
pub fn guidance_base_volume(distance: f32, cfg: &GuidanceConfig) -> f32 {
    if distance.is_nan() {
        return cfg.far_volume;
    }
    if distance <= cfg.near_distance {
        1.0
    } else if distance >= cfg.far_distance {
        cfg.far_volume
    } else {
        let t = (distance - cfg.near_distance) / (cfg.far_distance - cfg.near_distance);
        1.0 - t * (1.0 - cfg.far_volume)
    }
}

/// `cos(bearing / 2)`: 1 dead ahead, 0 directly behind.
pub fn angle_attenuation(bearing: f32) -> f32 {
    let b = if bearing.is_finite() {
        bearing.clamp(0.0, std::f32::consts::PI)
    } else {
        0.0
    };
    (b * 0.5).cos().max(0.0)
}

/// Full guidance volume: base volume scaled by the floored attenuation.
pub fn guidance_volume(distance: f32, bearing: f32, cfg: &GuidanceConfig) -> f32 {
    guidance_base_volume(distance, cfg) * angle_attenuation(bearing).max(cfg.attenuation_floor)
}

/// Beep interval for [`GuidanceStyle::Beep`]: shortest at `near_distance`,
/// longest at `far_distance`.
pub fn beep_interval_ms(distance: f32, cfg: &GuidanceConfig) -> u32 {
    let span = cfg.far_distance - cfg.near_distance;
    let t = if distance.is_finite() && span > 0.0 {
        ((distance - cfg.near_distance) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let near = cfg.beep_near_interval_ms as f32;
    let far = cfg.beep_far_interval_ms as f32;
    (near + t * (far - near)).round() as u32
}

/// `1 - d / safe` inside the safe zone, otherwise silent.
pub fn raw_alert_volume(distance: f32, safe_zone: f32) -> f32 {
    if !distance.is_finite() || distance >= safe_zone || safe_zone <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / safe_zone).clamp(0.0, 1.0)
}

/// Volumes strictly between 0 and `min_audible` become 0.
pub fn snap_inaudible(volume: f32, min_audible: f32) -> f32 {
    if volume > 0.0 && volume < min_audible {
        0.0
    } else {
        volume
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Channels
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GuidanceChannel {
    pub volume: f32,
    pub pan: f32,
    pub beep_interval_ms: Option<u32>,
}

impl GuidanceChannel {
    pub fn silent() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlertChannel {
    pub active: bool,
    pub volume: f32,
    pub pan: f32,
}

impl AlertChannel {
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Active and loud enough to hear.
    pub fn is_audible(&self) -> bool {
        self.active && self.volume > 0.0
    }
}

/// Enter below the safe zone, leave only once strictly beyond it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertHysteresis {
    active: bool,
}

impl AlertHysteresis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed the nearest obstacle distance (`None` = clear).  Returns the
    /// new state.
    pub fn update(&mut self, nearest: Option<f32>, safe_zone: f32) -> bool {
        self.active = match nearest {
            None => false,
            Some(d) if self.active => d <= safe_zone,
            Some(d) => d < safe_zone,
        };
        self.active
    }

    pub fn reset(&mut self) {
        self.active = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FeedbackMapper
// ────────────────────────────────────────────────────────────────────────────

/// Stateful mapper owning the alert hysteresis and the last alert output.
#[derive(Debug, Clone)]
pub struct FeedbackMapper {
    config: GuidanceConfig,
    hysteresis: AlertHysteresis,
    alert: AlertChannel,
}

impl FeedbackMapper {
    pub fn new(config: GuidanceConfig) -> Self {
        Self {
            config,
            hysteresis: AlertHysteresis::new(),
            alert: AlertChannel::inactive(),
        }
    }

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }

    /// Last alert channel produced by [`observe_scan`](Self::observe_scan).
    pub fn alert(&self) -> AlertChannel {
        self.alert
    }

    /// Guidance parameters for one pose tick.  No sample means silence.
    pub fn guidance(&self, sample: Option<&TrackingSample>) -> GuidanceChannel {
        let Some(s) = sample else {
            return GuidanceChannel::silent();
        };
        let beep = match self.config.guidance_style {
            GuidanceStyle::Tone => None,
            GuidanceStyle::Beep => Some(beep_interval_ms(s.distance, &self.config)),
        };
        GuidanceChannel {
            volume: guidance_volume(s.distance, s.bearing, &self.config),
            pan: s.pan.clamp(-1.0, 1.0),
            beep_interval_ms: beep,
        }
    }

    /// Update the alert from one scan.  [`ScanOutcome::Skipped`] leaves the
    /// alert exactly as it was.  `pose` is the pose the scan was taken
    /// from; it is only used for panning.
    pub fn observe_scan(&mut self, outcome: &ScanOutcome, pose: Option<&Pose>) -> AlertChannel {
        if !self.config.alert_enabled {
            self.hysteresis.reset();
            self.alert = AlertChannel::inactive();
            return self.alert;
        }
        match outcome {
            ScanOutcome::Skipped => return self.alert,
            ScanOutcome::Clear => {
                self.hysteresis.update(None, self.config.safe_zone_distance);
                self.alert = AlertChannel::inactive();
            }
            ScanOutcome::Obstacle(sample) => {
                let active = self
                    .hysteresis
                    .update(Some(sample.distance), self.config.safe_zone_distance);
                self.alert = if active {
                    AlertChannel {
                        active,
                        volume: snap_inaudible(
                            raw_alert_volume(sample.distance, self.config.safe_zone_distance),
                            self.config.min_audible_volume,
                        ),
                        pan: self.obstacle_pan(sample, pose),
                    }
                } else {
                    AlertChannel::inactive()
                };
            }
        }
        debug!(
            active = self.alert.active,
            volume = self.alert.volume,
            pan = self.alert.pan,
            "alert updated"
        );
        self.alert
    }

    /// Assemble the frame sent to the sink, ducking guidance under an
    /// audible alert.
    pub fn compose(&self, guidance: GuidanceChannel) -> AudioControl {
        let duck = if self.alert.is_audible() {
            self.config.alert_duck_factor
        } else {
            1.0
        };
        AudioControl {
            continuous_volume: guidance.volume * duck,
            continuous_pan: guidance.pan,
            alert_volume: if self.alert.active { self.alert.volume } else { 0.0 },
            alert_pan: if self.alert.active { self.alert.pan } else { 0.0 },
            alert_active: self.alert.active,
            beep_interval_ms: guidance.beep_interval_ms,
        }
    }

    /// Forget the alert state.
    pub fn reset(&mut self) {
        self.hysteresis.reset();
        self.alert = AlertChannel::inactive();
    }

    fn obstacle_pan(&self, sample: &ObstacleSample, pose: Option<&Pose>) -> f32 {
        let Some(pose) = pose else {
            return 0.0;
        };
        let pan = match self.config.obstacle_pan_law {
            ObstaclePanLaw::Lateral => lateral_offset(pose, sample.direction),
            ObstaclePanLaw::Bearing => match (pose.heading(), pose.right()) {
                (Some(forward), Some(right)) => signed_pan(forward, right, sample.direction),
                _ => 0.0,
            },
        };
        if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 }
    }
}
