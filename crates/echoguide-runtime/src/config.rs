//! Tuning parameters for the guidance engine.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```toml
//! safe_zone_distance = 1.2
//! guidance_style = "beep"
//! ```

use std::time::Duration;

use echoguide_perception::scanner::{default_probes, DirectionProbe};
use echoguide_types::GuideError;
use serde::{Deserialize, Serialize};

/// How the guidance channel sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidanceStyle {
    /// Continuous tone; only volume and pan change.
    #[default]
    Tone,
    /// Beeps whose interval shortens as the target gets closer.
    Beep,
}

/// Pan law used for the obstacle alert.
///
/// Guidance always pans by the sine of the bearing.  Obstacle alerts default
/// to a plain left/right bias; both are kept selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObstaclePanLaw {
    /// x-component of the obstacle's horizontal direction in observer space.
    #[default]
    Lateral,
    /// Same signed sine-of-bearing law as target guidance.
    Bearing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Obstacles closer than this raise the alert (metres).
    pub safe_zone_distance: f32,
    /// Alert volumes strictly between 0 and this snap to 0.
    pub min_audible_volume: f32,
    /// At or inside this distance the guidance tone is at full volume.
    pub near_distance: f32,
    /// At or beyond this distance the guidance tone sits at `far_volume`.
    pub far_distance: f32,
    pub far_volume: f32,
    /// Lower bound of the directional attenuation factor.
    pub attenuation_floor: f32,
    /// Guidance volume multiplier while an audible alert plays.
    pub alert_duck_factor: f32,
    pub alert_enabled: bool,
    pub guidance_style: GuidanceStyle,
    pub beep_near_interval_ms: u32,
    pub beep_far_interval_ms: u32,
    pub obstacle_pan_law: ObstaclePanLaw,
    pub scan_interval_ms: u64,
    pub pose_interval_ms: u64,
    /// Range queries beyond this are discarded.  Defaults to twice the safe
    /// zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sensing_range: Option<f32>,
    /// Detections below this confidence never match.
    pub min_confidence: f32,
    pub probes: Vec<DirectionProbe>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            safe_zone_distance: 0.9,
            min_audible_volume: 0.1,
            near_distance: 0.5,
            far_distance: 6.0,
            far_volume: 0.1,
            attenuation_floor: 0.1,
            alert_duck_factor: 0.6,
            alert_enabled: true,
            guidance_style: GuidanceStyle::Tone,
            beep_near_interval_ms: 150,
            beep_far_interval_ms: 1200,
            obstacle_pan_law: ObstaclePanLaw::Lateral,
            scan_interval_ms: 1000,
            pose_interval_ms: 16,
            max_sensing_range: None,
            min_confidence: 0.0,
            probes: default_probes(),
        }
    }
}

impl GuidanceConfig {
    pub fn sensing_range(&self) -> f32 {
        self.max_sensing_range
            .unwrap_or(self.safe_zone_distance * 2.0)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn pose_interval(&self) -> Duration {
        Duration::from_millis(self.pose_interval_ms)
    }

    /// Reject values the feedback laws cannot work with.
    ///
    /// # Errors
    ///
    /// [`GuideError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), GuideError> {
        let unit = 0.0..=1.0;
        let checks: [(bool, &str); 13] = [
            (self.safe_zone_distance > 0.0, "safe_zone_distance must be > 0"),
            (unit.contains(&self.min_audible_volume), "min_audible_volume must be in [0, 1]"),
            (self.near_distance >= 0.0, "near_distance must be >= 0"),
            (self.far_distance > self.near_distance, "far_distance must exceed near_distance"),
            (unit.contains(&self.far_volume), "far_volume must be in [0, 1]"),
            (unit.contains(&self.attenuation_floor), "attenuation_floor must be in [0, 1]"),
            (
                self.alert_duck_factor > 0.0 && self.alert_duck_factor <= 1.0,
                "alert_duck_factor must be in (0, 1]",
            ),
            (self.scan_interval_ms > 0, "scan_interval_ms must be > 0"),
            (self.pose_interval_ms > 0, "pose_interval_ms must be > 0"),
            (self.sensing_range() > 0.0, "max_sensing_range must be > 0"),
            (
                self.sensing_range() >= self.safe_zone_distance,
                "max_sensing_range must be >= safe_zone_distance",
            ),
            (unit.contains(&self.min_confidence), "min_confidence must be in [0, 1]"),
            (
                !self.alert_enabled || !self.probes.is_empty(),
                "probes must not be empty while alerts are enabled",
            ),
        ];
        if let Some((_, msg)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(GuideError::Config((*msg).to_string()));
        }
        // A zero or non-finite probe would silently scan straight ahead.
        match self.probes.iter().find(|p| p.direction.normalized().is_none()) {
            Some(p) => Err(GuideError::Config(format!(
                "probe '{}' has no usable direction",
                p.name
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguide_perception::geometry::Vec3;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = GuidanceConfig::default();
        assert_eq!(cfg.safe_zone_distance, 0.9);
        assert_eq!(cfg.min_audible_volume, 0.1);
        assert_eq!(cfg.near_distance, 0.5);
        assert_eq!(cfg.far_distance, 6.0);
        assert!((cfg.sensing_range() - 1.8).abs() < 1e-6);
        assert_eq!(cfg.guidance_style, GuidanceStyle::Tone);
        assert_eq!(cfg.obstacle_pan_law, ObstaclePanLaw::Lateral);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: GuidanceConfig = toml::from_str(
            r#"
            safe_zone_distance = 1.2
            guidance_style = "beep"
            obstacle_pan_law = "bearing"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.safe_zone_distance, 1.2);
        assert_eq!(cfg.guidance_style, GuidanceStyle::Beep);
        assert_eq!(cfg.obstacle_pan_law, ObstaclePanLaw::Bearing);
        assert_eq!(cfg.far_distance, 6.0);
        assert_eq!(cfg.probes.len(), default_probes().len());
    }

    #[test]
    fn explicit_sensing_range_overrides_default() {
        let cfg = GuidanceConfig {
            max_sensing_range: Some(4.0),
            ..Default::default()
        };
        assert_eq!(cfg.sensing_range(), 4.0);
    }

    #[test]
    fn validate_rejects_inverted_distance_bounds() {
        let cfg = GuidanceConfig {
            near_distance: 3.0,
            far_distance: 2.0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("far_distance"));
    }

    #[test]
    fn validate_rejects_zero_safe_zone() {
        let cfg = GuidanceConfig {
            safe_zone_distance: 0.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(GuideError::Config(_))));
    }

    #[test]
    fn validate_rejects_sensing_range_inside_safe_zone() {
        let cfg = GuidanceConfig {
            max_sensing_range: Some(0.5),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_sensing_range must be >= safe_zone_distance"));

        let edge = GuidanceConfig {
            max_sensing_range: Some(0.9),
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_probe() {
        for direction in [Vec3::zero(), Vec3::new(f32::NAN, 0.0, -1.0)] {
            let mut cfg = GuidanceConfig::default();
            cfg.probes.push(DirectionProbe::new("broken", direction));
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("broken"), "{err}");
        }
    }

    #[test]
    fn empty_probes_allowed_only_without_alerts() {
        let mut cfg = GuidanceConfig {
            probes: Vec::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.alert_enabled = false;
        assert!(cfg.validate().is_ok());
    }
}
