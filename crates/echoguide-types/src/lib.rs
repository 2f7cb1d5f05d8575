//! `echoguide-types` – shared vocabulary of the guidance stack.
//!
//! Everything that crosses a crate boundary or leaves the process (bus
//! events, audio frames, classifier results) lives here so that the
//! perception, runtime and CLI layers agree on one serialisable shape.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Guidance lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Primary state of the guidance state machine.
///
/// The obstacle-alert overlay is tracked separately and may be raised while
/// the machine is in [`GuidanceState::Searching`] or
/// [`GuidanceState::Guiding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceState {
    /// No search requested; both audio channels silent.
    #[default]
    Idle,
    /// Waiting for the classifier to report the requested label.
    Searching,
    /// Anchor acquired; the continuous channel steers toward it.
    Guiding,
    /// Transient state while a reset tears down the current session.
    Resetting,
}

impl GuidanceState {
    /// True for the states in which the obstacle overlay is evaluated.
    pub fn is_session_active(self) -> bool {
        matches!(self, GuidanceState::Searching | GuidanceState::Guiding)
    }
}

impl fmt::Display for GuidanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuidanceState::Idle => "idle",
            GuidanceState::Searching => "searching",
            GuidanceState::Guiding => "guiding",
            GuidanceState::Resetting => "resetting",
        };
        f.write_str(name)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Audio output
// ────────────────────────────────────────────────────────────────────────────

/// The complete set of audio parameters produced by one engine tick.
///
/// Always replaced as a whole value; observers never see a half-written
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioControl {
    /// Guidance channel volume in `[0, 1]`.
    pub continuous_volume: f32,
    /// Guidance channel pan in `[-1, 1]` (-1 hard left, +1 hard right).
    pub continuous_pan: f32,
    /// Obstacle alert volume in `[0, 1]`.
    pub alert_volume: f32,
    /// Obstacle alert pan in `[-1, 1]`.
    pub alert_pan: f32,
    /// Whether the obstacle alert overlay is currently raised.
    pub alert_active: bool,
    /// Beep cadence for the beep guidance style; `None` for a continuous tone.
    pub beep_interval_ms: Option<u32>,
}

impl AudioControl {
    /// Both channels silent.
    pub fn silent() -> Self {
        Self::default()
    }

    /// True when neither channel produces sound.
    pub fn is_silent(&self) -> bool {
        self.continuous_volume == 0.0 && self.alert_volume == 0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Classifier input
// ────────────────────────────────────────────────────────────────────────────

/// A point in normalised viewport coordinates: `(0, 0)` is the top-left
/// corner, `(1, 1)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportPoint {
    pub x: f32,
    pub y: f32,
}

impl ViewportPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned detection box in normalised viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre of the box; the point used for anchor range queries.
    pub fn center(&self) -> ViewportPoint {
        ViewportPoint::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }
}

/// One classifier result for a processed camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    /// True when this detection names `requested` (case-insensitive, ignoring
    /// surrounding whitespace).
    pub fn matches(&self, requested: &str) -> bool {
        self.label.trim().eq_ignore_ascii_case(requested.trim())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event envelope
// ────────────────────────────────────────────────────────────────────────────

/// Live target measurements, as published for UI observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub distance: f32,
    pub pan: f32,
    pub on_screen: bool,
}

/// Unified event wrapper for the guidance bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"echoguide-runtime::engine"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the guidance bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    StateChanged {
        from: GuidanceState,
        to: GuidanceState,
    },
    TargetAcquired {
        label: String,
        distance: f32,
    },
    ObstacleAlert {
        active: bool,
        distance: Option<f32>,
    },
    Audio(AudioControl),
    Tracking(TrackingSnapshot),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type. None of these are fatal: every failure path degrades
/// to "no signal this tick".
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuideError {
    #[error("no pose data available this tick")]
    NoPoseData,

    #[error("range query failed: {0}")]
    RangeQueryFailed(String),

    #[error("target '{held}' already acquired; release it before acquiring '{requested}'")]
    DuplicateAcquire { held: String, requested: String },

    #[error("invalid target label: {0:?}")]
    InvalidLabel(String),

    #[error("audio sink error: {details}")]
    AudioSink { details: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_matches_ignores_case_and_whitespace() {
        let det = Detection {
            label: " Chair".to_string(),
            bounding_box: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.9,
        };
        assert!(det.matches("chair"));
        assert!(det.matches("CHAIR "));
        assert!(!det.matches("table"));
    }

    #[test]
    fn bounding_box_center() {
        let c = BoundingBox::new(0.2, 0.4, 0.2, 0.4).center();
        assert!((c.x - 0.3).abs() < 1e-6);
        assert!((c.y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn default_audio_control_is_silent() {
        let a = AudioControl::silent();
        assert!(a.is_silent());
        assert!(!a.alert_active);
        assert!(a.beep_interval_ms.is_none());
    }

    #[test]
    fn only_searching_and_guiding_are_active_sessions() {
        assert!(!GuidanceState::Idle.is_session_active());
        assert!(GuidanceState::Searching.is_session_active());
        assert!(GuidanceState::Guiding.is_session_active());
        assert!(!GuidanceState::Resetting.is_session_active());
    }

    #[test]
    fn guidance_state_serialises_snake_case() {
        let json = serde_json::to_string(&GuidanceState::Guiding).unwrap();
        assert_eq!(json, "\"guiding\"");
    }

    #[test]
    fn state_changed_event_roundtrip() {
        let event = Event::new(
            "echoguide-runtime::engine",
            EventPayload::StateChanged {
                from: GuidanceState::Searching,
                to: GuidanceState::Guiding,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::StateChanged { from, to } => {
                assert_eq!(from, GuidanceState::Searching);
                assert_eq!(to, GuidanceState::Guiding);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn duplicate_acquire_display_names_both_labels() {
        let err = GuideError::DuplicateAcquire {
            held: "door".to_string(),
            requested: "chair".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("door"));
        assert!(msg.contains("chair"));
    }
}
