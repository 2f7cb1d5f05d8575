//! Guidance lifecycle.
//!
//! | From        | Event                         | To          |
//! |-------------|-------------------------------|-------------|
//! | `Idle`      | [`begin_search`]              | `Searching` |
//! | `Searching` | matching detection + position | `Guiding`   |
//! | any         | [`reset`]                     | `Idle` (via `Resetting`) |
//!
//! Acquisition is split in two so the caller can run the position query
//! without holding the machine: [`on_detection`] reports a match together
//! with the current session number, and [`complete_acquisition`] only takes
//! effect if that session is still the current one.  Every reset bumps the
//! session, so a query that resolves after a reset is dropped.
//!
//! The obstacle-alert flag is an overlay, only ever set while a session is
//! active (`Searching` or `Guiding`).
//!
//! [`begin_search`]: GuidanceMachine::begin_search
//! [`reset`]: GuidanceMachine::reset
//! [`on_detection`]: GuidanceMachine::on_detection
//! [`complete_acquisition`]: GuidanceMachine::complete_acquisition

use echoguide_perception::geometry::{Pose, Vec3};
use echoguide_perception::tracker::{TargetAnchor, TargetTracker, TrackingSample};
use echoguide_types::{Detection, GuidanceState, GuideError, ViewportPoint};
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: GuidanceState,
    pub to: GuidanceState,
}

impl Transition {
    fn new(from: GuidanceState, to: GuidanceState) -> Self {
        Self { from, to }
    }
}

/// What a classifier detection means for the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Not searching; detections are dropped.
    Ignored,
    /// Searching, but the label differs or confidence is too low.
    Mismatch,
    /// Matches the requested label.  Resolve `point` to a world position and
    /// hand it to [`GuidanceMachine::complete_acquisition`] with `session`.
    Matched {
        session: u64,
        label: String,
        point: ViewportPoint,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOutcome {
    Acquired {
        transition: Transition,
        anchor: TargetAnchor,
    },
    /// The position query came back empty; keep searching.
    Retry,
    /// The session ended (or the machine left `Searching`) while the query
    /// was in flight.
    Stale,
}

// ─────────────────────────────────────────────────────────────────────────────
// GuidanceMachine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct GuidanceMachine {
    state: GuidanceState,
    target_label: Option<String>,
    session: u64,
    tracker: TargetTracker,
    alert_active: bool,
    min_confidence: f32,
}

impl GuidanceMachine {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            min_confidence,
            ..Self::default()
        }
    }

    pub fn state(&self) -> GuidanceState {
        self.state
    }

    pub fn target_label(&self) -> Option<&str> {
        self.target_label.as_deref()
    }

    /// Current search session.  Changes on every `begin_search` and `reset`.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn anchor(&self) -> Option<&TargetAnchor> {
        self.tracker.anchor()
    }

    pub fn alert_active(&self) -> bool {
        self.alert_active
    }

    /// Start looking for `label`.  A search or guidance session already in
    /// progress is reset first.
    ///
    /// # Errors
    ///
    /// [`GuideError::InvalidLabel`] for an empty or whitespace-only label;
    /// the machine is left untouched.
    pub fn begin_search(&mut self, label: &str) -> Result<Vec<Transition>, GuideError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GuideError::InvalidLabel(label.to_string()));
        }

        let mut transitions = self.reset();
        self.session = self.session.wrapping_add(1);
        self.target_label = Some(label.to_string());
        transitions.push(self.enter(GuidanceState::Searching));
        info!(label, session = self.session, "search started");
        Ok(transitions)
    }

    /// Classify a detection against the current search.
    pub fn on_detection(&self, detection: &Detection) -> DetectionOutcome {
        if self.state != GuidanceState::Searching {
            return DetectionOutcome::Ignored;
        }
        let Some(label) = self.target_label.as_deref() else {
            return DetectionOutcome::Ignored;
        };
        if !detection.matches(label) || detection.confidence < self.min_confidence {
            return DetectionOutcome::Mismatch;
        }
        DetectionOutcome::Matched {
            session: self.session,
            label: label.to_string(),
            point: detection.bounding_box.center(),
        }
    }

    /// Finish an acquisition started by a [`DetectionOutcome::Matched`].
    ///
    /// # Errors
    ///
    /// Propagates [`TargetTracker::acquire`] failures (an anchor already held
    /// or a non-finite position); the machine stays in `Searching`.
    pub fn complete_acquisition(
        &mut self,
        session: u64,
        position: Option<Vec3>,
    ) -> Result<AcquisitionOutcome, GuideError> {
        if session != self.session || self.state != GuidanceState::Searching {
            debug!(session, current = self.session, "stale acquisition dropped");
            return Ok(AcquisitionOutcome::Stale);
        }
        let Some(position) = position else {
            return Ok(AcquisitionOutcome::Retry);
        };
        let label = self.target_label.clone().unwrap_or_default();
        let anchor = self.tracker.acquire(session, label, position)?.clone();
        let transition = self.enter(GuidanceState::Guiding);
        Ok(AcquisitionOutcome::Acquired { transition, anchor })
    }

    /// Measure the anchor from `pose`.  Only produces a sample while
    /// guiding, and only for an anchor taken in the current session.
    pub fn track<P>(&self, pose: &Pose, project: P) -> Option<TrackingSample>
    where
        P: FnOnce(&Pose, Vec3) -> Option<ViewportPoint>,
    {
        if self.state != GuidanceState::Guiding || !self.tracker.is_live(self.session) {
            return None;
        }
        self.tracker.update(pose, project)
    }

    /// Set the alert overlay.  Outside an active session the flag is forced
    /// off.  Returns `true` if the flag changed.
    pub fn set_alert(&mut self, active: bool) -> bool {
        let active = active && self.state.is_session_active();
        let changed = self.alert_active != active;
        self.alert_active = active;
        changed
    }

    /// Abort whatever is going on and return to `Idle`.  Idempotent: from
    /// `Idle` no transitions are reported, but the session still advances so
    /// nothing in flight can land.
    pub fn reset(&mut self) -> Vec<Transition> {
        self.session = self.session.wrapping_add(1);
        self.tracker.release();
        self.alert_active = false;
        self.target_label = None;

        if self.state == GuidanceState::Idle {
            return Vec::new();
        }
        let first = self.enter(GuidanceState::Resetting);
        let second = self.enter(GuidanceState::Idle);
        vec![first, second]
    }

    fn enter(&mut self, to: GuidanceState) -> Transition {
        let t = Transition::new(self.state, to);
        debug!(from = %t.from, to = %t.to, "state transition");
        self.state = to;
        t
    }
}
