//! Target tracker.
//!
//! Owns the single [`TargetAnchor`] of the current search and turns it into
//! a live [`TrackingSample`] each pose tick.  At most one anchor is held at a
//! time; a second [`TargetTracker::acquire`] without an intervening
//! [`TargetTracker::release`] is rejected and leaves the original in place.
//!
//! # Example
//!
//! ```rust
//! use echoguide_perception::geometry::{Pose, Vec3};
//! use echoguide_perception::tracker::TargetTracker;
//!
//! let mut tracker = TargetTracker::new();
//! tracker.acquire(1, "chair", Vec3::new(0.0, 0.0, -3.0)).unwrap();
//! assert!(tracker.acquire(1, "door", Vec3::zero()).is_err());
//!
//! let pose = Pose::new(Vec3::zero(), Vec3::new(0.0, 0.0, -1.0), Vec3::UP);
//! let sample = tracker.update(&pose, |_, _| None).unwrap();
//! assert!((sample.distance - 3.0).abs() < 1e-5);
//!
//! tracker.release();
//! assert!(tracker.update(&pose, |_, _| None).is_none());
//! ```

use echoguide_types::{GuideError, TrackingSnapshot, ViewportPoint};
use tracing::{debug, info};

use crate::geometry::{Pose, Vec3};

/// A fixed world-space point marking the acquired target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAnchor {
    /// Search session that created the anchor.  Used to reject stale
    /// callbacks after a reset.
    pub session: u64,
    pub label: String,
    pub world_position: Vec3,
}

/// Live measurements toward the anchor for one pose tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSample {
    pub distance: f32,
    /// Horizontal bearing in `[0, π]`.
    pub bearing: f32,
    pub pan: f32,
    pub on_screen: bool,
}

impl TrackingSample {
    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            distance: self.distance,
            pan: self.pan,
            on_screen: self.on_screen,
        }
    }
}

/// True when a projected point lies inside the viewport, edges included.
/// `None` (behind the camera or unprojectable) is off screen.
pub fn is_on_screen(projected: Option<ViewportPoint>) -> bool {
    projected.is_some_and(|p| {
        (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y)
    })
}

/// Holder of the at-most-one live [`TargetAnchor`].
#[derive(Debug, Default)]
pub struct TargetTracker {
    anchor: Option<TargetAnchor>,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new anchor.
    ///
    /// # Errors
    ///
    /// - [`GuideError::DuplicateAcquire`] if an anchor is already held; the
    ///   existing anchor is kept.
    /// - [`GuideError::RangeQueryFailed`] if `position` is not finite.
    pub fn acquire(
        &mut self,
        session: u64,
        label: impl Into<String>,
        position: Vec3,
    ) -> Result<&TargetAnchor, GuideError> {
        let label = label.into();
        if let Some(held) = &self.anchor {
            return Err(GuideError::DuplicateAcquire {
                held: held.label.clone(),
                requested: label,
            });
        }
        if !position.is_finite() {
            return Err(GuideError::RangeQueryFailed(format!(
                "non-finite anchor position for '{label}'"
            )));
        }
        info!(label = %label, session, x = position.x, y = position.y, z = position.z, "target anchored");
        Ok(&*self.anchor.insert(TargetAnchor {
            session,
            label,
            world_position: position,
        }))
    }

    pub fn anchor(&self) -> Option<&TargetAnchor> {
        self.anchor.as_ref()
    }

    /// True when the live anchor belongs to `session`.
    pub fn is_live(&self, session: u64) -> bool {
        self.anchor.as_ref().is_some_and(|a| a.session == session)
    }

    /// Measure the anchor from `pose`.  `project` maps a world point to the
    /// viewport (the projection collaborator); only the inclusive bounds
    /// check is done here.  Returns `None` when no anchor is held.
    pub fn update<P>(&self, pose: &Pose, project: P) -> Option<TrackingSample>
    where
        P: FnOnce(&Pose, Vec3) -> Option<ViewportPoint>,
    {
        let anchor = self.anchor.as_ref()?;
        let target = anchor.world_position;
        Some(TrackingSample {
            distance: pose.distance_to(target),
            bearing: pose.bearing_to(target),
            pan: pose.pan_to(target),
            on_screen: is_on_screen(project(pose, target)),
        })
    }

    /// Drop the anchor.  Idempotent.
    pub fn release(&mut self) -> Option<TargetAnchor> {
        let released = self.anchor.take();
        if let Some(a) = &released {
            debug!(label = %a.label, session = a.session, "target anchor released");
        }
        released
    }
}
