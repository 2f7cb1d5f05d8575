//! Geometry utilities.
//!
//! Vector and rotation primitives plus the bearing / pan laws that turn a
//! world-space target direction into an audio pan value.  Nothing in here
//! holds state.
//!
//! Observer-local axes follow the camera convention: `+X` right, `+Y` up,
//! `-Z` forward.  The world is Y-up; "horizontal" always means projected
//! onto the `y = 0` plane.
//!
//! # Example
//!
//! ```rust
//! use echoguide_perception::geometry::{Pose, Vec3};
//!
//! // Observer at the origin looking down -Z, target 3 m straight ahead.
//! let pose = Pose::new(Vec3::zero(), Vec3::new(0.0, 0.0, -1.0), Vec3::UP);
//! let target = Vec3::new(0.0, 0.0, -3.0);
//!
//! assert!((pose.distance_to(target) - 3.0).abs() < 1e-5);
//! assert!(pose.bearing_to(target).abs() < 1e-5);
//! assert!(pose.pan_to(target).abs() < 1e-5);
//! ```

use serde::{Deserialize, Serialize};

/// Lengths below this are treated as degenerate.
const EPSILON: f32 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector in metres (positions) or unitless (directions).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// World up axis.
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len < EPSILON || !len.is_finite() {
            None
        } else {
            Some(self.scale(1.0 / len))
        }
    }

    /// Projection onto the horizontal plane (`y = 0`).
    pub fn horizontal(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` around `axis` (right-handed).  A zero axis
    /// yields the identity.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f32) -> Self {
        match axis.normalized() {
            Some(a) => {
                let (s, c) = (angle_rad * 0.5).sin_cos();
                Self::new(c, a.x * s, a.y * s, a.z * s)
            }
            None => Self::identity(),
        }
    }

    /// Rotation about world up.  Positive `yaw_rad` turns a `-Z` heading
    /// toward `+X` (clockwise seen from above).
    pub fn from_yaw(yaw_rad: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, -yaw_rad)
    }

    /// Rotate a vector.  Uses `v + w·t + u×t` with `t = 2·u×v`, which equals
    /// `q·v·q⁻¹` for a unit quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scale(2.0);
        v.add(t.scale(self.w)).add(u.cross(t))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

/// Observer pose for one tick: position plus unit forward and up vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Pose {
    /// Build a pose, normalising `forward` and `up`.
    ///
    /// A zero `forward` falls back to `-Z` and a zero `up` to world up.
    pub fn new(position: Vec3, forward: Vec3, up: Vec3) -> Self {
        Self {
            position,
            forward: forward.normalized().unwrap_or(Vec3::new(0.0, 0.0, -1.0)),
            up: up.normalized().unwrap_or(Vec3::UP),
        }
    }

    /// Build a pose from a device orientation.  Forward is the rotated local
    /// `-Z` axis, up the rotated local `+Y` axis.
    pub fn from_orientation(position: Vec3, rotation: Quaternion) -> Self {
        Self::new(
            position,
            rotation.rotate(Vec3::new(0.0, 0.0, -1.0)),
            rotation.rotate(Vec3::UP),
        )
    }

    /// Horizontal unit heading of the observer.
    ///
    /// When the device points straight up or down the forward vector has no
    /// horizontal component; the top edge of the device (`up`) is used
    /// instead.  `None` only if both are vertical.
    pub fn heading(&self) -> Option<Vec3> {
        self.forward
            .horizontal()
            .normalized()
            .or_else(|| self.up.horizontal().normalized())
    }

    /// Horizontal unit vector pointing to the observer's right:
    /// `normalize(cross(heading, world_up))`.
    pub fn right(&self) -> Option<Vec3> {
        self.heading().and_then(|h| h.cross(Vec3::UP).normalized())
    }

    /// Device right and up axes, orthonormal to `forward`.
    pub fn camera_basis(&self) -> (Vec3, Vec3) {
        let right = self
            .forward
            .cross(self.up)
            .normalized()
            .or_else(|| self.right())
            .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
        (right, right.cross(self.forward))
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        distance(self.position, point)
    }

    /// Bearing in `[0, π]` from the observer's heading to `point`.
    pub fn bearing_to(&self, point: Vec3) -> f32 {
        match self.heading() {
            Some(h) => bearing_angle(h, point.sub(self.position)),
            None => 0.0,
        }
    }

    /// Signed pan in `[-1, 1]` toward `point`.
    pub fn pan_to(&self, point: Vec3) -> f32 {
        match (self.heading(), self.right()) {
            (Some(h), Some(r)) => signed_pan(h, r, point.sub(self.position)),
            _ => 0.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Free functions
// ────────────────────────────────────────────────────────────────────────────

pub fn distance(a: Vec3, b: Vec3) -> f32 {
    a.sub(b).length()
}

/// Angle in `[0, π]` between the horizontal projections of `forward` and
/// `to_target`.  Vertical offset never affects the result.  Degenerate
/// inputs (target straight above/below) yield `0`.
pub fn bearing_angle(forward: Vec3, to_target: Vec3) -> f32 {
    let (Some(f), Some(t)) = (
        forward.horizontal().normalized(),
        to_target.horizontal().normalized(),
    ) else {
        return 0.0;
    };
    // Clamp: float drift can push |dot| slightly past 1 and acos would NaN.
    f.dot(t).clamp(-1.0, 1.0).acos()
}

/// `sign(dot(right, to_target_h)) * sin(bearing)`: -1 hard left, 0 centred,
/// +1 hard right.
pub fn signed_pan(forward: Vec3, right: Vec3, to_target: Vec3) -> f32 {
    let side = right.dot(to_target.horizontal());
    let sign = if side > EPSILON {
        1.0
    } else if side < -EPSILON {
        -1.0
    } else {
        0.0
    };
    (sign * bearing_angle(forward, to_target).sin()).clamp(-1.0, 1.0)
}

/// Rotate an observer-local direction into world space (no translation) and
/// re-normalise.
pub fn world_direction(local: Vec3, pose: &Pose) -> Vec3 {
    let (right, up) = pose.camera_basis();
    let world = right
        .scale(local.x)
        .add(up.scale(local.y))
        .add(pose.forward.scale(-local.z));
    world.normalized().unwrap_or(pose.forward)
}

/// Left/right bias of a world direction as seen by the observer: the
/// x-component of its horizontal unit direction in observer space.
/// Straight-down directions give `0`.
pub fn lateral_offset(pose: &Pose, world_dir: Vec3) -> f32 {
    match (world_dir.horizontal().normalized(), pose.right()) {
        (Some(h), Some(r)) => h.dot(r).clamp(-1.0, 1.0),
        _ => 0.0,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
