//! World-to-viewport projection.
//!
//! The target tracker only decides whether a projected point is inside the
//! viewport; producing that point is the projector's job.
//! [`PinholeProjector`] is a plain perspective camera aligned with the
//! observer's pose, good enough for simulation and for devices that do not
//! expose their own projection.

use echoguide_perception::geometry::{world_direction, Pose, Vec3};
use echoguide_types::ViewportPoint;

/// Points closer than this along the view axis are not projected.
const NEAR_PLANE: f32 = 1e-3;

/// Maps world points to normalised viewport coordinates.
pub trait Projector: Send + Sync {
    /// `None` when the point is behind the camera.  Points outside the view
    /// frustum still project, to coordinates outside `[0, 1]`.
    fn project(&self, pose: &Pose, point: Vec3) -> Option<ViewportPoint>;
}

/// Symmetric perspective camera looking along the pose's forward vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeProjector {
    /// Vertical field of view (radians).
    pub vertical_fov_rad: f32,
    /// Viewport width / height.
    pub aspect: f32,
}

impl Default for PinholeProjector {
    /// Portrait phone camera: 60° vertical FOV, 9:16 viewport.
    fn default() -> Self {
        Self::new(60f32.to_radians(), 9.0 / 16.0)
    }
}

impl PinholeProjector {
    pub fn new(vertical_fov_rad: f32, aspect: f32) -> Self {
        Self {
            vertical_fov_rad,
            aspect,
        }
    }

    fn half_extents(&self) -> (f32, f32) {
        let tan_v = (self.vertical_fov_rad * 0.5).tan();
        (tan_v * self.aspect, tan_v)
    }

    /// World-space unit ray through a viewport point.
    pub fn unproject(&self, pose: &Pose, point: ViewportPoint) -> Vec3 {
        let (tan_h, tan_v) = self.half_extents();
        let ndc_x = point.x * 2.0 - 1.0;
        let ndc_y = 1.0 - point.y * 2.0;
        world_direction(Vec3::new(ndc_x * tan_h, ndc_y * tan_v, -1.0), pose)
    }
}

impl Projector for PinholeProjector {
    fn project(&self, pose: &Pose, point: Vec3) -> Option<ViewportPoint> {
        let d = point.sub(pose.position);
        let depth = d.dot(pose.forward);
        if depth < NEAR_PLANE {
            return None;
        }
        let (right, up) = pose.camera_basis();
        let (tan_h, tan_v) = self.half_extents();
        let ndc_x = d.dot(right) / (depth * tan_h);
        let ndc_y = d.dot(up) / (depth * tan_v);
        Some(ViewportPoint::new((ndc_x + 1.0) * 0.5, (1.0 - ndc_y) * 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguide_perception::geometry::distance;

    fn origin_pose() -> Pose {
        Pose::new(Vec3::zero(), Vec3::new(0.0, 0.0, -1.0), Vec3::UP)
    }

    #[test]
    fn point_straight_ahead_projects_to_centre() {
        let p = PinholeProjector::default()
            .project(&origin_pose(), Vec3::new(0.0, 0.0, -4.0))
            .unwrap();
        assert!((p.x - 0.5).abs() < 1e-5);
        assert!((p.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn point_behind_does_not_project() {
        let proj = PinholeProjector::default();
        assert!(proj.project(&origin_pose(), Vec3::new(0.0, 0.0, 2.0)).is_none());
    }

    #[test]
    fn right_and_up_map_to_viewport_axes() {
        let proj = PinholeProjector::default();
        let right = proj.project(&origin_pose(), Vec3::new(0.2, 0.0, -2.0)).unwrap();
        assert!(right.x > 0.5);
        let up = proj.project(&origin_pose(), Vec3::new(0.0, 0.3, -2.0)).unwrap();
        assert!(up.y < 0.5, "viewport y grows downward");
    }

    #[test]
    fn frustum_edge_projects_to_viewport_edge() {
        let proj = PinholeProjector::new(90f32.to_radians(), 1.0);
        // 45° to the right at 90° FOV sits exactly on the right edge.
        let p = proj.project(&origin_pose(), Vec3::new(3.0, 0.0, -3.0)).unwrap();
        assert!((p.x - 1.0).abs() < 1e-5, "x={}", p.x);
    }

    #[test]
    fn unproject_inverts_project() {
        let proj = PinholeProjector::default();
        let pose = origin_pose();
        let world = Vec3::new(0.4, -0.3, -2.5);
        let vp = proj.project(&pose, world).unwrap();
        let ray = proj.unproject(&pose, vp);
        let expected = world.normalized().unwrap();
        assert!(distance(ray, expected) < 1e-4, "{ray:?} vs {expected:?}");
    }
}
