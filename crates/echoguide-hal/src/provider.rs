//! Sensor-side collaborator traits: pose, range and classifier providers.
//!
//! The guidance core never owns sensing hardware.  An AR session, a depth
//! camera or the [`sim`][crate::sim] world implements these traits and the
//! runtime polls them on its own cadences.  Every call is async so that a
//! slow query never stalls the pose tick.

use async_trait::async_trait;
use echoguide_perception::geometry::{Pose, Vec3};
use echoguide_types::{Detection, ViewportPoint};

/// Source of the observer's pose.
#[async_trait]
pub trait PoseProvider: Send + Sync {
    /// The latest pose, or `None` when tracking has no current frame.
    async fn current_pose(&self) -> Option<Pose>;
}

/// Distance-to-surface queries from the observer's position.
///
/// `query` cannot tell "nothing there" from "no depth frame", so the engine
/// asks [`depth_available`](RangeProvider::depth_available) first.  A scan
/// without depth is skipped and never reads as a clear path.
#[async_trait]
pub trait RangeProvider: Send + Sync {
    /// Whether a depth frame is current.  Providers that never drop frames
    /// can keep the default.
    async fn depth_available(&self) -> bool {
        true
    }

    /// Distance along the world-space `direction` ray, or `None` if nothing
    /// was hit or the sensor has no data.
    async fn query(&self, direction: Vec3) -> Option<f32>;

    /// World position of the surface under a viewport point (used to anchor a
    /// detection), or `None` when no depth is available there.
    async fn query_at(&self, point: ViewportPoint) -> Option<Vec3>;
}

/// Object classifier over camera frames.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Process the next camera frame and return its detections.  One
    /// completion per submitted frame; an empty list is a normal result.
    async fn next_frame(&self) -> Vec<Detection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguide_types::BoundingBox;

    struct FixedPose(Option<Pose>);

    #[async_trait]
    impl PoseProvider for FixedPose {
        async fn current_pose(&self) -> Option<Pose> {
            self.0
        }
    }

    struct Wall {
        distance: f32,
    }

    #[async_trait]
    impl RangeProvider for Wall {
        async fn query(&self, direction: Vec3) -> Option<f32> {
            // Wall only in front (-Z).
            (direction.z < 0.0).then_some(self.distance / -direction.z)
        }

        async fn query_at(&self, _point: ViewportPoint) -> Option<Vec3> {
            Some(Vec3::new(0.0, 0.0, -self.distance))
        }
    }

    struct OneShot;

    #[async_trait]
    impl Classifier for OneShot {
        async fn next_frame(&self) -> Vec<Detection> {
            vec![Detection {
                label: "cup".to_string(),
                bounding_box: BoundingBox::new(0.4, 0.4, 0.2, 0.2),
                confidence: 0.8,
            }]
        }
    }

    #[tokio::test]
    async fn providers_are_object_safe() {
        let pose: Box<dyn PoseProvider> = Box::new(FixedPose(None));
        assert!(pose.current_pose().await.is_none());

        let range: Box<dyn RangeProvider> = Box::new(Wall { distance: 2.0 });
        assert!(range.depth_available().await);
        let d = range.query(Vec3::new(0.0, 0.0, -1.0)).await.unwrap();
        assert!((d - 2.0).abs() < 1e-6);
        assert!(range.query(Vec3::new(0.0, 0.0, 1.0)).await.is_none());
        assert!(range.query_at(ViewportPoint::new(0.5, 0.5)).await.is_some());

        let classifier: Box<dyn Classifier> = Box::new(OneShot);
        assert_eq!(classifier.next_frame().await.len(), 1);
    }
}
