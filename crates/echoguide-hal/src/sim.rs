//! In-process simulation drivers for headless runs and tests.
//!
//! [`SimWorld`] is a tiny ray-traced scene (sphere obstacles, labelled
//! sphere objects and an optional floor plane) with a settable observer
//! pose.  It implements [`PoseProvider`] and [`RangeProvider`], so the full
//! guidance stack runs without an AR session.  [`SimClassifier`] reports
//! every labelled object whose centre is on screen, and
//! [`RecordingAudioSink`] keeps the last values written to each channel.
//!
//! # Example
//!
//! ```rust
//! use echoguide_hal::sim::SimWorld;
//! use echoguide_hal::provider::RangeProvider;
//! use echoguide_perception::geometry::{Pose, Vec3};
//!
//! # tokio_test_block(async {
//! let world = SimWorld::builder()
//!     .with_pose(Pose::new(Vec3::zero(), Vec3::new(0.0, 0.0, -1.0), Vec3::UP))
//!     .with_obstacle(Vec3::new(0.0, 0.0, -2.0), 0.5)
//!     .build();
//!
//! let d = world.query(Vec3::new(0.0, 0.0, -1.0)).await.unwrap();
//! assert!((d - 1.5).abs() < 1e-4);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use echoguide_perception::geometry::{Pose, Vec3};
use echoguide_perception::tracker::is_on_screen;
use echoguide_types::{AudioControl, BoundingBox, Detection, GuideError, ViewportPoint};
use tokio::sync::RwLock;

use crate::audio::AudioSink;
use crate::projection::{PinholeProjector, Projector};
use crate::provider::{Classifier, PoseProvider, RangeProvider};

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// A sphere in the scene.  Obstacles have an empty label.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSphere {
    pub label: Option<String>,
    pub center: Vec3,
    pub radius: f32,
}

impl SimSphere {
    /// Distance along the unit ray `dir` from `origin` to the sphere surface.
    /// An origin inside the sphere reports `0`.
    fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let oc = origin.sub(self.center);
        let c = oc.dot(oc) - self.radius * self.radius;
        if c <= 0.0 {
            return Some(0.0);
        }
        let b = oc.dot(dir);
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let t = -b - disc.sqrt();
        (t >= 0.0).then_some(t)
    }
}

#[derive(Debug, Clone, Default)]
struct Scene {
    pose: Option<Pose>,
    spheres: Vec<SimSphere>,
    floor_y: Option<f32>,
    depth_dropped: bool,
}

impl Scene {
    fn raycast(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let dir = dir.normalized()?;
        let floor = self.floor_y.and_then(|y| {
            if dir.y < -1e-6 {
                let t = (y - origin.y) / dir.y;
                (t >= 0.0).then_some(t)
            } else {
                None
            }
        });
        self.spheres
            .iter()
            .filter_map(|s| s.intersect(origin, dir))
            .chain(floor)
            .min_by(f32::total_cmp)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimWorld
// ────────────────────────────────────────────────────────────────────────────

/// Shared simulated environment.  Cheap to share behind an [`Arc`].
#[derive(Debug)]
pub struct SimWorld {
    scene: RwLock<Scene>,
    projector: PinholeProjector,
}

impl SimWorld {
    pub fn builder() -> SimWorldBuilder {
        SimWorldBuilder::default()
    }

    pub fn projector(&self) -> PinholeProjector {
        self.projector
    }

    /// Move the observer; `None` simulates a tracking gap.
    pub async fn set_pose(&self, pose: Option<Pose>) {
        self.scene.write().await.pose = pose;
    }

    pub async fn pose(&self) -> Option<Pose> {
        self.scene.read().await.pose
    }

    /// Simulate the depth sensor dropping (or recovering) its frame.  Pose
    /// tracking is unaffected.
    pub async fn set_depth_dropped(&self, dropped: bool) {
        self.scene.write().await.depth_dropped = dropped;
    }

    pub async fn add_obstacle(&self, center: Vec3, radius: f32) {
        self.scene.write().await.spheres.push(SimSphere {
            label: None,
            center,
            radius,
        });
    }

    /// Remove every unlabelled sphere.
    pub async fn clear_obstacles(&self) {
        self.scene.write().await.spheres.retain(|s| s.label.is_some());
    }

    /// Centre of the first object carrying `label`.
    pub async fn object_position(&self, label: &str) -> Option<Vec3> {
        self.scene
            .read()
            .await
            .spheres
            .iter()
            .find(|s| s.label.as_deref() == Some(label))
            .map(|s| s.center)
    }
}

#[async_trait]
impl PoseProvider for SimWorld {
    async fn current_pose(&self) -> Option<Pose> {
        self.pose().await
    }
}

#[async_trait]
impl RangeProvider for SimWorld {
    async fn depth_available(&self) -> bool {
        let scene = self.scene.read().await;
        scene.pose.is_some() && !scene.depth_dropped
    }

    async fn query(&self, direction: Vec3) -> Option<f32> {
        let scene = self.scene.read().await;
        let pose = scene.pose.filter(|_| !scene.depth_dropped)?;
        scene.raycast(pose.position, direction)
    }

    async fn query_at(&self, point: ViewportPoint) -> Option<Vec3> {
        let scene = self.scene.read().await;
        let pose = scene.pose.filter(|_| !scene.depth_dropped)?;
        let ray = self.projector.unproject(&pose, point);
        let t = scene.raycast(pose.position, ray)?;
        Some(pose.position.add(ray.scale(t)))
    }
}

/// Builder for [`SimWorld`].
#[derive(Debug, Default)]
pub struct SimWorldBuilder {
    scene: Scene,
    projector: PinholeProjector,
}

impl SimWorldBuilder {
    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.scene.pose = Some(pose);
        self
    }

    pub fn with_obstacle(mut self, center: Vec3, radius: f32) -> Self {
        self.scene.spheres.push(SimSphere {
            label: None,
            center,
            radius,
        });
        self
    }

    /// A labelled object the classifier can see and range queries can hit.
    pub fn with_object(mut self, label: impl Into<String>, center: Vec3, radius: f32) -> Self {
        self.scene.spheres.push(SimSphere {
            label: Some(label.into()),
            center,
            radius,
        });
        self
    }

    pub fn with_floor(mut self, y: f32) -> Self {
        self.scene.floor_y = Some(y);
        self
    }

    pub fn with_projector(mut self, projector: PinholeProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn build(self) -> SimWorld {
        SimWorld {
            scene: RwLock::new(self.scene),
            projector: self.projector,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimClassifier
// ────────────────────────────────────────────────────────────────────────────

/// Reports a [`Detection`] for every labelled object whose centre projects
/// inside the viewport.
pub struct SimClassifier {
    world: Arc<SimWorld>,
    confidence: f32,
}

impl SimClassifier {
    pub fn new(world: Arc<SimWorld>, confidence: f32) -> Self {
        Self { world, confidence }
    }
}

#[async_trait]
impl Classifier for SimClassifier {
    async fn next_frame(&self) -> Vec<Detection> {
        let scene = self.world.scene.read().await;
        let Some(pose) = scene.pose else {
            return Vec::new();
        };
        let projector = self.world.projector;
        scene
            .spheres
            .iter()
            .filter_map(|s| {
                let label = s.label.as_ref()?;
                let c = projector.project(&pose, s.center)?;
                if !is_on_screen(Some(c)) {
                    return None;
                }
                // Box shrinks with distance; clamped to the viewport.
                let depth = s.center.sub(pose.position).length().max(0.1);
                let half = (s.radius / depth).clamp(0.02, 0.5);
                let x0 = (c.x - half).max(0.0);
                let y0 = (c.y - half).max(0.0);
                let x1 = (c.x + half).min(1.0);
                let y1 = (c.y + half).min(1.0);
                Some(Detection {
                    label: label.clone(),
                    bounding_box: BoundingBox::new(x0, y0, x1 - x0, y1 - y0),
                    confidence: self.confidence,
                })
            })
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RecordingAudioSink
// ────────────────────────────────────────────────────────────────────────────

/// An [`AudioSink`] that remembers the latest write to each channel.
#[derive(Debug, Default)]
pub struct RecordingAudioSink {
    state: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Recorded {
    control: AudioControl,
    writes: usize,
}

impl RecordingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent values, assembled into one frame.
    pub fn snapshot(&self) -> AudioControl {
        self.lock().control
    }

    /// Number of continuous-channel writes so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        // A poisoned recorder still holds valid plain data.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl AudioSink for RecordingAudioSink {
    fn set_continuous(&self, volume: f32, pan: f32) -> Result<(), GuideError> {
        let mut r = self.lock();
        r.control.continuous_volume = volume;
        r.control.continuous_pan = pan;
        r.writes += 1;
        Ok(())
    }

    fn set_alert(&self, active: bool, volume: f32, pan: f32) -> Result<(), GuideError> {
        let mut r = self.lock();
        r.control.alert_active = active;
        r.control.alert_volume = volume;
        r.control.alert_pan = pan;
        Ok(())
    }

    fn set_cadence(&self, interval_ms: Option<u32>) -> Result<(), GuideError> {
        self.lock().control.beep_interval_ms = interval_ms;
        Ok(())
    }
}
