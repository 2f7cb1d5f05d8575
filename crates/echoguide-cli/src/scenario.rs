//! A scripted walk through a [`SimWorld`].
//!
//! The walker holds the phone at eye height, sweeps right until the target
//! is acquired, then steers by the guidance pan and sidesteps away from the
//! alert pan, slowing down while an alert is audible.

use std::time::{Duration, Instant};

use echoguide_hal::sim::SimWorld;
use echoguide_perception::geometry::{Pose, Quaternion, Vec3};
use echoguide_runtime::GuidanceEngine;
use echoguide_types::{AudioControl, GuidanceState};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub const TARGET_LABEL: &str = "chair";
/// The walk ends once the anchor is this close (metres).
pub const ARRIVAL_DISTANCE: f32 = 0.8;
pub const STEP: Duration = Duration::from_millis(50);

const EYE_HEIGHT: f32 = 1.4;
const START_YAW: f32 = -0.35;
const WALK_SPEED: f32 = 0.8;
const SWEEP_RATE: f32 = 0.35;
const STEER_GAIN: f32 = 1.5;
const DODGE_GAIN: f32 = 0.8;
/// Print every n-th step.
const REPORT_EVERY: u64 = 4;

/// Floor, a chair ahead and to the right, and a chest-height obstacle just
/// left of the straight line to it.
pub fn build_world() -> SimWorld {
    SimWorld::builder()
        .with_pose(Walker::start().pose())
        .with_floor(-EYE_HEIGHT)
        .with_object(TARGET_LABEL, Vec3::new(1.5, -0.5, -5.0), 0.3)
        .with_obstacle(Vec3::new(0.35, -0.2, -2.4), 0.3)
        .build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Walker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walker {
    pub position: Vec3,
    /// Heading in radians, positive to the right of -Z.
    pub yaw: f32,
}

impl Walker {
    pub fn start() -> Self {
        Self {
            position: Vec3::zero(),
            yaw: START_YAW,
        }
    }

    pub fn heading(&self) -> Vec3 {
        Vec3::new(self.yaw.sin(), 0.0, -self.yaw.cos())
    }

    /// The phone is held level, so the device orientation is a pure yaw.
    pub fn pose(&self) -> Pose {
        Pose::from_orientation(self.position, Quaternion::from_yaw(self.yaw))
    }

    /// Advance `dt` seconds reacting to the engine's state and last frame.
    pub fn step(&mut self, dt: f32, state: GuidanceState, output: &AudioControl) {
        match state {
            GuidanceState::Searching => self.yaw += SWEEP_RATE * dt,
            GuidanceState::Guiding => {
                let alarmed = output.alert_active && output.alert_volume > 0.0;
                let mut turn = STEER_GAIN * output.continuous_pan;
                if alarmed {
                    turn -= DODGE_GAIN * output.alert_pan;
                }
                self.yaw += turn * dt;
                let speed = if alarmed { WALK_SPEED * 0.5 } else { WALK_SPEED };
                self.position = self.position.add(self.heading().scale(speed * dt));
            }
            GuidanceState::Idle | GuidanceState::Resetting => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Walk loop
// ─────────────────────────────────────────────────────────────────────────────

/// One printed line of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frame {
    pub elapsed_ms: u64,
    pub state: GuidanceState,
    pub distance: Option<f32>,
    #[serde(flatten)]
    pub output: AudioControl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WalkEnd {
    Arrived { distance: f32 },
    TimedOut,
    Interrupted,
}

/// Move the walker every [`STEP`] until it reaches the target, `limit`
/// elapses or `shutdown` fires.  The engine runs separately; this only
/// reads its output and moves the observer.
pub async fn walk<R>(
    world: &SimWorld,
    engine: &GuidanceEngine,
    limit: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut report: R,
) -> WalkEnd
where
    R: FnMut(&Frame),
{
    let started = Instant::now();
    let mut walker = Walker::start();
    let mut ticker = interval(STEP);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut n: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return WalkEnd::Interrupted,
            _ = ticker.tick() => {}
        }

        let state = engine.state().await;
        let frame = Frame {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            state,
            distance: engine.tracking().await.map(|t| t.distance),
            output: engine.output().await,
        };
        if let Some(d) = frame.distance
            && d <= ARRIVAL_DISTANCE
        {
            report(&frame);
            return WalkEnd::Arrived { distance: d };
        }
        if n % REPORT_EVERY == 0 {
            report(&frame);
        }
        if started.elapsed() >= limit {
            return WalkEnd::TimedOut;
        }

        walker.step(STEP.as_secs_f32(), state, &frame.output);
        world.set_pose(Some(walker.pose())).await;
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguide_hal::provider::Classifier;
    use echoguide_hal::sim::{RecordingAudioSink, SimClassifier};
    use echoguide_runtime::{GuidanceConfig, Providers};
    use std::sync::Arc;

    fn guiding_output(pan: f32) -> AudioControl {
        AudioControl {
            continuous_volume: 0.5,
            continuous_pan: pan,
            ..AudioControl::silent()
        }
    }

    #[test]
    fn searching_sweeps_in_place() {
        let mut w = Walker::start();
        w.step(1.0, GuidanceState::Searching, &AudioControl::silent());
        assert!(w.yaw > START_YAW);
        assert_eq!(w.position, Vec3::zero());
    }

    #[test]
    fn pose_faces_the_walking_heading() {
        let w = Walker {
            position: Vec3::new(1.0, 0.0, -2.0),
            yaw: 0.6,
        };
        let pose = w.pose();
        assert!(pose.forward.sub(w.heading()).length() < 1e-5, "{:?}", pose.forward);
        assert!(pose.up.sub(Vec3::UP).length() < 1e-5);
        assert_eq!(pose.position, w.position);
    }

    #[test]
    fn idle_walker_stands_still() {
        let mut w = Walker::start();
        w.step(1.0, GuidanceState::Idle, &guiding_output(1.0));
        assert_eq!(w, Walker::start());
    }

    #[test]
    fn guidance_pan_steers_toward_target() {
        let mut w = Walker {
            position: Vec3::zero(),
            yaw: 0.0,
        };
        w.step(0.1, GuidanceState::Guiding, &guiding_output(0.5));
        assert!(w.yaw > 0.0);
        assert!(w.position.z < 0.0, "walker should move forward");
    }

    #[test]
    fn audible_alert_pushes_away_and_slows_down() {
        let mut calm = Walker {
            position: Vec3::zero(),
            yaw: 0.0,
        };
        let mut alarmed = calm;
        calm.step(0.1, GuidanceState::Guiding, &guiding_output(0.0));
        alarmed.step(
            0.1,
            GuidanceState::Guiding,
            &AudioControl {
                alert_active: true,
                alert_volume: 0.6,
                alert_pan: -0.8,
                ..guiding_output(0.0)
            },
        );
        // Obstacle on the left: turn right.
        assert!(alarmed.yaw > 0.0);
        assert!(alarmed.position.length() < calm.position.length());
    }

    /// The full walk, stepped by hand at the same cadences the engine uses.
    #[tokio::test]
    async fn walk_reaches_the_chair_and_trips_the_alert() {
        let world = Arc::new(build_world());
        let sink = Arc::new(RecordingAudioSink::new());
        let engine = GuidanceEngine::new(
            GuidanceConfig::default(),
            Providers::from_sim(world.clone(), sink),
        )
        .unwrap();
        let classifier = SimClassifier::new(world.clone(), 0.9);
        engine.begin_search(TARGET_LABEL).await.unwrap();

        let mut walker = Walker::start();
        let mut saw_alert = false;
        let mut arrived = None;
        for n in 0..600u32 {
            if engine.state().await == GuidanceState::Searching {
                for d in classifier.next_frame().await {
                    let _ = engine.handle_detection(&d).await;
                }
            }
            if n % 20 == 0 {
                engine.scan_tick().await.unwrap();
            }
            let output = engine.pose_tick().await.unwrap();
            saw_alert |= output.alert_active && output.alert_volume > 0.0;
            if let Some(t) = engine.tracking().await
                && t.distance <= ARRIVAL_DISTANCE
            {
                arrived = Some(n);
                break;
            }
            walker.step(STEP.as_secs_f32(), engine.state().await, &output);
            world.set_pose(Some(walker.pose())).await;
        }

        assert!(arrived.is_some(), "walker never reached the chair");
        assert!(saw_alert, "obstacle alert never sounded");
        let anchor = engine.anchor().await.unwrap();
        let chair = world.object_position(TARGET_LABEL).await.unwrap();
        assert!(anchor.world_position.sub(chair).length() < 0.35);
    }
}
