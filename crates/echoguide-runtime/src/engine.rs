//! [`GuidanceEngine`] – the real-time guidance loop.
//!
//! Three independent cadences share one core:
//!
//! 1. **Pose tick** (~60 Hz) – measure the anchor from the latest pose, map
//!    it to guidance volume/pan and write the audio frame.
//! 2. **Scan tick** (~1 Hz) – fan out every probe's range query
//!    concurrently, reduce to the nearest obstacle and update the alert.
//! 3. **Detections** – classifier results, one at a time.  A match triggers
//!    a position query and, if the search is still the same one when it
//!    resolves, anchors the target.
//!
//! The core sits behind a [`tokio::sync::Mutex`] that is never held across
//! a provider call, so a slow range query cannot stall the pose tick.  Work
//! that started before a [`reset`](GuidanceEngine::reset) is recognised by
//! its session number and dropped when it completes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use echoguide_hal::sim::{RecordingAudioSink, SimWorld};
//! use echoguide_runtime::config::GuidanceConfig;
//! use echoguide_runtime::engine::{GuidanceEngine, Providers};
//!
//! # async fn demo() -> Result<(), echoguide_types::GuideError> {
//! let world = Arc::new(SimWorld::builder().build());
//! let providers = Providers::from_sim(world, Arc::new(RecordingAudioSink::new()));
//! let engine = GuidanceEngine::new(GuidanceConfig::default(), providers)?;
//! engine.begin_search("chair").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use echoguide_hal::audio::{self, AudioSink};
use echoguide_hal::projection::Projector;
use echoguide_hal::provider::{Classifier, PoseProvider, RangeProvider};
use echoguide_hal::sim::SimWorld;
use echoguide_middleware::{EventBus, Topic};
use echoguide_perception::scanner::{ObstacleScanner, ScanOutcome};
use echoguide_perception::tracker::{TargetAnchor, TrackingSample};
use echoguide_types::{AudioControl, Detection, Event, EventPayload, GuidanceState, GuideError};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::GuidanceConfig;
use crate::feedback::{FeedbackMapper, GuidanceChannel};
use crate::state_machine::{AcquisitionOutcome, DetectionOutcome, GuidanceMachine, Transition};

/// Event source tag for everything the engine publishes.
pub const SOURCE: &str = "echoguide-runtime::engine";

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Device collaborators the engine polls and writes to.
#[derive(Clone)]
pub struct Providers {
    pub pose: Arc<dyn PoseProvider>,
    pub range: Arc<dyn RangeProvider>,
    pub projector: Arc<dyn Projector>,
    pub audio: Arc<dyn AudioSink>,
}

impl Providers {
    /// Wire pose, range and projection to one simulated world.
    pub fn from_sim(world: Arc<SimWorld>, audio: Arc<dyn AudioSink>) -> Self {
        let projector = Arc::new(world.projector());
        Self {
            pose: world.clone(),
            range: world,
            projector,
            audio,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GuidanceEngine
// ─────────────────────────────────────────────────────────────────────────────

struct Core {
    machine: GuidanceMachine,
    mapper: FeedbackMapper,
    guidance: GuidanceChannel,
    tracking: Option<TrackingSample>,
    output: AudioControl,
}

impl Core {
    /// Drop everything that belonged to the previous session.
    fn clear_session(&mut self) {
        self.mapper.reset();
        self.guidance = GuidanceChannel::silent();
        self.tracking = None;
    }
}

pub struct GuidanceEngine {
    config: GuidanceConfig,
    scanner: ObstacleScanner,
    providers: Providers,
    bus: EventBus,
    core: Mutex<Core>,
}

impl GuidanceEngine {
    /// Build an engine with its own [`EventBus`].
    ///
    /// # Errors
    ///
    /// [`GuideError::Config`] if `config` fails validation.
    pub fn new(config: GuidanceConfig, providers: Providers) -> Result<Self, GuideError> {
        Self::with_bus(config, providers, EventBus::default())
    }

    /// Build an engine that publishes on an existing bus.
    pub fn with_bus(
        config: GuidanceConfig,
        providers: Providers,
        bus: EventBus,
    ) -> Result<Self, GuideError> {
        config.validate()?;
        let scanner = ObstacleScanner::new(config.probes.clone(), config.sensing_range());
        let core = Core {
            machine: GuidanceMachine::new(config.min_confidence),
            mapper: FeedbackMapper::new(config.clone()),
            guidance: GuidanceChannel::silent(),
            tracking: None,
            output: AudioControl::silent(),
        };
        Ok(Self {
            config,
            scanner,
            providers,
            bus,
            core: Mutex::new(core),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }

    /// A handle on the engine's bus for subscribers.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub async fn state(&self) -> GuidanceState {
        self.core.lock().await.machine.state()
    }

    /// The last frame written to the audio sink.
    pub async fn output(&self) -> AudioControl {
        self.core.lock().await.output
    }

    pub async fn tracking(&self) -> Option<TrackingSample> {
        self.core.lock().await.tracking
    }

    pub async fn anchor(&self) -> Option<TargetAnchor> {
        self.core.lock().await.machine.anchor().cloned()
    }

    pub async fn alert_active(&self) -> bool {
        self.core.lock().await.machine.alert_active()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start searching for `label`, abandoning any current session.
    #[instrument(skip(self))]
    pub async fn begin_search(&self, label: &str) -> Result<(), GuideError> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let transitions = core.machine.begin_search(label)?;
        core.clear_session();
        self.publish_transitions(&transitions);
        self.emit(core);
        Ok(())
    }

    /// Return to `Idle`: release the anchor, clear the alert and silence
    /// both channels.  Safe to call at any time, any number of times.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let transitions = core.machine.reset();
        core.clear_session();
        if !transitions.is_empty() {
            info!("guidance reset");
        }
        self.publish_transitions(&transitions);
        self.emit(core);
    }

    // -------------------------------------------------------------------------
    // Ticks
    // -------------------------------------------------------------------------

    /// One guidance update.
    ///
    /// # Errors
    ///
    /// [`GuideError::NoPoseData`] when the pose provider has nothing; the
    /// previous output is left playing.
    pub async fn pose_tick(&self) -> Result<AudioControl, GuideError> {
        let pose = self
            .providers
            .pose
            .current_pose()
            .await
            .ok_or(GuideError::NoPoseData)?;

        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        if core.machine.state() != GuidanceState::Guiding {
            return Ok(core.output);
        }

        let projector = &self.providers.projector;
        let sample = core.machine.track(&pose, |p, w| projector.project(p, w));
        core.guidance = core.mapper.guidance(sample.as_ref());
        core.tracking = sample;
        if let Some(s) = sample {
            self.publish(Topic::Perception, EventPayload::Tracking(s.snapshot()));
        }
        Ok(self.emit(core))
    }

    /// One obstacle scan.  Returns [`ScanOutcome::Skipped`] when there is no
    /// active session, no pose or depth frame, or the session changed while
    /// the probes were in flight; the alert is untouched in every case.
    pub async fn scan_tick(&self) -> Result<ScanOutcome, GuideError> {
        if !self.config.alert_enabled {
            return Ok(ScanOutcome::Skipped);
        }
        let session = {
            let core = self.core.lock().await;
            if !core.machine.state().is_session_active() {
                return Ok(ScanOutcome::Skipped);
            }
            core.machine.session()
        };

        let Some(pose) = self.providers.pose.current_pose().await else {
            debug!("no pose for scan; alert held");
            return Ok(ScanOutcome::Skipped);
        };
        let range = &self.providers.range;
        if !range.depth_available().await {
            debug!("no depth frame for scan; alert held");
            return Ok(ScanOutcome::Skipped);
        }
        let rays = self.scanner.rays(&pose);
        let distances = join_all(rays.iter().map(|r| range.query(*r))).await;
        let outcome = self.scanner.select_nearest(&rays, &distances);

        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        if core.machine.session() != session {
            debug!(session, "scan outlived its session; discarded");
            return Ok(ScanOutcome::Skipped);
        }

        let alert = core.mapper.observe_scan(&outcome, Some(&pose));
        if core.machine.set_alert(alert.active) {
            let distance = outcome.nearest_distance();
            info!(active = alert.active, ?distance, "obstacle alert changed");
            self.publish(
                Topic::Perception,
                EventPayload::ObstacleAlert {
                    active: alert.active,
                    distance,
                },
            );
        }
        self.emit(core);
        Ok(outcome)
    }

    /// Feed one classifier detection.  Returns the state after handling it.
    ///
    /// # Errors
    ///
    /// - [`GuideError::NoPoseData`] if a match arrives while tracking is
    ///   lost; the search continues.
    /// - Errors from anchoring the target (see
    ///   [`GuidanceMachine::complete_acquisition`]).
    pub async fn handle_detection(&self, detection: &Detection) -> Result<GuidanceState, GuideError> {
        let outcome = self.core.lock().await.machine.on_detection(detection);
        let DetectionOutcome::Matched {
            session,
            label,
            point,
        } = outcome
        else {
            return Ok(self.state().await);
        };

        let pose = self
            .providers
            .pose
            .current_pose()
            .await
            .ok_or(GuideError::NoPoseData)?;
        let position = self.providers.range.query_at(point).await;

        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        match core.machine.complete_acquisition(session, position)? {
            AcquisitionOutcome::Acquired { transition, anchor } => {
                let distance = pose.distance_to(anchor.world_position);
                info!(label = %anchor.label, distance, "target acquired");
                self.publish_transitions(&[transition]);
                self.publish(
                    Topic::Lifecycle,
                    EventPayload::TargetAcquired {
                        label: anchor.label,
                        distance,
                    },
                );
            }
            AcquisitionOutcome::Retry => {
                debug!(label = %label, "no surface under detection; still searching");
            }
            AcquisitionOutcome::Stale => {
                debug!(label = %label, "acquisition finished after reset; dropped");
            }
        }
        Ok(core.machine.state())
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Drive all three cadences until `shutdown` turns `true` (or its sender
    /// is dropped).  The detection loop also ends when `detections` closes;
    /// the ticks keep running.
    pub async fn run(
        self: Arc<Self>,
        mut detections: mpsc::Receiver<Detection>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!(
            pose_ms = self.config.pose_interval_ms,
            scan_ms = self.config.scan_interval_ms,
            "guidance engine running"
        );

        let pose_loop = {
            let engine = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            async move {
                let mut ticker = interval(engine.config.pose_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = ticker.tick() => {
                            if let Err(e) = engine.pose_tick().await {
                                debug!(error = %e, "pose tick skipped");
                            }
                        }
                    }
                }
            }
        };

        let scan_loop = {
            let engine = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            async move {
                let mut ticker = interval(engine.config.scan_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = ticker.tick() => {
                            if let Err(e) = engine.scan_tick().await {
                                warn!(error = %e, "scan tick failed");
                            }
                        }
                    }
                }
            }
        };

        let detection_loop = {
            let engine = Arc::clone(&self);
            let mut shutdown = shutdown;
            async move {
                loop {
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        next = detections.recv() => match next {
                            Some(d) => {
                                if let Err(e) = engine.handle_detection(&d).await {
                                    debug!(error = %e, "detection not used");
                                }
                            }
                            None => break,
                        },
                    }
                }
            }
        };

        tokio::join!(pose_loop, scan_loop, detection_loop);
        info!("guidance engine stopped");
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Compose the current frame, write it to the sink and announce it.
    /// Sink failures are logged; the frame still becomes the new output.
    fn emit(&self, core: &mut Core) -> AudioControl {
        let control = core.mapper.compose(core.guidance);
        if let Err(e) = audio::apply(self.providers.audio.as_ref(), &control) {
            warn!(error = %e, "audio sink write failed");
        }
        core.output = control;
        self.bus.publish_audio(SOURCE, control);
        control
    }

    fn publish_transitions(&self, transitions: &[Transition]) {
        for t in transitions {
            self.publish(
                Topic::Lifecycle,
                EventPayload::StateChanged {
                    from: t.from,
                    to: t.to,
                },
            );
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        // Best-effort: a topic nobody listens to is normal.
        let _ = self.bus.publish_to(topic, Event::new(SOURCE, payload));
    }
}

/// Pull frames from `classifier` every `frame_interval` and forward each
/// detection to the engine's channel.  Ends on shutdown or when the
/// receiver is gone.
pub async fn feed_classifier(
    classifier: Arc<dyn Classifier>,
    frame_interval: Duration,
    tx: mpsc::Sender<Detection>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = ticker.tick() => {
                for detection in classifier.next_frame().await {
                    if tx.send(detection).await.is_err() {
                        debug!("detection channel closed; classifier feed stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves once the flag is `true` or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use echoguide_hal::sim::{RecordingAudioSink, SimClassifier};
    use echoguide_perception::geometry::{Pose, Vec3};
    use echoguide_types::{BoundingBox, ViewportPoint};
    use tokio::sync::Notify;

    fn facing_forward() -> Pose {
        Pose::new(Vec3::zero(), Vec3::new(0.0, 0.0, -1.0), Vec3::UP)
    }

    /// A world with a small "chair" whose front surface is 3 m ahead.
    fn chair_world() -> Arc<SimWorld> {
        Arc::new(
            SimWorld::builder()
                .with_pose(facing_forward())
                .with_object("chair", Vec3::new(0.0, 0.0, -3.01), 0.01)
                .build(),
        )
    }

    fn centred(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            bounding_box: BoundingBox::new(0.45, 0.45, 0.1, 0.1),
            confidence: 0.9,
        }
    }

    fn sim_engine(world: Arc<SimWorld>) -> (GuidanceEngine, Arc<RecordingAudioSink>) {
        let sink = Arc::new(RecordingAudioSink::new());
        let providers = Providers::from_sim(world, sink.clone());
        let engine = GuidanceEngine::new(GuidanceConfig::default(), providers).unwrap();
        (engine, sink)
    }

    async fn guide_to_chair(engine: &GuidanceEngine) {
        engine.begin_search("chair").await.unwrap();
        let state = engine.handle_detection(&centred("chair")).await.unwrap();
        assert_eq!(state, GuidanceState::Guiding);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let sink = Arc::new(RecordingAudioSink::new());
        let providers = Providers::from_sim(chair_world(), sink);
        let cfg = GuidanceConfig {
            far_distance: 0.1,
            ..Default::default()
        };
        assert!(matches!(
            GuidanceEngine::new(cfg, providers),
            Err(GuideError::Config(_))
        ));
    }

    #[tokio::test]
    async fn target_three_metres_ahead() {
        let (engine, sink) = sim_engine(chair_world());
        guide_to_chair(&engine).await;

        let frame = engine.pose_tick().await.unwrap();
        assert!((frame.continuous_volume - 0.591).abs() < 2e-3, "got {frame:?}");
        assert!(frame.continuous_pan.abs() < 1e-4);
        assert!(!frame.alert_active);
        assert_eq!(sink.snapshot(), frame);

        let tracking = engine.tracking().await.unwrap();
        assert!((tracking.distance - 3.0).abs() < 1e-3);
        assert!(tracking.on_screen);
    }

    #[tokio::test]
    async fn obstacle_while_guiding_sounds_both_channels() {
        let world = chair_world();
        let (engine, sink) = sim_engine(world.clone());
        guide_to_chair(&engine).await;

        world.add_obstacle(Vec3::new(0.0, 0.0, -0.8), 0.5).await;
        let outcome = engine.scan_tick().await.unwrap();
        let d = outcome.nearest_distance().unwrap();
        assert!((d - 0.3).abs() < 1e-3, "nearest {d}");
        assert!(engine.alert_active().await);

        engine.pose_tick().await.unwrap();
        let frame = sink.snapshot();
        assert!(frame.alert_active);
        assert!(frame.alert_volume > 0.0);
        assert!(frame.continuous_volume > 0.0);
        // Ducked below the undisturbed ~0.591.
        assert!(frame.continuous_volume < 0.4);
    }

    #[tokio::test]
    async fn alert_clears_once_obstacle_is_beyond_safe_zone() {
        let world = chair_world();
        let (engine, _sink) = sim_engine(world.clone());
        let mut perception = engine.bus().subscribe_to(Topic::Perception);
        engine.begin_search("chair").await.unwrap();

        world.add_obstacle(Vec3::new(0.0, 0.0, -1.0), 0.5).await;
        engine.scan_tick().await.unwrap();
        assert!(engine.alert_active().await);

        world.clear_obstacles().await;
        world.add_obstacle(Vec3::new(0.0, 0.0, -1.45), 0.5).await;
        engine.scan_tick().await.unwrap();
        assert!(!engine.alert_active().await);

        let mut alerts = Vec::new();
        while let Some(ev) = perception.try_recv() {
            if let EventPayload::ObstacleAlert { active, .. } = ev.payload {
                alerts.push(active);
            }
        }
        assert_eq!(alerts, vec![true, false]);
    }

    #[tokio::test]
    async fn dropped_depth_frame_holds_the_alert() {
        let world = chair_world();
        let (engine, _sink) = sim_engine(world.clone());
        guide_to_chair(&engine).await;
        world.add_obstacle(Vec3::new(0.0, 0.0, -0.8), 0.5).await;
        engine.scan_tick().await.unwrap();
        assert!(engine.alert_active().await);

        world.set_depth_dropped(true).await;
        assert_eq!(engine.scan_tick().await.unwrap(), ScanOutcome::Skipped);
        assert!(engine.alert_active().await);
        assert!(engine.output().await.alert_active);

        world.set_depth_dropped(false).await;
        world.clear_obstacles().await;
        assert_eq!(engine.scan_tick().await.unwrap(), ScanOutcome::Clear);
        assert!(!engine.alert_active().await);
    }

    #[tokio::test]
    async fn missing_pose_keeps_last_output() {
        let world = chair_world();
        let (engine, _sink) = sim_engine(world.clone());
        guide_to_chair(&engine).await;
        let before = engine.pose_tick().await.unwrap();

        world.set_pose(None).await;
        assert_eq!(engine.pose_tick().await, Err(GuideError::NoPoseData));
        assert_eq!(engine.output().await, before);
        assert_eq!(engine.scan_tick().await.unwrap(), ScanOutcome::Skipped);
    }

    #[tokio::test]
    async fn idle_engine_neither_scans_nor_sounds() {
        let world = chair_world();
        world.add_obstacle(Vec3::new(0.0, 0.0, -0.6), 0.3).await;
        let (engine, _sink) = sim_engine(world);
        assert_eq!(engine.scan_tick().await.unwrap(), ScanOutcome::Skipped);
        assert!(engine.pose_tick().await.unwrap().is_silent());
        assert!(!engine.alert_active().await);
    }

    #[tokio::test]
    async fn mismatched_detection_keeps_searching() {
        let (engine, _sink) = sim_engine(chair_world());
        engine.begin_search("door").await.unwrap();
        let state = engine.handle_detection(&centred("chair")).await.unwrap();
        assert_eq!(state, GuidanceState::Searching);
        assert!(engine.anchor().await.is_none());
    }

    #[tokio::test]
    async fn detection_over_empty_space_keeps_searching() {
        let (engine, _sink) = sim_engine(chair_world());
        engine.begin_search("chair").await.unwrap();
        let off_target = Detection {
            bounding_box: BoundingBox::new(0.0, 0.0, 0.1, 0.1),
            ..centred("chair")
        };
        let state = engine.handle_detection(&off_target).await.unwrap();
        assert_eq!(state, GuidanceState::Searching);
    }

    #[tokio::test]
    async fn reset_silences_and_releases() {
        let world = chair_world();
        let (engine, sink) = sim_engine(world.clone());
        let mut lifecycle = engine.bus().subscribe_to(Topic::Lifecycle);
        guide_to_chair(&engine).await;
        world.add_obstacle(Vec3::new(0.0, 0.0, -0.8), 0.5).await;
        engine.scan_tick().await.unwrap();
        engine.pose_tick().await.unwrap();

        engine.reset().await;
        assert_eq!(engine.state().await, GuidanceState::Idle);
        assert!(engine.anchor().await.is_none());
        assert!(!engine.alert_active().await);
        assert!(sink.snapshot().is_silent());
        assert!(!sink.snapshot().alert_active);
        assert!(engine.bus().latest_audio().is_silent());

        let mut states = Vec::new();
        while let Some(ev) = lifecycle.try_recv() {
            if let EventPayload::StateChanged { to, .. } = ev.payload {
                states.push(to);
            }
        }
        assert_eq!(
            states,
            vec![
                GuidanceState::Searching,
                GuidanceState::Guiding,
                GuidanceState::Resetting,
                GuidanceState::Idle,
            ]
        );
    }

    // ── Races ────────────────────────────────────────────────────────────────

    /// Range provider whose `query_at` blocks until released.
    struct GatedRange {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RangeProvider for GatedRange {
        async fn query(&self, _direction: Vec3) -> Option<f32> {
            None
        }

        async fn query_at(&self, _point: ViewportPoint) -> Option<Vec3> {
            self.entered.notify_one();
            self.release.notified().await;
            Some(Vec3::new(0.0, 0.0, -2.0))
        }
    }

    #[tokio::test]
    async fn acquisition_landing_after_reset_is_dropped() {
        let world = chair_world();
        let gated = Arc::new(GatedRange {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sink = Arc::new(RecordingAudioSink::new());
        let providers = Providers {
            range: gated.clone(),
            ..Providers::from_sim(world, sink)
        };
        let engine = Arc::new(GuidanceEngine::new(GuidanceConfig::default(), providers).unwrap());
        engine.begin_search("chair").await.unwrap();

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_detection(&centred("chair")).await })
        };
        gated.entered.notified().await;
        engine.reset().await;
        gated.release.notify_one();

        let state = pending.await.unwrap().unwrap();
        assert_eq!(state, GuidanceState::Idle);
        assert!(engine.anchor().await.is_none());
        assert!(engine.output().await.is_silent());
    }

    // ── Sink failures ────────────────────────────────────────────────────────

    struct BrokenSink;

    impl AudioSink for BrokenSink {
        fn set_continuous(&self, _volume: f32, _pan: f32) -> Result<(), GuideError> {
            Err(GuideError::AudioSink {
                details: "device unplugged".into(),
            })
        }

        fn set_alert(&self, _active: bool, _volume: f32, _pan: f32) -> Result<(), GuideError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_failure_is_not_fatal() {
        let providers = Providers::from_sim(chair_world(), Arc::new(BrokenSink));
        let engine = GuidanceEngine::new(GuidanceConfig::default(), providers).unwrap();
        guide_to_chair(&engine).await;
        let frame = engine.pose_tick().await.unwrap();
        assert!(frame.continuous_volume > 0.0);
        assert_eq!(engine.bus().latest_audio(), frame);
    }

    // ── Run loop ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_loop_acquires_and_stops_on_shutdown() {
        let world = chair_world();
        let sink = Arc::new(RecordingAudioSink::new());
        let config = GuidanceConfig {
            pose_interval_ms: 5,
            scan_interval_ms: 10,
            ..Default::default()
        };
        let engine = Arc::new(
            GuidanceEngine::new(config, Providers::from_sim(world.clone(), sink.clone())).unwrap(),
        );
        engine.begin_search("chair").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let classifier: Arc<dyn Classifier> = Arc::new(SimClassifier::new(world, 0.9));
        let feed = tokio::spawn(feed_classifier(
            classifier,
            Duration::from_millis(5),
            tx,
            stop_rx.clone(),
        ));
        let runner = tokio::spawn(Arc::clone(&engine).run(rx, stop_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), feed)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(engine.state().await, GuidanceState::Guiding);
        assert!(sink.writes() > 1);
        assert!(sink.snapshot().continuous_volume > 0.5);
    }
}
