//! `echoguide-runtime` – the guidance engine.
//!
//! # Modules
//!
//! - [`config`] – [`GuidanceConfig`][config::GuidanceConfig]: every tunable
//!   threshold and cadence, with serde defaults.
//! - [`feedback`] – pure volume/pan laws plus the stateful
//!   [`FeedbackMapper`][feedback::FeedbackMapper] that owns the alert
//!   hysteresis and ducking.
//! - [`state_machine`] – [`GuidanceMachine`][state_machine::GuidanceMachine]:
//!   `Idle → Searching → Guiding`, reset, and the session counter that
//!   rejects stale acquisitions.
//! - [`engine`] – [`GuidanceEngine`][engine::GuidanceEngine]: the async
//!   pose/scan/detection cadences wired to providers, the audio sink and the
//!   event bus.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: subscriber
//!   setup with optional OTLP export.

pub mod config;
pub mod engine;
pub mod feedback;
pub mod state_machine;
pub mod telemetry;

pub use config::{GuidanceConfig, GuidanceStyle, ObstaclePanLaw};
pub use engine::{feed_classifier, GuidanceEngine, Providers};
pub use feedback::{AlertChannel, FeedbackMapper, GuidanceChannel};
pub use state_machine::{AcquisitionOutcome, DetectionOutcome, GuidanceMachine, Transition};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryGuard};
