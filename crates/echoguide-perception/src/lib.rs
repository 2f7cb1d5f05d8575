//! `echoguide-perception` – spatial reasoning for the guidance engine.
//!
//! Pure, synchronous math over poses and range samples.  Nothing here talks
//! to a sensor or blocks; the runtime feeds provider answers in.
//!
//! # Modules
//!
//! - [`geometry`] – [`Vec3`][geometry::Vec3], [`Quaternion`][geometry::Quaternion]
//!   and [`Pose`][geometry::Pose], plus the bearing, signed-pan and
//!   local-to-world direction laws.
//! - [`scanner`] – [`ObstacleScanner`][scanner::ObstacleScanner]: reduces a
//!   fixed set of direction probes to the nearest in-range obstacle with a
//!   deterministic tie-break.
//! - [`tracker`] – [`TargetTracker`][tracker::TargetTracker]: owns the
//!   single target anchor and measures distance, pan and visibility to it.

pub mod geometry;
pub mod scanner;
pub mod tracker;

pub use geometry::{Pose, Quaternion, Vec3};
pub use scanner::{DirectionProbe, ObstacleSample, ObstacleScanner, ScanOutcome};
pub use tracker::{TargetAnchor, TargetTracker, TrackingSample};
