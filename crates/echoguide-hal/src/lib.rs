//! `echoguide-hal` – the boundary between the guidance core and the device.
//!
//! # Modules
//!
//! - [`provider`] – async [`PoseProvider`][provider::PoseProvider],
//!   [`RangeProvider`][provider::RangeProvider] and
//!   [`Classifier`][provider::Classifier] traits.
//! - [`projection`] – [`Projector`][projection::Projector] trait and a
//!   [`PinholeProjector`][projection::PinholeProjector] implementation.
//! - [`audio`] – [`AudioSink`][audio::AudioSink]: the two-node output path.
//! - [`sim`] – simulated world, classifier and recording sink for CI and
//!   headless demos.

pub mod audio;
pub mod projection;
pub mod provider;
pub mod sim;

pub use audio::AudioSink;
pub use projection::{PinholeProjector, Projector};
pub use provider::{Classifier, PoseProvider, RangeProvider};
