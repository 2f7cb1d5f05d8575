//! `echoguide-middleware` – routes guidance output to its observers.
//!
//! # Modules
//!
//! - [`bus`] – topic-based broadcast bus plus a latest-value audio feed,
//!   built on Tokio `broadcast` and `watch` channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
