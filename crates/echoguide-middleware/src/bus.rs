//! Topic-partitioned guidance bus.
//!
//! Two delivery styles sit side by side:
//!
//! * **Latest value** – [`EventBus::audio_feed`] hands out a
//!   [`tokio::sync::watch`] receiver that always holds the most recent
//!   [`AudioControl`].  Every publish replaces the whole frame, so readers
//!   never observe a partially written value.  This is what an audio
//!   renderer or UI polls.
//! * **Event stream** – [`EventBus::subscribe_to`] returns a
//!   [`tokio::sync::broadcast`] receiver for one [`Topic`], so logging or
//!   analytics consumers see every transition without blocking others.
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Audio`] | One [`EventPayload::Audio`] per recomputed frame |
//! | [`Topic::Lifecycle`] | State transitions, target acquisition |
//! | [`Topic::Perception`] | Tracking snapshots, obstacle alert flips |

use std::sync::Arc;

use echoguide_types::{AudioControl, Event, EventPayload, GuideError};
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Audio,
    Lifecycle,
    Perception,
}

/// Shared bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    audio: broadcast::Sender<Event>,
    lifecycle: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    latest_audio: Arc<watch::Sender<AudioControl>>,
}

impl EventBus {
    /// Create a bus; `capacity` applies to each topic channel.
    pub fn new(capacity: usize) -> Self {
        let (audio, _) = broadcast::channel(capacity);
        let (lifecycle, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (latest_audio, _) = watch::channel(AudioControl::silent());
        Self {
            audio,
            lifecycle,
            perception,
            latest_audio: Arc::new(latest_audio),
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`GuideError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, GuideError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| GuideError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Replace the latest audio frame and announce it on [`Topic::Audio`].
    ///
    /// The watch slot is always updated, even with no stream subscribers.
    pub fn publish_audio(&self, source: &str, control: AudioControl) {
        self.latest_audio.send_replace(control);
        // Best-effort: an empty audio topic is normal.
        let _ = self.publish_to(Topic::Audio, Event::new(source, EventPayload::Audio(control)));
    }

    /// Receiver that always holds the most recent [`AudioControl`].
    pub fn audio_feed(&self) -> watch::Receiver<AudioControl> {
        self.latest_audio.subscribe()
    }

    /// Copy of the most recent [`AudioControl`].
    pub fn latest_audio(&self) -> AudioControl {
        *self.latest_audio.borrow()
    }

    /// Subscribe to one [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Audio => &self.audio,
            Topic::Lifecycle => &self.lifecycle,
            Topic::Perception => &self.perception,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event, skipping over any gap left by lagging.
    ///
    /// Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv]: `None` when nothing is
    /// waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguide_types::GuidanceState;
    use std::time::Duration;

    fn transition(to: GuidanceState) -> Event {
        Event::new(
            "test",
            EventPayload::StateChanged {
                from: GuidanceState::Idle,
                to,
            },
        )
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Lifecycle, transition(GuidanceState::Searching));
        assert!(matches!(result, Err(GuideError::Channel(_))));
    }

    #[tokio::test]
    async fn subscribers_on_a_topic_all_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::Lifecycle);
        let mut b = bus.subscribe_to(Topic::Lifecycle);

        let event = transition(GuidanceState::Searching);
        assert_eq!(bus.publish_to(Topic::Lifecycle, event.clone())?, 2);

        assert_eq!(a.recv().await.ok_or("a got nothing")?.id, event.id);
        assert_eq!(b.recv().await.ok_or("b got nothing")?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut perception = bus.subscribe_to(Topic::Perception);
        let _lifecycle = bus.subscribe_to(Topic::Lifecycle);

        bus.publish_to(Topic::Lifecycle, transition(GuidanceState::Guiding))?;

        let result = tokio::time::timeout(Duration::from_millis(50), perception.recv()).await;
        assert!(result.is_err(), "perception must not see lifecycle events");
        Ok(())
    }

    #[test]
    fn audio_feed_holds_latest_frame() {
        let bus = EventBus::default();
        let feed = bus.audio_feed();
        assert!(feed.borrow().is_silent());

        let frame = AudioControl {
            continuous_volume: 0.6,
            ..AudioControl::silent()
        };
        bus.publish_audio("test", frame);
        bus.publish_audio(
            "test",
            AudioControl {
                continuous_volume: 0.8,
                ..frame
            },
        );
        assert!((feed.borrow().continuous_volume - 0.8).abs() < 1e-6);
        assert!((bus.latest_audio().continuous_volume - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn audio_feed_wakes_on_change() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut feed = bus.audio_feed();
        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish_audio(
                "test",
                AudioControl {
                    alert_active: true,
                    alert_volume: 1.0,
                    ..AudioControl::silent()
                },
            );
        });
        tokio::time::timeout(Duration::from_secs(1), feed.changed()).await??;
        assert!(feed.borrow().alert_active);
        Ok(())
    }

    #[test]
    fn try_recv_drains_audio_topic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Audio);
        bus.publish_audio("test", AudioControl::silent());
        assert!(matches!(
            rx.try_recv().map(|e| e.payload),
            Some(EventPayload::Audio(_))
        ));
        assert!(rx.try_recv().is_none());
        assert_eq!(rx.topic(), Topic::Audio);
    }
}
