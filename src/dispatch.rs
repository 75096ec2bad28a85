//! Routes inbound MESSAGE frames to subscription callbacks.
//!
//! Matching order is fixed: read-status topic, then chat-room topic, then
//! notification topic (see [`Destination::parse`]). A frame is delivered
//! only when the stored subscription is for exactly that destination, so a
//! personal channel retargeted to another user never sees the old user's
//! messages.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::destination::Destination;
use crate::error::PayloadError;
use crate::frame::Frame;
use crate::subscription::{SubscriptionKey, SubscriptionRegistry};

/// What happened to one MESSAGE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The callback ran.
    Delivered,
    /// No `destination` header.
    MissingDestination,
    /// Destination matches none of the known patterns.
    UnknownDestination(String),
    /// Known pattern, but nothing subscribed to it.
    NoSubscriber(Destination),
    /// Body is not JSON.
    InvalidPayload(PayloadError),
    /// The callback panicked; the panic was contained.
    CallbackPanicked(Destination),
}

/// Delivery counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames handed to a callback.
    pub delivered: u64,
    /// Frames dropped for any reason.
    pub dropped: u64,
}

/// Stateless apart from its counters.
#[derive(Debug, Default)]
pub struct MessageDispatcher {
    stats: DispatchStats,
}

impl MessageDispatcher {
    /// Dispatcher with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Deliver a MESSAGE frame to its subscriber.
    pub fn dispatch(&mut self, registry: &mut SubscriptionRegistry, frame: &Frame) -> DispatchOutcome {
        let outcome = route(registry, frame);
        match &outcome {
            DispatchOutcome::Delivered => self.stats.delivered += 1,
            DispatchOutcome::MissingDestination => {
                self.stats.dropped += 1;
                log::warn!("[Chat] MESSAGE without destination dropped");
            }
            DispatchOutcome::UnknownDestination(raw) => {
                self.stats.dropped += 1;
                log::warn!("[Chat] MESSAGE for unknown destination {} dropped", raw);
            }
            DispatchOutcome::NoSubscriber(destination) => {
                self.stats.dropped += 1;
                log::debug!("[Chat] No subscriber for {}, dropped", destination);
            }
            DispatchOutcome::InvalidPayload(e) => {
                self.stats.dropped += 1;
                log::warn!("[Chat] {}", e);
            }
            DispatchOutcome::CallbackPanicked(destination) => {
                self.stats.dropped += 1;
                log::error!("[Chat] Subscription callback for {} panicked", destination);
            }
        }
        outcome
    }
}

fn route(registry: &mut SubscriptionRegistry, frame: &Frame) -> DispatchOutcome {
    let Some(raw) = frame.destination() else {
        return DispatchOutcome::MissingDestination;
    };
    let Some(destination) = Destination::parse(raw) else {
        return DispatchOutcome::UnknownDestination(raw.to_string());
    };

    let Some(subscription) = registry
        .get_mut(SubscriptionKey::for_destination(destination))
        .filter(|s| s.destination == destination)
    else {
        return DispatchOutcome::NoSubscriber(destination);
    };

    let payload: serde_json::Value = match serde_json::from_str(&frame.body) {
        Ok(payload) => payload,
        Err(e) => {
            return DispatchOutcome::InvalidPayload(PayloadError {
                destination: raw.to_string(),
                reason: e.to_string(),
            })
        }
    };

    log::trace!("[Chat] Delivering {} to {}", destination, subscription.id);
    let callback = &mut subscription.callback;
    match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
        Ok(()) => DispatchOutcome::Delivered,
        Err(_) => DispatchOutcome::CallbackPanicked(destination),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::frame::Command;
    use crate::subscription::PayloadCallback;

    type Seen = Arc<Mutex<Vec<(&'static str, serde_json::Value)>>>;

    fn recorder(seen: &Seen, tag: &'static str) -> PayloadCallback {
        let seen = Arc::clone(seen);
        Box::new(move |value| seen.lock().expect("lock").push((tag, value)))
    }

    fn message(destination: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", "sub-x")
            .body(body)
    }

    #[test]
    fn test_delivers_only_to_matching_room() {
        let seen = Seen::default();
        let mut registry = SubscriptionRegistry::new();
        registry.upsert(SubscriptionKey::Room(42), Destination::ChatRoom(42), recorder(&seen, "42"));
        registry.upsert(SubscriptionKey::Room(7), Destination::ChatRoom(7), recorder(&seen, "7"));

        let mut dispatcher = MessageDispatcher::new();
        let outcome = dispatcher.dispatch(&mut registry, &message("/topic/chat/42", r#"{"id":1}"#));

        assert_eq!(outcome, DispatchOutcome::Delivered);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "42");
        assert_eq!(seen[0].1["id"], 1);
    }

    #[test]
    fn test_read_status_goes_to_read_callback() {
        let seen = Seen::default();
        let mut registry = SubscriptionRegistry::new();
        registry.upsert(SubscriptionKey::Room(3), Destination::ChatRoom(3), recorder(&seen, "room"));
        registry.upsert(SubscriptionKey::ReadStatus(3), Destination::ReadStatus(3), recorder(&seen, "read"));

        let mut dispatcher = MessageDispatcher::new();
        dispatcher.dispatch(&mut registry, &message("/topic/chat/3/read", "11"));

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.as_slice(), &[("read", serde_json::json!(11))]);
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        let seen = Seen::default();
        let mut registry = SubscriptionRegistry::new();
        registry.upsert(SubscriptionKey::Room(1), Destination::ChatRoom(1), recorder(&seen, "1"));

        let mut dispatcher = MessageDispatcher::new();
        let outcome = dispatcher.dispatch(&mut registry, &message("/topic/chat/1", "{not json"));

        assert!(matches!(outcome, DispatchOutcome::InvalidPayload(ref e) if e.destination == "/topic/chat/1"));
        assert!(seen.lock().expect("lock").is_empty());
        assert_eq!(dispatcher.stats(), DispatchStats { delivered: 0, dropped: 1 });
    }

    #[test]
    fn test_unknown_and_unsubscribed_destinations() {
        let mut registry = SubscriptionRegistry::new();
        let mut dispatcher = MessageDispatcher::new();

        assert_eq!(
            dispatcher.dispatch(&mut registry, &message("/queue/other", "{}")),
            DispatchOutcome::UnknownDestination("/queue/other".to_string())
        );
        assert_eq!(
            dispatcher.dispatch(&mut registry, &message("/topic/chat/5", "{}")),
            DispatchOutcome::NoSubscriber(Destination::ChatRoom(5))
        );
        assert_eq!(
            dispatcher.dispatch(&mut registry, &Frame::new(Command::Message).body("{}")),
            DispatchOutcome::MissingDestination
        );
    }

    #[test]
    fn test_personal_channel_requires_matching_user() {
        let seen = Seen::default();
        let mut registry = SubscriptionRegistry::new();
        registry.upsert(
            SubscriptionKey::Personal,
            Destination::Notifications(8),
            recorder(&seen, "me"),
        );

        let mut dispatcher = MessageDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(&mut registry, &message("/topic/notification/9", "{}")),
            DispatchOutcome::NoSubscriber(Destination::Notifications(9))
        );
        assert_eq!(
            dispatcher.dispatch(&mut registry, &message("/topic/notification/8", "{}")),
            DispatchOutcome::Delivered
        );
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let mut registry = SubscriptionRegistry::new();
        registry.upsert(
            SubscriptionKey::Room(1),
            Destination::ChatRoom(1),
            Box::new(|_: serde_json::Value| panic!("subscriber bug")),
        );

        let mut dispatcher = MessageDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(&mut registry, &message("/topic/chat/1", "{}")),
            DispatchOutcome::CallbackPanicked(Destination::ChatRoom(1))
        );
        // Still registered and callable.
        assert!(registry.get(SubscriptionKey::Room(1)).is_some());
    }
}
