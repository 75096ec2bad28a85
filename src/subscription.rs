//! Subscription table.
//!
//! One entry per logical key: a room, a room's read-status topic, or the
//! single personal-notification channel. [`SubscriptionRegistry::upsert`] is
//! the only way in, so a key never maps to two server-side subscriptions.

use std::collections::HashMap;

use crate::destination::Destination;

/// Callback receiving the parsed JSON body of a MESSAGE frame.
pub type PayloadCallback = Box<dyn FnMut(serde_json::Value) + Send>;

/// Logical key of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Chat messages for a room.
    Room(i64),
    /// Read-status updates for a room.
    ReadStatus(i64),
    /// The personal-notification channel (whichever user it is for).
    Personal,
}

impl SubscriptionKey {
    /// Key under which a subscription to `destination` is stored.
    #[must_use]
    pub fn for_destination(destination: Destination) -> Self {
        match destination {
            Destination::ChatRoom(room) => Self::Room(room),
            Destination::ReadStatus(room) => Self::ReadStatus(room),
            Destination::Notifications(_) => Self::Personal,
        }
    }
}

/// Client-generated subscription id, sent in the SUBSCRIBE `id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An active subscription.
pub struct Subscription {
    /// Id sent with SUBSCRIBE / UNSUBSCRIBE.
    pub id: SubscriptionId,
    /// Subscribed destination.
    pub destination: Destination,
    /// Invoked for every MESSAGE on `destination`.
    pub callback: PayloadCallback,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// What [`SubscriptionRegistry::upsert`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// New key; a SUBSCRIBE with this id is needed.
    Inserted(SubscriptionId),
    /// Same key and destination; only the callback changed.
    Replaced,
    /// Same key, new destination (personal channel for another user):
    /// UNSUBSCRIBE `previous`, SUBSCRIBE `current`.
    Retargeted {
        /// Id of the replaced server subscription.
        previous: SubscriptionId,
        /// Id for the new server subscription.
        current: SubscriptionId,
    },
}

/// Active subscriptions keyed by [`SubscriptionKey`].
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, Subscription>,
    /// Never reset, so ids stay unique for the client's lifetime.
    sequence: u64,
}

impl SubscriptionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription for `key`.
    pub fn upsert(&mut self, key: SubscriptionKey, destination: Destination, callback: PayloadCallback) -> Upsert {
        let same_destination = self.entries.get(&key).map(|existing| existing.destination == destination);
        if same_destination == Some(true) {
            if let Some(existing) = self.entries.get_mut(&key) {
                existing.callback = callback;
            }
            return Upsert::Replaced;
        }

        let id = self.next_id(destination);
        let previous = self.entries.insert(
            key,
            Subscription {
                id: id.clone(),
                destination,
                callback,
            },
        );
        match previous {
            Some(previous) => Upsert::Retargeted {
                previous: previous.id,
                current: id,
            },
            None => Upsert::Inserted(id),
        }
    }

    /// Remove and return the subscription for `key`.
    pub fn remove(&mut self, key: SubscriptionKey) -> Option<Subscription> {
        self.entries.remove(&key)
    }

    /// Subscription for `key`.
    #[must_use]
    pub fn get(&self, key: SubscriptionKey) -> Option<&Subscription> {
        self.entries.get(&key)
    }

    /// Mutable subscription for `key` (to invoke its callback).
    pub fn get_mut(&mut self, key: SubscriptionKey) -> Option<&mut Subscription> {
        self.entries.get_mut(&key)
    }

    /// Drop every subscription. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Room ids with a chat subscription, ascending.
    #[must_use]
    pub fn rooms(&self) -> Vec<i64> {
        let mut rooms: Vec<i64> = self
            .entries
            .keys()
            .filter_map(|key| match key {
                SubscriptionKey::Room(room) => Some(*room),
                _ => None,
            })
            .collect();
        rooms.sort_unstable();
        rooms
    }

    fn next_id(&mut self, destination: Destination) -> SubscriptionId {
        self.sequence += 1;
        let seq = self.sequence;
        SubscriptionId(match destination {
            Destination::ChatRoom(room) => format!("sub-{room}-{seq}"),
            Destination::ReadStatus(room) => format!("sub-read-{room}-{seq}"),
            Destination::Notifications(user) => format!("sub-notification-{user}-{seq}"),
        })
    }
}
