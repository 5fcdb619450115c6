//! Subscription Registry
//!
//! Domain types for tracking consumer interest in token topics.
//!
//! # Design
//!
//! The registry tracks:
//! - Which (owner, kind) pairs are subscribed to each topic
//! - Which topics each consumer session is subscribed to
//! - The broker's own derived subscriptions, tagged by [`Owner::Broker`]
//!
//! The set of topics requested upstream is always [`SubscriptionRegistry::topics`],
//! so many consumers sharing a topic cost a single upstream subscription.
//! A topic with no remaining subscribers is removed entirely.

pub mod derived;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use derived::{DerivedChange, ReferenceResolver};

// =============================================================================
// Types
// =============================================================================

/// An instrument identifier (token contract address).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the underlying address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened address for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque identifier issued to a consumer session at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a session id from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Kind of data a subscription asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Price snapshots with the derived cross-rate.
    #[serde(rename = "price", alias = "live-price")]
    Price,
    /// Recent-trades list.
    #[serde(rename = "trade-feed")]
    TradeFeed,
}

impl SubscriptionKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::TradeFeed => "trade-feed",
        }
    }
}

/// Who owns a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Owner {
    /// A consumer session.
    Consumer(SessionId),
    /// The broker itself (derived subscription, never delivered to consumers).
    Broker,
}

/// A single registry entry for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    /// Owner of the subscription.
    pub owner: Owner,
    /// Kind of data requested.
    pub kind: SubscriptionKind,
}

impl Subscription {
    /// Subscription owned by a consumer session.
    #[must_use]
    pub const fn consumer(session: SessionId, kind: SubscriptionKind) -> Self {
        Self {
            owner: Owner::Consumer(session),
            kind,
        }
    }

    /// Broker-owned derived subscription.
    #[must_use]
    pub const fn derived(kind: SubscriptionKind) -> Self {
        Self {
            owner: Owner::Broker,
            kind,
        }
    }

    /// Whether this entry is owned by the broker rather than a consumer.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self.owner, Owner::Broker)
    }

    /// Consumer session owning this entry, if any.
    #[must_use]
    pub const fn session(&self) -> Option<SessionId> {
        match self.owner {
            Owner::Consumer(session) => Some(session),
            Owner::Broker => None,
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Tracks subscriptions across all consumers and the broker's derived entries.
///
/// The registry is a plain data structure owned by the broker actor, which
/// serializes every mutation. It never hands out references to its maps.
///
/// # Example
///
/// ```rust
/// use token_stream_broker::domain::subscription::{
///     SessionId, SubscriptionKind, SubscriptionRegistry, Topic,
/// };
///
/// let mut registry = SubscriptionRegistry::new();
/// let a = SessionId::from_raw(1);
/// let b = SessionId::from_raw(2);
///
/// // Two consumers share one topic - one upstream subscription
/// registry.add(Topic::from("TOKEN"), a, SubscriptionKind::Price);
/// registry.add(Topic::from("TOKEN"), b, SubscriptionKind::TradeFeed);
/// assert_eq!(registry.topics().len(), 1);
///
/// // Consumer A leaves - still subscribed via B
/// registry.remove_all_for_consumer(a);
/// assert!(registry.contains_topic(&Topic::from("TOKEN")));
///
/// // Consumer B leaves - topic gone
/// registry.remove(&Topic::from("TOKEN"), b);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Map from topic to its subscribers.
    topic_subscribers: HashMap<Topic, HashSet<Subscription>>,
    /// Map from consumer to the topics it subscribed to.
    consumer_topics: HashMap<SessionId, HashSet<Topic>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer subscription.
    ///
    /// Returns `true` if the (topic, consumer, kind) entry was not present.
    pub fn add(&mut self, topic: Topic, consumer: SessionId, kind: SubscriptionKind) -> bool {
        let inserted = self
            .topic_subscribers
            .entry(topic.clone())
            .or_default()
            .insert(Subscription::consumer(consumer, kind));

        self.consumer_topics
            .entry(consumer)
            .or_default()
            .insert(topic);

        inserted
    }

    /// Remove every kind a consumer holds on a topic.
    ///
    /// Returns `true` if anything was removed. Unknown pairs are a no-op.
    pub fn remove(&mut self, topic: &Topic, consumer: SessionId) -> bool {
        let Some(topics) = self.consumer_topics.get_mut(&consumer) else {
            return false;
        };

        if !topics.remove(topic) {
            return false;
        }

        // Clean up empty consumer entry
        if topics.is_empty() {
            self.consumer_topics.remove(&consumer);
        }

        self.retain_on_topic(topic, |sub| sub.session() != Some(consumer));
        true
    }

    /// Remove all subscriptions for a consumer.
    ///
    /// Returns the topics the consumer was subscribed to.
    pub fn remove_all_for_consumer(&mut self, consumer: SessionId) -> Vec<Topic> {
        let Some(topics) = self.consumer_topics.remove(&consumer) else {
            return vec![];
        };

        let mut removed: Vec<Topic> = topics.into_iter().collect();
        removed.sort();

        for topic in &removed {
            self.retain_on_topic(topic, |sub| sub.session() != Some(consumer));
        }

        removed
    }

    /// Insert a broker-owned derived subscription.
    ///
    /// Returns `true` if it was not present.
    pub fn add_derived(&mut self, topic: Topic, kind: SubscriptionKind) -> bool {
        self.topic_subscribers
            .entry(topic)
            .or_default()
            .insert(Subscription::derived(kind))
    }

    /// Remove the broker-owned derived subscriptions on a topic.
    ///
    /// Consumer subscriptions on the same topic are left untouched.
    pub fn remove_derived(&mut self, topic: &Topic) -> bool {
        let before = self.subscriber_count(topic);
        self.retain_on_topic(topic, |sub| !sub.is_derived());
        before != self.subscriber_count(topic)
    }

    /// Every topic with at least one subscriber, derived entries included.
    #[must_use]
    pub fn topics(&self) -> BTreeSet<Topic> {
        self.topic_subscribers.keys().cloned().collect()
    }

    /// Subscribers of a topic in a stable order.
    #[must_use]
    pub fn subscribers_of(&self, topic: &Topic) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .topic_subscribers
            .get(topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        subs.sort();
        subs
    }

    /// Consumer sessions subscribed to a topic with the given kind.
    #[must_use]
    pub fn consumers_of(&self, topic: &Topic, kind: SubscriptionKind) -> Vec<SessionId> {
        self.subscribers_of(topic)
            .into_iter()
            .filter(|sub| sub.kind == kind)
            .filter_map(|sub| sub.session())
            .collect()
    }

    /// Topics a consumer is subscribed to.
    #[must_use]
    pub fn consumer_topics(&self, consumer: SessionId) -> BTreeSet<Topic> {
        self.consumer_topics
            .get(&consumer)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a topic has any subscriber.
    #[must_use]
    pub fn contains_topic(&self, topic: &Topic) -> bool {
        self.topic_subscribers.contains_key(topic)
    }

    /// Whether the broker holds a derived subscription on a topic.
    #[must_use]
    pub fn has_derived(&self, topic: &Topic) -> bool {
        self.topic_subscribers
            .get(topic)
            .is_some_and(|subs| subs.iter().any(Subscription::is_derived))
    }

    /// Whether a consumer subscribed to the topic directly.
    #[must_use]
    pub fn has_manual_subscription(&self, topic: &Topic) -> bool {
        self.topic_subscribers
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|sub| !sub.is_derived()))
    }

    /// Whether any consumer holds a price subscription on a topic other than `excluded`.
    #[must_use]
    pub fn has_real_price_interest_outside(&self, excluded: &Topic) -> bool {
        self.topic_subscribers
            .iter()
            .filter(|(topic, _)| *topic != excluded)
            .any(|(_, subs)| {
                subs.iter()
                    .any(|sub| !sub.is_derived() && sub.kind == SubscriptionKind::Price)
            })
    }

    /// Whether no topic is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topic_subscribers.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let shared_topics = self
            .topic_subscribers
            .values()
            .filter(|subs| {
                subs.iter()
                    .filter_map(Subscription::session)
                    .collect::<HashSet<_>>()
                    .len()
                    > 1
            })
            .count();

        RegistryStats {
            topic_count: self.topic_subscribers.len(),
            consumer_count: self.consumer_topics.len(),
            subscription_count: self.topic_subscribers.values().map(HashSet::len).sum(),
            shared_topics,
        }
    }

    fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topic_subscribers.get(topic).map_or(0, HashSet::len)
    }

    /// Keep only matching subscribers on a topic, dropping the topic once empty.
    fn retain_on_topic(&mut self, topic: &Topic, keep: impl Fn(&Subscription) -> bool) {
        if let Some(subs) = self.topic_subscribers.get_mut(topic) {
            subs.retain(|sub| keep(sub));
            if subs.is_empty() {
                self.topic_subscribers.remove(topic);
            }
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of topics requested upstream.
    pub topic_count: usize,
    /// Number of consumers with at least one subscription.
    pub consumer_count: usize,
    /// Number of registry entries, derived included.
    pub subscription_count: usize,
    /// Topics followed by more than one consumer.
    pub shared_topics: usize,
}

// =============================================================================
// Tests
// =============================================================================
