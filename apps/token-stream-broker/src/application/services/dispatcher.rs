//! Dispatcher
//!
//! Turns one upstream event into per-consumer deliveries. Only consumers
//! whose subscription kind matches the event receive it; broker-owned
//! derived entries never produce a delivery.

use crate::domain::streaming::{
    ConsumerMessage, FeedEvent, PriceData, PriceUpdate, ReplayCache, TradeEvent, TradeFeedData,
};
use crate::domain::subscription::{SessionId, SubscriptionKind, SubscriptionRegistry, Topic};

/// A message addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Target session.
    pub session: SessionId,
    /// Message to deliver.
    pub message: ConsumerMessage,
}

/// Routes feed events to consumers and maintains the replay cache.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    reference: Topic,
}

impl Dispatcher {
    /// Create a dispatcher for the given reference asset.
    #[must_use]
    pub const fn new(reference: Topic) -> Self {
        Self { reference }
    }

    /// Fan one event out to the consumers subscribed to its topic.
    ///
    /// Events for topics nobody follows are dropped without touching the cache.
    pub fn dispatch(
        &self,
        event: FeedEvent,
        registry: &SubscriptionRegistry,
        cache: &mut ReplayCache,
        now_ms: i64,
    ) -> Vec<Delivery> {
        if !registry.contains_topic(event.topic()) {
            tracing::trace!(topic = %event.topic().short(), "Dropping event for unfollowed topic");
            return vec![];
        }

        match event {
            FeedEvent::Price(update) => self.dispatch_price(update, registry, cache, now_ms),
            FeedEvent::Trade(event) => Self::dispatch_trade(event, registry, cache, now_ms),
        }
    }

    fn dispatch_price(
        &self,
        update: PriceUpdate,
        registry: &SubscriptionRegistry,
        cache: &mut ReplayCache,
        now_ms: i64,
    ) -> Vec<Delivery> {
        if update.topic == self.reference {
            cache.set_reference_price(update.price);
        }

        let data = PriceData {
            derived_cross_rate: cache.cross_rate(update.price),
            topic: update.topic,
            price: update.price,
            change_percent_24h: update.change_percent_24h,
            timestamp_ms: now_ms,
        };
        cache.record_price(data.clone());

        registry
            .consumers_of(&data.topic, SubscriptionKind::Price)
            .into_iter()
            .map(|session| Delivery {
                session,
                message: ConsumerMessage::price(data.clone()),
            })
            .collect()
    }

    fn dispatch_trade(
        event: TradeEvent,
        registry: &SubscriptionRegistry,
        cache: &mut ReplayCache,
        now_ms: i64,
    ) -> Vec<Delivery> {
        let trades = cache.record_trade(&event.topic, event.trade);
        let data = TradeFeedData {
            topic: event.topic,
            trades,
            timestamp_ms: now_ms,
        };

        registry
            .consumers_of(&data.topic, SubscriptionKind::TradeFeed)
            .into_iter()
            .map(|session| Delivery {
                session,
                message: ConsumerMessage::trade_feed(data.clone()),
            })
            .collect()
    }

    /// Cached state for a new subscriber, shaped like a live message.
    ///
    /// Returns `None` when nothing is cached for the topic and kind.
    #[must_use]
    pub fn backfill(
        &self,
        topic: &Topic,
        kind: SubscriptionKind,
        cache: &ReplayCache,
        now_ms: i64,
    ) -> Option<ConsumerMessage> {
        match kind {
            SubscriptionKind::Price => cache.last_price(topic).map(|cached| {
                ConsumerMessage::price(PriceData {
                    derived_cross_rate: cache.cross_rate(cached.price),
                    timestamp_ms: now_ms,
                    ..cached.clone()
                })
            }),
            SubscriptionKind::TradeFeed => {
                let trades = cache.trades(topic);
                (!trades.is_empty()).then(|| {
                    ConsumerMessage::trade_feed(TradeFeedData {
                        topic: topic.clone(),
                        trades,
                        timestamp_ms: now_ms,
                    })
                })
            }
        }
    }
}
