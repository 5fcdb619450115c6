//! Replay Cache
//!
//! Bounded per-topic history used to backfill late-joining consumers and to
//! compute cross-rates against the reference asset.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;

use super::{PriceData, Trade};
use crate::domain::subscription::Topic;

/// Default number of trades kept per topic.
pub const DEFAULT_REPLAY_DEPTH: usize = 20;

/// Cached state for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedEntry {
    /// Most recent trades, newest first.
    trades: VecDeque<Trade>,
    /// Last price snapshot delivered for the topic.
    last_price: Option<PriceData>,
}

impl CachedEntry {
    /// Trades, newest first.
    #[must_use]
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.iter().cloned().collect()
    }

    /// Last price snapshot.
    #[must_use]
    pub const fn last_price(&self) -> Option<&PriceData> {
        self.last_price.as_ref()
    }
}

/// Per-topic trade history, last-price snapshots, and the reference price.
#[derive(Debug, Clone)]
pub struct ReplayCache {
    depth: usize,
    entries: HashMap<Topic, CachedEntry>,
    reference_price: Option<Decimal>,
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_DEPTH)
    }
}

impl ReplayCache {
    /// Create a cache keeping at most `depth` trades per topic.
    ///
    /// A depth of zero is raised to one.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            entries: HashMap::new(),
            reference_price: None,
        }
    }

    /// Maximum trades kept per topic.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Prepend a trade and return the topic's full list, newest first.
    pub fn record_trade(&mut self, topic: &Topic, trade: Trade) -> Vec<Trade> {
        let entry = self.entries.entry(topic.clone()).or_default();
        entry.trades.push_front(trade);
        entry.trades.truncate(self.depth);
        entry.trades()
    }

    /// Overwrite the topic's last price snapshot.
    pub fn record_price(&mut self, data: PriceData) {
        let topic = data.topic.clone();
        self.entries.entry(topic).or_default().last_price = Some(data);
    }

    /// Cached trades for a topic, newest first.
    #[must_use]
    pub fn trades(&self, topic: &Topic) -> Vec<Trade> {
        self.entries
            .get(topic)
            .map(CachedEntry::trades)
            .unwrap_or_default()
    }

    /// Last price snapshot for a topic.
    #[must_use]
    pub fn last_price(&self, topic: &Topic) -> Option<&PriceData> {
        self.entries.get(topic).and_then(CachedEntry::last_price)
    }

    /// Update the reference asset price.
    pub const fn set_reference_price(&mut self, price: Decimal) {
        self.reference_price = Some(price);
    }

    /// Current reference price, if one has been seen.
    #[must_use]
    pub const fn reference_price(&self) -> Option<Decimal> {
        self.reference_price
    }

    /// Price expressed in units of the reference asset.
    ///
    /// Zero when the reference price is unknown or zero, or the division overflows.
    #[must_use]
    pub fn cross_rate(&self, price: Decimal) -> Decimal {
        self.reference_price
            .filter(|reference| !reference.is_zero())
            .and_then(|reference| price.checked_div(reference))
            .unwrap_or(Decimal::ZERO)
    }

    /// Drop cached state for a topic nobody follows anymore.
    pub fn evict(&mut self, topic: &Topic) {
        self.entries.remove(topic);
    }

    /// Number of topics with cached state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.reference_price.is_none()
    }

    /// Forget everything, reference price included.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reference_price = None;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::domain::streaming::TradeSide;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade(n: i64) -> Trade {
        Trade {
            id: format!("tx-{n}"),
            price: dec("1"),
            amount: dec("10"),
            timestamp_ms: n,
            side: TradeSide::Sell,
            external_ref: format!("tx-{n}"),
        }
    }

    #[test]
    fn trades_are_newest_first_and_bounded() {
        let mut cache = ReplayCache::default();
        let topic = Topic::from("TOKEN");

        for n in 0..25 {
            cache.record_trade(&topic, trade(n));
        }

        let trades = cache.trades(&topic);
        assert_eq!(trades.len(), DEFAULT_REPLAY_DEPTH);
        assert_eq!(trades[0].timestamp_ms, 24);
        assert_eq!(trades[19].timestamp_ms, 5);
    }

    #[test]
    fn record_trade_returns_full_list() {
        let mut cache = ReplayCache::new(3);
        let topic = Topic::from("TOKEN");

        cache.record_trade(&topic, trade(1));
        let list = cache.record_trade(&topic, trade(2));

        assert_eq!(
            list.iter().map(|t| t.timestamp_ms).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn cross_rate_is_zero_without_reference() {
        let mut cache = ReplayCache::default();
        assert_eq!(cache.cross_rate(dec("5")), Decimal::ZERO);

        cache.set_reference_price(Decimal::ZERO);
        assert_eq!(cache.cross_rate(dec("5")), Decimal::ZERO);
    }

    #[test]
    fn cross_rate_divides_by_reference() {
        let mut cache = ReplayCache::default();
        cache.set_reference_price(dec("200"));

        assert_eq!(cache.cross_rate(dec("50")), dec("0.25"));
    }

    #[test]
    fn cross_rate_overflow_is_zero() {
        let mut cache = ReplayCache::default();
        cache.set_reference_price(dec("0.0000000000000000000000000001"));

        assert_eq!(cache.cross_rate(Decimal::MAX), Decimal::ZERO);
    }

    #[test]
    fn last_price_is_overwritten() {
        let mut cache = ReplayCache::default();
        let topic = Topic::from("TOKEN");

        for price in ["1", "2"] {
            cache.record_price(PriceData {
                topic: topic.clone(),
                price: dec(price),
                derived_cross_rate: Decimal::ZERO,
                change_percent_24h: Decimal::ZERO,
                timestamp_ms: 0,
            });
        }

        assert_eq!(cache.last_price(&topic).map(|p| p.price), Some(dec("2")));
    }

    #[test]
    fn clear_forgets_reference_price() {
        let mut cache = ReplayCache::default();
        cache.record_trade(&Topic::from("TOKEN"), trade(1));
        cache.set_reference_price(dec("150"));

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.reference_price(), None);
    }

    #[test]
    fn evict_drops_topic_only() {
        let mut cache = ReplayCache::default();
        cache.record_trade(&Topic::from("A"), trade(1));
        cache.record_trade(&Topic::from("B"), trade(2));

        cache.evict(&Topic::from("A"));

        assert!(cache.trades(&Topic::from("A")).is_empty());
        assert_eq!(cache.len(), 1);
    }
}
