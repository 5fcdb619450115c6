//! Derived-Topic Resolver
//!
//! Price updates carry a cross-rate against a reference asset (wrapped SOL),
//! so the broker must follow the reference asset whenever any consumer wants
//! prices for another topic. That subscription is owned by the broker and
//! tagged as derived in the registry.

use super::{SubscriptionKind, SubscriptionRegistry, Topic};

/// Change to the derived subscription produced by a recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedChange {
    /// Topic to add a derived subscription for.
    pub add: Option<Topic>,
    /// Topic whose derived subscription should be dropped.
    pub remove: Option<Topic>,
}

impl DerivedChange {
    /// Check if there are any changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.add.is_none() && self.remove.is_none()
    }
}

/// Decides when the reference-asset subscription must exist.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    reference: Topic,
}

impl ReferenceResolver {
    /// Create a resolver for the given reference asset.
    #[must_use]
    pub const fn new(reference: Topic) -> Self {
        Self { reference }
    }

    /// The reference asset topic.
    #[must_use]
    pub const fn reference(&self) -> &Topic {
        &self.reference
    }

    /// Compute the derived change implied by the registry's real subscriptions.
    ///
    /// Only derived entries are ever removed, so a consumer's own subscription
    /// to the reference asset survives even when no other price interest remains.
    #[must_use]
    pub fn recompute(&self, registry: &SubscriptionRegistry) -> DerivedChange {
        let needed = registry.has_real_price_interest_outside(&self.reference);
        let present = registry.has_derived(&self.reference);

        match (needed, present) {
            (true, false) => DerivedChange {
                add: Some(self.reference.clone()),
                remove: None,
            },
            (false, true) => DerivedChange {
                add: None,
                remove: Some(self.reference.clone()),
            },
            _ => DerivedChange::default(),
        }
    }

    /// Recompute and apply the change to the registry.
    pub fn apply(&self, registry: &mut SubscriptionRegistry) -> DerivedChange {
        let change = self.recompute(registry);

        if let Some(topic) = &change.add {
            registry.add_derived(topic.clone(), SubscriptionKind::Price);
            tracing::debug!(topic = %topic.short(), "Derived reference subscription added");
        }

        if let Some(topic) = &change.remove {
            registry.remove_derived(topic);
            tracing::debug!(
                topic = %topic.short(),
                manual = registry.has_manual_subscription(topic),
                "Derived reference subscription removed"
            );
        }

        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SessionId;

    const REF: &str = "So11111111111111111111111111111111111111112";

    fn resolver() -> ReferenceResolver {
        ReferenceResolver::new(Topic::from(REF))
    }

    #[test]
    fn price_interest_adds_reference() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Topic::from("T1"), SessionId::from_raw(1), SubscriptionKind::Price);

        let change = resolver().apply(&mut registry);

        assert_eq!(change.add, Some(Topic::from(REF)));
        assert!(registry.has_derived(&Topic::from(REF)));
    }

    #[test]
    fn trade_feed_interest_does_not_add_reference() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(
            Topic::from("T1"),
            SessionId::from_raw(1),
            SubscriptionKind::TradeFeed,
        );

        let change = resolver().apply(&mut registry);

        assert!(change.is_empty());
        assert!(!registry.contains_topic(&Topic::from(REF)));
    }

    #[test]
    fn price_interest_on_reference_alone_does_not_derive() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Topic::from(REF), SessionId::from_raw(1), SubscriptionKind::Price);

        let change = resolver().apply(&mut registry);

        assert!(change.is_empty());
        assert!(!registry.has_derived(&Topic::from(REF)));
    }

    #[test]
    fn losing_price_interest_removes_reference() {
        let mut registry = SubscriptionRegistry::new();
        let session = SessionId::from_raw(1);
        registry.add(Topic::from("T1"), session, SubscriptionKind::Price);
        resolver().apply(&mut registry);

        registry.remove(&Topic::from("T1"), session);
        let change = resolver().apply(&mut registry);

        assert_eq!(change.remove, Some(Topic::from(REF)));
        assert!(registry.is_empty());
    }

    #[test]
    fn manual_reference_subscription_survives_removal() {
        let mut registry = SubscriptionRegistry::new();
        let a = SessionId::from_raw(1);
        let b = SessionId::from_raw(2);

        registry.add(Topic::from("T1"), a, SubscriptionKind::Price);
        resolver().apply(&mut registry);
        registry.add(Topic::from(REF), b, SubscriptionKind::Price);

        registry.remove(&Topic::from("T1"), a);
        resolver().apply(&mut registry);

        assert!(registry.contains_topic(&Topic::from(REF)));
        assert!(!registry.has_derived(&Topic::from(REF)));
        assert_eq!(
            registry.consumers_of(&Topic::from(REF), SubscriptionKind::Price),
            vec![b]
        );
    }

    #[test]
    fn recompute_is_stable_when_nothing_changes() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Topic::from("T1"), SessionId::from_raw(1), SubscriptionKind::Price);
        resolver().apply(&mut registry);

        assert!(resolver().recompute(&registry).is_empty());
    }
}
