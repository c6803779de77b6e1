//! Delivery registry.
//!
//! Tracks every unsettled delivery of one link and correlates asynchronous
//! disposition updates back to it. Outbound deliveries are registered by
//! `send`; inbound deliveries are observed when a transfer arrives.
//!
//! # Invariants
//!
//! - A tag maps to at most one unsettled delivery.
//! - A change is reported only when the remote view actually changed.
//! - An entry is removed at most once; once removed, later updates for its
//!   tag are ignored.
//! - [`DeliveryId`]s are allocated from a counter and never reused.

use std::collections::{BTreeMap, HashMap};

use linkflow_proto::{DeliveryId, DeliveryTag, Outcome};
use tracing::trace;

use crate::error::CoreError;

/// Which way a delivery travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by this link
    Outbound,
    /// Received by this link
    Inbound,
}

/// Snapshot of a delivery's settlement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryView {
    /// Delivery tag
    pub tag: DeliveryTag,
    /// Last disposition reported by the peer
    pub remote_state: Option<Outcome>,
    /// Peer settled the delivery
    pub remotely_settled: bool,
    /// We settled the delivery
    pub locally_settled: bool,
}

/// One tracked delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    id: DeliveryId,
    tag: DeliveryTag,
    direction: Direction,
    remote_state: Option<Outcome>,
    local_state: Option<Outcome>,
    remotely_settled: bool,
    locally_settled: bool,
    notify: bool,
}

impl Delivery {
    /// Local identity.
    pub fn id(&self) -> DeliveryId {
        self.id
    }

    /// Tag.
    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    /// Direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Outcome we settled with, if any.
    pub fn local_state(&self) -> Option<&Outcome> {
        self.local_state.as_ref()
    }

    /// Whether the peer settled.
    pub fn remotely_settled(&self) -> bool {
        self.remotely_settled
    }

    /// Whether disposition changes should be reported to the application.
    pub fn notify(&self) -> bool {
        self.notify
    }

    /// Current settlement view.
    pub fn view(&self) -> DeliveryView {
        DeliveryView {
            tag: self.tag.clone(),
            remote_state: self.remote_state.clone(),
            remotely_settled: self.remotely_settled,
            locally_settled: self.locally_settled,
        }
    }
}

/// Result of applying a peer disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionChange {
    /// Unknown tag or no change; nothing to report
    Ignored,
    /// Remote view changed
    Updated {
        /// Affected delivery
        id: DeliveryId,
        /// View after the change
        view: DeliveryView,
        /// Whether the application asked to hear about changes
        notify: bool,
        /// Entry was settled locally and removed
        removed: bool,
    },
}

/// Unsettled deliveries of one link.
#[derive(Debug, Default)]
pub struct DeliveryRegistry {
    next_id: u64,
    entries: BTreeMap<DeliveryId, Delivery>,
    tags: HashMap<DeliveryTag, DeliveryId>,
}

impl DeliveryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unsettled deliveries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `tag` belongs to an unsettled delivery.
    pub fn contains_tag(&self, tag: &DeliveryTag) -> bool {
        self.tags.contains_key(tag)
    }

    /// Look up a delivery.
    pub fn get(&self, id: DeliveryId) -> Option<&Delivery> {
        self.entries.get(&id)
    }

    /// Record a new outbound delivery.
    ///
    /// # Errors
    ///
    /// `DuplicateTag` if `tag` is already outstanding.
    pub fn register(&mut self, tag: DeliveryTag, notify: bool) -> Result<DeliveryId, CoreError> {
        self.insert(tag, Direction::Outbound, notify)
    }

    /// Allocate an id for a delivery that needs no tracking, such as one the
    /// peer settled before sending.
    pub fn allocate_untracked(&mut self) -> DeliveryId {
        let id = DeliveryId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Record an inbound delivery so it can be settled later.
    ///
    /// # Errors
    ///
    /// `DuplicateTag` if the peer reused a tag that is still unsettled.
    pub fn observe(&mut self, tag: DeliveryTag) -> Result<DeliveryId, CoreError> {
        self.insert(tag, Direction::Inbound, false)
    }

    fn insert(
        &mut self,
        tag: DeliveryTag,
        direction: Direction,
        notify: bool,
    ) -> Result<DeliveryId, CoreError> {
        if self.tags.contains_key(&tag) {
            return Err(CoreError::DuplicateTag(tag));
        }

        let id = self.allocate_untracked();

        self.tags.insert(tag.clone(), id);
        self.entries.insert(
            id,
            Delivery {
                id,
                tag,
                direction,
                remote_state: None,
                local_state: None,
                remotely_settled: false,
                locally_settled: false,
                notify,
            },
        );
        Ok(id)
    }

    /// Apply a disposition reported by the peer.
    ///
    /// With `auto_settle` and a remotely settled delivery, the entry is
    /// settled locally and removed in the same step.
    pub fn on_disposition_update(
        &mut self,
        tag: &DeliveryTag,
        state: Option<Outcome>,
        remotely_settled: bool,
        auto_settle: bool,
    ) -> DispositionChange {
        let Some(&id) = self.tags.get(tag) else {
            trace!(%tag, "disposition for settled or unknown delivery ignored");
            return DispositionChange::Ignored;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return DispositionChange::Ignored;
        };

        let state = state.or_else(|| entry.remote_state.clone());
        let settled = entry.remotely_settled || remotely_settled;
        if state == entry.remote_state && settled == entry.remotely_settled {
            return DispositionChange::Ignored;
        }

        entry.remote_state = state;
        entry.remotely_settled = settled;

        let removed = settled && auto_settle;
        if removed {
            entry.locally_settled = true;
        }
        let view = entry.view();
        let notify = entry.notify;

        if removed {
            self.remove(id);
        }

        DispositionChange::Updated { id, view, notify, removed }
    }

    /// Settle a delivery locally and remove it.
    ///
    /// # Errors
    ///
    /// `UnknownDelivery` if the delivery is not outstanding.
    pub fn settle(
        &mut self,
        id: DeliveryId,
        outcome: Option<Outcome>,
    ) -> Result<Delivery, CoreError> {
        let mut delivery = self.remove(id).ok_or(CoreError::UnknownDelivery(id))?;
        delivery.locally_settled = true;
        delivery.local_state = outcome;
        Ok(delivery)
    }

    /// Remove every entry in creation order.
    pub fn drain(&mut self) -> Vec<Delivery> {
        self.tags.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    fn remove(&mut self, id: DeliveryId) -> Option<Delivery> {
        let delivery = self.entries.remove(&id)?;
        self.tags.remove(&delivery.tag);
        Some(delivery)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn tag(value: &str) -> DeliveryTag {
        DeliveryTag::from(value)
    }

    #[test]
    fn duplicate_unsettled_tag_is_rejected() {
        let mut registry = DeliveryRegistry::new();
        registry.register(tag("a"), true).unwrap();

        assert_eq!(registry.register(tag("a"), true), Err(CoreError::DuplicateTag(tag("a"))));
        assert_eq!(registry.observe(tag("a")), Err(CoreError::DuplicateTag(tag("a"))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn tag_is_reusable_after_settlement_but_id_is_not() {
        let mut registry = DeliveryRegistry::new();
        let first = registry.register(tag("a"), false).unwrap();
        registry.settle(first, None).unwrap();

        let second = registry.register(tag("a"), false).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn auto_settle_removes_on_remote_settlement() {
        let mut registry = DeliveryRegistry::new();
        let id = registry.register(tag("a"), true).unwrap();

        let change = registry.on_disposition_update(&tag("a"), Some(Outcome::Accepted), true, true);
        match change {
            DispositionChange::Updated { id: changed, view, notify, removed } => {
                assert_eq!(changed, id);
                assert!(notify);
                assert!(removed);
                assert!(view.locally_settled);
                assert_eq!(view.remote_state, Some(Outcome::Accepted));
            },
            DispositionChange::Ignored => panic!("expected an update"),
        }
        assert!(registry.is_empty());

        // Late duplicate is ignored.
        let again = registry.on_disposition_update(&tag("a"), Some(Outcome::Accepted), true, true);
        assert_eq!(again, DispositionChange::Ignored);
    }

    #[test]
    fn manual_settle_keeps_entry_until_application_settles() {
        let mut registry = DeliveryRegistry::new();
        let id = registry.register(tag("a"), true).unwrap();

        let change =
            registry.on_disposition_update(&tag("a"), Some(Outcome::Released), true, false);
        assert!(matches!(change, DispositionChange::Updated { removed: false, .. }));
        assert_eq!(registry.len(), 1);

        // Same disposition again is not a transition.
        let again =
            registry.on_disposition_update(&tag("a"), Some(Outcome::Released), true, false);
        assert_eq!(again, DispositionChange::Ignored);

        let settled = registry.settle(id, None).unwrap();
        assert!(settled.remotely_settled());
        assert!(registry.is_empty());
        assert_eq!(registry.settle(id, None).unwrap_err(), CoreError::UnknownDelivery(id));
    }

    #[test]
    fn unsettled_state_change_is_reported() {
        let mut registry = DeliveryRegistry::new();
        registry.register(tag("a"), true).unwrap();

        let first = registry.on_disposition_update(&tag("a"), Some(Outcome::Accepted), false, true);
        assert!(matches!(first, DispositionChange::Updated { removed: false, .. }));

        // Settling without restating the outcome keeps the outcome.
        let second = registry.on_disposition_update(&tag("a"), None, true, true);
        match second {
            DispositionChange::Updated { view, removed, .. } => {
                assert!(removed);
                assert_eq!(view.remote_state, Some(Outcome::Accepted));
            },
            DispositionChange::Ignored => panic!("expected an update"),
        }
    }

    #[test]
    fn drain_returns_entries_in_creation_order() {
        let mut registry = DeliveryRegistry::new();
        let a = registry.register(tag("a"), false).unwrap();
        let b = registry.observe(tag("b")).unwrap();
        let c = registry.register(tag("c"), true).unwrap();

        let drained: Vec<DeliveryId> = registry.drain().iter().map(Delivery::id).collect();
        assert_eq!(drained, vec![a, b, c]);
        assert!(registry.is_empty());
        assert!(!registry.contains_tag(&tag("a")));
    }

    fn outcome() -> impl Strategy<Value = Option<Outcome>> {
        prop_oneof![
            Just(None),
            Just(Some(Outcome::Accepted)),
            Just(Some(Outcome::Released)),
            Just(Some(Outcome::Rejected { error: None })),
        ]
    }

    proptest! {
        #[test]
        fn one_report_per_distinct_transition(
            updates in proptest::collection::vec((outcome(), any::<bool>()), 0..32),
            auto_settle in any::<bool>(),
        ) {
            let mut registry = DeliveryRegistry::new();
            registry.register(tag("t"), true).unwrap();

            let mut model_state: Option<Outcome> = None;
            let mut model_settled = false;
            let mut removed = false;

            for (state, settled) in updates {
                let change = registry.on_disposition_update(&tag("t"), state.clone(), settled, auto_settle);

                if removed {
                    prop_assert_eq!(change, DispositionChange::Ignored);
                    continue;
                }

                let next_state = state.or_else(|| model_state.clone());
                let next_settled = model_settled || settled;
                let transition = next_state != model_state || next_settled != model_settled;
                model_state = next_state;
                model_settled = next_settled;

                match change {
                    DispositionChange::Ignored => prop_assert!(!transition),
                    DispositionChange::Updated { removed: now_removed, .. } => {
                        prop_assert!(transition);
                        prop_assert_eq!(now_removed, model_settled && auto_settle);
                        removed = now_removed;
                    },
                }
            }

            prop_assert_eq!(registry.is_empty(), removed);
        }
    }
}
