// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{ApplicationMessage, Node, NodeSet};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A message awaiting acknowledgment from each of `unconfirmed_nodes`. The
/// node set only ever shrinks; once it is empty the entry leaves the ledger.
#[derive(Clone, Debug)]
pub struct Confirmable {
    message: ApplicationMessage,
    unconfirmed_nodes: NodeSet,
    created_on: Instant,
}

impl Confirmable {
    fn new(message: ApplicationMessage, nodes: NodeSet, created_on: Instant) -> Self {
        Confirmable {
            message,
            unconfirmed_nodes: nodes,
            created_on,
        }
    }

    pub fn tracking_id(&self) -> &str {
        self.message.tracking_id()
    }

    pub fn message(&self) -> &ApplicationMessage {
        &self.message
    }

    pub fn unconfirmed_nodes(&self) -> &NodeSet {
        &self.unconfirmed_nodes
    }

    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    pub fn has_unconfirmed_nodes(&self) -> bool {
        !self.unconfirmed_nodes.is_empty()
    }

    pub fn age_as_of(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_on)
    }

    pub fn is_redistributable_as_of(&self, interval: Duration, now: Instant) -> bool {
        self.age_as_of(now) > interval
    }

    fn confirm(&mut self, node: &Node) -> bool {
        self.unconfirmed_nodes.remove(node).is_some()
    }
}

impl fmt::Display for Confirmable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Confirmable[trackingId={} type={} nodes=[{}]]",
            self.tracking_id(),
            self.message.message_type(),
            self.unconfirmed_nodes.iter().join(", ")
        )
    }
}

/// The ledger of outstanding `Confirmable`s, keyed by tracking id and kept
/// in registration order.
///
/// Nothing here is synchronized: a ledger belongs to exactly one
/// `ConfirmingDistributor`, and every mutation goes through `&mut self`, so
/// the purge-when-empty check in `confirm` cannot interleave with anything.
#[derive(Clone, Debug, Default)]
pub struct Confirmables {
    entries: BTreeMap<u64, Confirmable>,
    by_tracking_id: HashMap<String, u64>,
    next_sequence: u64,
}

impl Confirmables {
    pub fn new() -> Self {
        Confirmables::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `message` as awaiting confirmation from every node in `nodes`.
    /// An empty `nodes` is legal: the returned `Confirmable` is simply never
    /// stored, since there is nobody left to hear from.
    pub fn register(&mut self, message: ApplicationMessage, nodes: NodeSet) -> Confirmable {
        self.register_at(message, nodes, Instant::now())
    }

    pub fn register_at(
        &mut self,
        message: ApplicationMessage,
        nodes: NodeSet,
        now: Instant,
    ) -> Confirmable {
        let confirmable = Confirmable::new(message, nodes, now);
        if !confirmable.has_unconfirmed_nodes() {
            trace!("not tracking {}, no nodes to confirm", confirmable.tracking_id());
            return confirmable;
        }
        let tracking_id = confirmable.tracking_id().to_string();
        if let Some(prior) = self.by_tracking_id.remove(&tracking_id) {
            warn!("re-registering live tracking id {}", tracking_id);
            self.entries.remove(&prior);
        }
        let seq = self.next_sequence;
        self.next_sequence += 1;
        trace!("registered {}", confirmable);
        self.entries.insert(seq, confirmable.clone());
        self.by_tracking_id.insert(tracking_id, seq);
        confirmable
    }

    /// Strikes `node` off the named entry, purging the entry when no nodes
    /// remain. Unknown tracking ids and nodes that were never outstanding are
    /// no-ops, so duplicate acknowledgments are harmless.
    pub fn confirm(&mut self, tracking_id: &str, node: &Node) {
        let seq = match self.by_tracking_id.get(tracking_id) {
            Some(seq) => *seq,
            None => {
                trace!("confirm of untracked {} from {}", tracking_id, node);
                return;
            }
        };
        let now_empty = match self.entries.get_mut(&seq) {
            Some(confirmable) => {
                if confirmable.confirm(node) {
                    trace!("{} confirmed {}", node, tracking_id);
                }
                !confirmable.has_unconfirmed_nodes()
            }
            None => false,
        };
        if now_empty {
            debug!("all nodes confirmed {}, purging", tracking_id);
            self.entries.remove(&seq);
            self.by_tracking_id.remove(tracking_id);
        }
    }

    /// `None` for ids never registered or already fully confirmed.
    pub fn confirmable_of(&self, tracking_id: &str) -> Option<&Confirmable> {
        self.by_tracking_id
            .get(tracking_id)
            .and_then(|seq| self.entries.get(seq))
    }

    /// Every live entry older than `interval` as of `now`. Read-only: ages
    /// are not reset, so an entry keeps being selected until confirmed.
    pub fn all_due_for_redistribution(
        &self,
        interval: Duration,
        now: Instant,
    ) -> impl Iterator<Item = &Confirmable> + '_ {
        self.entries
            .values()
            .filter(move |c| c.is_redistributable_as_of(interval, now))
    }

    pub fn all_tracking_ids(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|c| c.tracking_id().to_string())
            .collect()
    }

    /// Drops every entry older than `max_age`, returning what was dropped.
    pub fn abandon_older_than(&mut self, max_age: Duration, now: Instant) -> Vec<Confirmable> {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, c)| c.age_as_of(now) > max_age)
            .map(|(seq, _)| *seq)
            .collect();
        let mut abandoned = Vec::with_capacity(expired.len());
        for seq in expired {
            if let Some(confirmable) = self.entries.remove(&seq) {
                self.by_tracking_id.remove(confirmable.tracking_id());
                abandoned.push(confirmable);
            }
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeSet, Configuration, Id};
    use proptest::prelude::*;

    fn nodes() -> Vec<Node> {
        vec![Node::new(1, "a"), Node::new(2, "b"), Node::new(3, "c")]
    }

    fn message() -> ApplicationMessage {
        ApplicationMessage::create_attribute_set(&Node::new(1, "a"), &AttributeSet::new("config"))
    }

    fn peers() -> NodeSet {
        Configuration::new(nodes()).all_other_nodes(Id(1))
    }

    #[test]
    fn confirm_shrinks_then_purges() {
        let mut ledger = Confirmables::new();
        let id = ledger.register(message(), peers()).tracking_id().to_string();
        assert_eq!(ledger.confirmable_of(&id).unwrap().unconfirmed_nodes().len(), 2);

        ledger.confirm(&id, &Node::new(2, "b"));
        let remaining = ledger.confirmable_of(&id).unwrap().unconfirmed_nodes();
        assert_eq!(remaining, &Node::new(3, "c").collected());

        ledger.confirm(&id, &Node::new(3, "c"));
        assert!(ledger.confirmable_of(&id).is_none());
        assert!(ledger.all_tracking_ids().is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn unknown_ids_and_strangers_are_no_ops() {
        let mut ledger = Confirmables::new();
        ledger.confirm("never-registered", &Node::new(2, "b"));
        assert!(ledger.confirmable_of("never-registered").is_none());

        let id = ledger.register(message(), peers()).tracking_id().to_string();
        ledger.confirm(&id, &Node::new(9, "stranger"));
        assert_eq!(ledger.confirmable_of(&id).unwrap().unconfirmed_nodes().len(), 2);
    }

    #[test]
    fn empty_destination_set_is_not_tracked() {
        let mut ledger = Confirmables::new();
        let c = ledger.register(message(), NodeSet::new());
        assert!(!c.has_unconfirmed_nodes());
        assert!(ledger.confirmable_of(c.tracking_id()).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn redistribution_selects_only_entries_past_interval() {
        let mut ledger = Confirmables::new();
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let old = ledger.register_at(message(), peers(), start);
        let young = ledger.register_at(message(), peers(), start + Duration::from_millis(80));
        let purged = ledger.register_at(message(), Node::new(2, "b").collected(), start);
        ledger.confirm(purged.tracking_id(), &Node::new(2, "b"));

        let now = start + Duration::from_millis(150);
        let due: Vec<&str> = ledger
            .all_due_for_redistribution(interval, now)
            .map(|c| c.tracking_id())
            .collect();
        assert_eq!(due, vec![old.tracking_id()]);

        // Exactly at the interval is not yet due.
        let due_at_edge = ledger
            .all_due_for_redistribution(interval, start + interval)
            .count();
        assert_eq!(due_at_edge, 0);

        // Selection does not reset ages.
        let again = ledger.all_due_for_redistribution(interval, now).count();
        assert_eq!(again, 1);
        assert!(ledger.confirmable_of(young.tracking_id()).is_some());
    }

    #[test]
    fn tracking_ids_keep_registration_order() {
        let mut ledger = Confirmables::new();
        let ids: Vec<String> = (0..5)
            .map(|_| ledger.register(message(), peers()).tracking_id().to_string())
            .collect();
        assert_eq!(ledger.all_tracking_ids(), ids);
    }

    #[test]
    fn abandon_drops_only_the_old() {
        let mut ledger = Confirmables::new();
        let start = Instant::now();
        let old = ledger.register_at(message(), peers(), start);
        let young = ledger.register_at(message(), peers(), start + Duration::from_secs(5));
        let dropped =
            ledger.abandon_older_than(Duration::from_secs(3), start + Duration::from_secs(6));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].tracking_id(), old.tracking_id());
        assert!(ledger.confirmable_of(old.tracking_id()).is_none());
        assert!(ledger.confirmable_of(young.tracking_id()).is_some());
    }

    proptest! {
        #[test]
        fn confirmation_is_monotone_and_idempotent(
            acks in proptest::collection::vec(0u16..5, 0..20)
        ) {
            let all: Vec<Node> = (1..5).map(|i| Node::new(i, "n")).collect();
            let mut ledger = Confirmables::new();
            let id = ledger
                .register(message(), all.iter().cloned().collect())
                .tracking_id()
                .to_string();
            let mut prev = all.len();
            let mut acked = std::collections::BTreeSet::new();
            for i in acks {
                let node = Node::new(i, "n");
                ledger.confirm(&id, &node);
                ledger.confirm(&id, &node);
                if i >= 1 {
                    acked.insert(i);
                }
                let now = ledger
                    .confirmable_of(&id)
                    .map(|c| c.unconfirmed_nodes().len())
                    .unwrap_or(0);
                prop_assert!(now <= prev);
                prop_assert_eq!(now, all.len() - acked.len());
                prev = now;
            }
            if acked.len() == all.len() {
                prop_assert!(ledger.confirmable_of(&id).is_none());
                prop_assert!(ledger.is_empty());
            }
        }
    }
}
