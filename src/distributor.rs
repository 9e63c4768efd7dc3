// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    ApplicationMessage, ApplicationMessageType, ApplicationSays, AttributeSet, ClusterApplication,
    Confirmables, Configuration, Node, NodeSet, OperationalOutboundStream, Properties, Result,
    TrackedAttribute,
};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// The `ConfirmingDistributor` turns attribute-set changes into messages,
/// hands them to the outbound stream, and remembers each one in its
/// `Confirmables` ledger until every addressed node has confirmed it.
///
/// It never waits: sends are handed off and the call returns. Confirmations
/// come back later through `acknowledge_confirmation`, and anything still
/// unconfirmed after the redistribution interval is sent again, to just the
/// nodes that have not answered, on every call to `redistribute_unconfirmed`.
/// There is no backoff and (unless `max_redistribution_age_millis` is set) no
/// limit; duplicates are expected and receivers drop them by version.
///
/// The distributor owns its ledger outright. Everything takes `&mut self`, so
/// whatever drives it (an `AttributesAgent` in this crate) is the single
/// writer.
pub struct ConfirmingDistributor<A: ClusterApplication, O: OperationalOutboundStream> {
    application: A,
    confirmables: Confirmables,
    configuration: Configuration,
    node: Node,
    outbound: O,
    properties: Properties,
}

impl<A: ClusterApplication, O: OperationalOutboundStream> ConfirmingDistributor<A, O> {
    pub fn new(
        application: A,
        node: Node,
        outbound: O,
        configuration: Configuration,
        properties: Properties,
    ) -> Self {
        ConfirmingDistributor {
            application,
            confirmables: Confirmables::new(),
            configuration,
            node,
            outbound,
            properties,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn application(&self) -> &A {
        &self.application
    }

    pub fn application_mut(&mut self) -> &mut A {
        &mut self.application
    }

    pub fn outbound(&self) -> &O {
        &self.outbound
    }

    pub fn outbound_mut(&mut self) -> &mut O {
        &mut self.outbound
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn confirmables(&self) -> &Confirmables {
        &self.confirmables
    }

    /// Resolved on every call, so peers added to the configuration since the
    /// last distribution are included.
    pub fn all_other_nodes(&self) -> NodeSet {
        self.configuration.all_other_nodes(self.node.id)
    }

    pub fn acknowledge_confirmation(&mut self, tracking_id: &str, node: &Node) {
        self.confirmables.confirm(tracking_id, node);
    }

    pub fn all_tracking_ids(&self) -> Vec<String> {
        self.confirmables.all_tracking_ids()
    }

    /// Nodes yet to confirm `tracking_id`; empty if it is unknown or done.
    pub fn unconfirmed_nodes_for(&self, tracking_id: &str) -> NodeSet {
        self.confirmables
            .confirmable_of(tracking_id)
            .map(|c| c.unconfirmed_nodes().clone())
            .unwrap_or_default()
    }

    /// Announces `set` to every other node: one `CreateAttributeSet` and then
    /// one `AddAttribute` per live member, each tracked on its own.
    pub fn distribute(&mut self, set: &AttributeSet) -> Result<()> {
        let nodes = self.all_other_nodes();
        self.distribute_to(set, &nodes)
    }

    /// Checks every member before sending anything, so a set holding a
    /// non-finite value is refused whole rather than half announced.
    pub fn distribute_to(&mut self, set: &AttributeSet, nodes: &NodeSet) -> Result<()> {
        for tracked in set.all() {
            tracked.attribute.validate()?;
        }
        let create = ApplicationMessage::create_attribute_set(&self.node, set);
        self.send_tracked(create, nodes)?;
        self.application.inform_attribute_set_created(&set.name);

        let add = ApplicationMessageType::AddAttribute;
        for tracked in set.all() {
            self.distribute_attribute_to(set, tracked, add, nodes)?;
        }
        Ok(())
    }

    /// `message_type` must be `AddAttribute`, `RemoveAttribute` or
    /// `ReplaceAttribute`; anything else is refused before anything is sent.
    pub fn distribute_attribute(
        &mut self,
        set: &AttributeSet,
        tracked: &TrackedAttribute,
        message_type: ApplicationMessageType,
    ) -> Result<()> {
        let nodes = self.all_other_nodes();
        self.distribute_attribute_to(set, tracked, message_type, &nodes)
    }

    pub fn distribute_attribute_to(
        &mut self,
        set: &AttributeSet,
        tracked: &TrackedAttribute,
        message_type: ApplicationMessageType,
        nodes: &NodeSet,
    ) -> Result<()> {
        let message = ApplicationMessage::attribute(message_type, &self.node, set, tracked)?;
        self.send_tracked(message, nodes)?;
        self.inform(message_type, &set.name, tracked.name());
        Ok(())
    }

    /// Replays every set in `sets` to `target` alone, eg. when it (re)joins.
    /// Tombstones go along as `RemoveAttribute`s, so a target that missed a
    /// remove (or still holds an older add) ends up agreeing with us.
    pub fn synchronize_to<'a, I>(&mut self, sets: I, target: &Node) -> Result<()>
    where
        I: IntoIterator<Item = &'a AttributeSet>,
    {
        let only_one_target_node = target.collected();
        let remove = ApplicationMessageType::RemoveAttribute;
        for set in sets {
            self.distribute_to(set, &only_one_target_node)?;
            for tombstone in set.tombstones() {
                self.distribute_attribute_to(set, tombstone, remove, &only_one_target_node)?;
            }
        }
        Ok(())
    }

    /// Tells `to_original_source` that the creation of `set` it sent as
    /// `correlating_message_id` has been applied here.
    ///
    /// Confirmations are not registered in the ledger: nobody ever confirms
    /// a confirmation, so a tracked one would only be redistributed forever.
    /// If it is lost, the originator redistributes the mutation and a fresh
    /// confirmation goes out.
    pub fn confirm_set(
        &mut self,
        correlating_message_id: &str,
        set: &AttributeSet,
        to_original_source: &Node,
    ) -> Result<()> {
        let confirm =
            ApplicationMessage::confirm_attribute_set(correlating_message_id, &self.node, set);
        self.send_untracked(&confirm, to_original_source)?;
        self.application.inform_attribute_set_created(&set.name);
        Ok(())
    }

    /// As `confirm_set`, for an add, remove or replace of `tracked`.
    pub fn confirm_attribute(
        &mut self,
        correlating_message_id: &str,
        set: &AttributeSet,
        tracked: &TrackedAttribute,
        message_type: ApplicationMessageType,
        to_original_source: &Node,
    ) -> Result<()> {
        let confirm = ApplicationMessage::confirm_attribute(
            correlating_message_id,
            &self.node,
            set,
            tracked,
            message_type,
        )?;
        self.send_untracked(&confirm, to_original_source)?;
        self.inform(message_type, &set.name, tracked.name());
        Ok(())
    }

    pub fn redistribute_unconfirmed(&mut self) -> usize {
        self.redistribute_unconfirmed_as_of(Instant::now())
    }

    /// Resends every confirmable older than the redistribution interval to
    /// the nodes still outstanding on it. Returns how many were resent.
    pub fn redistribute_unconfirmed_as_of(&mut self, now: Instant) -> usize {
        if let Some(max_age) = self.properties.max_redistribution_age() {
            for abandoned in self.confirmables.abandon_older_than(max_age, now) {
                warn!("giving up on {} after {:?}", abandoned, abandoned.age_as_of(now));
            }
        }

        let interval = self.properties.redistribution_interval();
        let mut redistributed = 0;
        for confirmable in self.confirmables.all_due_for_redistribution(interval, now) {
            match confirmable.message().to_payload() {
                Ok(payload) => {
                    info!("REDIST: {}", confirmable);
                    self.outbound.application(
                        ApplicationSays::from(&self.node, payload),
                        confirmable.unconfirmed_nodes(),
                    );
                    redistributed += 1;
                }
                Err(e) => warn!("cannot encode {} for redistribution: {}", confirmable, e),
            }
        }
        redistributed
    }

    fn send_tracked(&mut self, message: ApplicationMessage, nodes: &NodeSet) -> Result<()> {
        let payload = message.to_payload()?;
        let confirmable = self.confirmables.register(message, nodes.clone());
        if !confirmable.has_unconfirmed_nodes() {
            trace!("{} has no peers to reach", confirmable);
            return Ok(());
        }
        debug!("node {} distributing {}", self.node, confirmable);
        self.outbound.application(
            ApplicationSays::from(&self.node, payload),
            confirmable.unconfirmed_nodes(),
        );
        Ok(())
    }

    fn send_untracked(&mut self, message: &ApplicationMessage, to: &Node) -> Result<()> {
        let payload = message.to_payload()?;
        debug!(
            "node {} confirming {} to {}",
            self.node,
            message.message_type(),
            to
        );
        self.outbound
            .application(ApplicationSays::from(&self.node, payload), &to.collected());
        Ok(())
    }

    fn inform(
        &mut self,
        message_type: ApplicationMessageType,
        set_name: &str,
        attribute_name: &str,
    ) {
        match message_type {
            ApplicationMessageType::AddAttribute => {
                self.application.inform_attribute_added(set_name, attribute_name)
            }
            ApplicationMessageType::RemoveAttribute => {
                self.application.inform_attribute_removed(set_name, attribute_name)
            }
            ApplicationMessageType::ReplaceAttribute => {
                self.application.inform_attribute_replaced(set_name, attribute_name)
            }
            _ => (),
        }
    }
}
