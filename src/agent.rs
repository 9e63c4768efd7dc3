// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    ApplicationMessage, ApplicationMessageType, ApplicationSays, Attribute, AttributeSet,
    AttributeValue, ClusterApplication, Configuration, ConfirmingDistributor, Error, Node,
    OperationalOutboundStream, Properties, Result, TrackedAttribute,
};
use im::OrdMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// An `AttributesAgent` is one node's view of the replicated attribute sets,
/// plus the `ConfirmingDistributor` that keeps its peers in step.
///
/// It is an explicit state machine with no runtime of its own: the embedding
/// process feeds it local commands, inbound envelopes and timer ticks, one at
/// a time, and drains whatever lands in its outbound stream. That serial
/// feeding is the only concurrency control the ledger needs.
pub struct AttributesAgent<A: ClusterApplication, O: OperationalOutboundStream> {
    distributor: ConfirmingDistributor<A, O>,
    sets: OrdMap<String, AttributeSet>,
}

impl<A: ClusterApplication, O: OperationalOutboundStream> AttributesAgent<A, O> {
    pub fn new(
        node: Node,
        application: A,
        outbound: O,
        configuration: Configuration,
        properties: Properties,
    ) -> Self {
        AttributesAgent {
            distributor: ConfirmingDistributor::new(
                application,
                node,
                outbound,
                configuration,
                properties,
            ),
            sets: OrdMap::new(),
        }
    }

    pub fn node(&self) -> &Node {
        self.distributor.node()
    }

    pub fn distributor(&self) -> &ConfirmingDistributor<A, O> {
        &self.distributor
    }

    pub fn distributor_mut(&mut self) -> &mut ConfirmingDistributor<A, O> {
        &mut self.distributor
    }

    pub fn attribute_set(&self, name: &str) -> Option<&AttributeSet> {
        self.sets.get(name)
    }

    pub fn all_attribute_sets(&self) -> impl Iterator<Item = &AttributeSet> + '_ {
        self.sets.values()
    }

    // Local commands.

    /// Adds an attribute, creating (and announcing) the set if this is its
    /// first member. Returns false if a live attribute of that name exists.
    /// NaN and infinite floats fail with `Error::NonFiniteValue` and change
    /// nothing.
    pub fn add<V: Into<AttributeValue>>(
        &mut self,
        set_name: &str,
        attribute_name: &str,
        value: V,
    ) -> Result<bool> {
        let attribute = Attribute::new(attribute_name, value);
        attribute.validate()?;
        if !self.sets.contains_key(set_name) {
            let mut set = AttributeSet::new(set_name);
            set.add(attribute);
            self.distributor.distribute(&set)?;
            self.sets.insert(set_name.to_string(), set);
            return Ok(true);
        }
        let set = self.set_mut(set_name)?;
        match set.add(attribute) {
            Some(tracked) => {
                let set = set.clone();
                self.distributor
                    .distribute_attribute(&set, &tracked, ApplicationMessageType::AddAttribute)?;
                Ok(true)
            }
            None => {
                debug!("{} already in set {}, not adding", attribute_name, set_name);
                Ok(false)
            }
        }
    }

    pub fn replace<V: Into<AttributeValue>>(
        &mut self,
        set_name: &str,
        attribute_name: &str,
        value: V,
    ) -> Result<()> {
        let attribute = Attribute::new(attribute_name, value);
        attribute.validate()?;
        let set = self.set_mut(set_name)?;
        let tracked = set
            .replace(attribute)
            .ok_or_else(|| unknown_attribute(set_name, attribute_name))?;
        let set = set.clone();
        self.distributor
            .distribute_attribute(&set, &tracked, ApplicationMessageType::ReplaceAttribute)
    }

    pub fn remove(&mut self, set_name: &str, attribute_name: &str) -> Result<()> {
        let set = self.set_mut(set_name)?;
        let tracked = set
            .remove(attribute_name)
            .ok_or_else(|| unknown_attribute(set_name, attribute_name))?;
        let set = set.clone();
        self.distributor
            .distribute_attribute(&set, &tracked, ApplicationMessageType::RemoveAttribute)
    }

    pub fn remove_all(&mut self, set_name: &str) -> Result<()> {
        let set = self.set_mut(set_name)?;
        let removed = set.remove_all();
        let set = set.clone();
        for tracked in removed {
            self.distributor
                .distribute_attribute(&set, &tracked, ApplicationMessageType::RemoveAttribute)?;
        }
        Ok(())
    }

    // Cluster events.

    /// Sends every local set to `node` alone.
    pub fn synchronize(&mut self, node: &Node) -> Result<()> {
        debug!("node {} synchronizing {} sets to {}", self.node(), self.sets.len(), node);
        self.distributor.synchronize_to(self.sets.values(), node)
    }

    /// Records `node` as a peer, so later broadcasts include it, and brings
    /// it up to date.
    pub fn node_joined(&mut self, node: Node) -> Result<()> {
        if self.distributor.configuration_mut().add_node(node.clone()) {
            info!("node {} joined", node);
        }
        self.synchronize(&node)
    }

    /// How often the embedding process should call `interval_signal`, from
    /// `redistribution_sweep_millis`.
    pub fn sweep_interval(&self) -> Duration {
        self.distributor.properties().redistribution_sweep()
    }

    /// Timer entry point, to be called every `sweep_interval()`. Returns how
    /// many messages were redistributed.
    pub fn interval_signal(&mut self) -> usize {
        self.tick(Instant::now())
    }

    pub fn tick(&mut self, now: Instant) -> usize {
        self.distributor.redistribute_unconfirmed_as_of(now)
    }

    // Inbound.

    /// Decodes and applies one envelope from a peer. Envelopes from nodes not
    /// in the configuration, and attribute changes for sets not (yet) known
    /// here, are logged and dropped unconfirmed; the originator will resend.
    pub fn handle_inbound(&mut self, says: &ApplicationSays) -> Result<()> {
        let sender = match self.distributor.configuration().node_matching(says.id) {
            Some(node) => node.clone(),
            None => {
                warn!("dropping message from unknown node {}#{}", says.name, says.id);
                return Ok(());
            }
        };
        let message = ApplicationMessage::from_payload(&says.payload)?;
        trace!(
            "node {} received {} {} from {}",
            self.node(),
            message.message_type(),
            message.tracking_id(),
            sender
        );
        self.receive(message, &sender)
    }

    fn receive(&mut self, message: ApplicationMessage, sender: &Node) -> Result<()> {
        let message_type = message.message_type();
        match message {
            ApplicationMessage::CreateAttributeSet {
                tracking_id, set, ..
            } => {
                if !self.sets.contains_key(&set) {
                    debug!("node {} creating set {}", self.node(), set);
                    self.sets.insert(set.clone(), AttributeSet::new(&set));
                }
                let local = self.set_mut(&set)?.clone();
                self.distributor.confirm_set(&tracking_id, &local, sender)
            }
            ApplicationMessage::AddAttribute {
                tracking_id,
                set,
                tracked,
                ..
            }
            | ApplicationMessage::RemoveAttribute {
                tracking_id,
                set,
                tracked,
                ..
            }
            | ApplicationMessage::ReplaceAttribute {
                tracking_id,
                set,
                tracked,
                ..
            } => self.apply_and_confirm(message_type, &tracking_id, &set, &tracked, sender),
            ApplicationMessage::ConfirmAttributeSet {
                correlating_message_id,
                ..
            }
            | ApplicationMessage::ConfirmAttribute {
                correlating_message_id,
                ..
            } => {
                self.distributor
                    .acknowledge_confirmation(&correlating_message_id, sender);
                Ok(())
            }
        }
    }

    // Duplicates and stale versions are still confirmed: the sender only
    // stops redistributing once it hears back, whatever we did with it.
    fn apply_and_confirm(
        &mut self,
        message_type: ApplicationMessageType,
        tracking_id: &str,
        set_name: &str,
        tracked: &TrackedAttribute,
        sender: &Node,
    ) -> Result<()> {
        let local = match self.sets.get_mut(set_name) {
            Some(local) => local,
            None => {
                warn!(
                    "node {} has no set {} for {} from {}, awaiting its creation",
                    self.distributor.node(),
                    set_name,
                    message_type,
                    sender
                );
                return Ok(());
            }
        };
        if local.apply(tracked) {
            debug!(
                "node {} applied {} {} v{}",
                self.distributor.node(),
                message_type,
                tracked.name(),
                tracked.version
            );
        }
        let local = local.clone();
        self.distributor
            .confirm_attribute(tracking_id, &local, tracked, message_type, sender)
    }

    fn set_mut(&mut self, set_name: &str) -> Result<&mut AttributeSet> {
        self.sets
            .get_mut(set_name)
            .ok_or_else(|| Error::UnknownAttributeSet(set_name.to_string()))
    }
}

fn unknown_attribute(set_name: &str, attribute_name: &str) -> Error {
    Error::UnknownAttribute {
        set: set_name.to_string(),
        attribute: attribute_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApplicationEvent, Outbound};

    type Agent = AttributesAgent<Vec<ApplicationEvent>, Vec<Outbound>>;

    fn agent(node: Node) -> Agent {
        AttributesAgent::new(
            node,
            Vec::new(),
            Vec::new(),
            Configuration::new(vec![Node::new(1, "a"), Node::new(2, "b")]),
            Properties::default(),
        )
    }

    #[test]
    fn first_add_creates_and_announces_the_set() {
        let mut a = agent(Node::new(1, "a"));
        assert!(a.add("config", "replicas", 3).unwrap());
        assert!(!a.add("config", "replicas", 4).unwrap());
        assert_eq!(a.distributor().all_tracking_ids().len(), 2);
        assert_eq!(a.attribute_set("config").unwrap().len(), 1);
    }

    #[test]
    fn commands_on_unknown_names_fail() {
        let mut a = agent(Node::new(1, "a"));
        match a.replace("nope", "x", 1) {
            Err(Error::UnknownAttributeSet(s)) => assert_eq!(s, "nope"),
            other => panic!("unexpected {:?}", other),
        }
        a.add("config", "replicas", 3).unwrap();
        match a.remove("config", "leader") {
            Err(Error::UnknownAttribute { set, attribute }) => {
                assert_eq!(set, "config");
                assert_eq!(attribute, "leader");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(a.remove_all("nope").is_err());
    }

    #[test]
    fn inbound_from_strangers_is_dropped() {
        let mut a = agent(Node::new(1, "a"));
        let stranger = Node::new(9, "z");
        let msg = ApplicationMessage::create_attribute_set(&stranger, &AttributeSet::new("config"));
        let says = ApplicationSays::from(&stranger, msg.to_payload().unwrap());
        a.handle_inbound(&says).unwrap();
        assert!(a.attribute_set("config").is_none());
        assert!(a.distributor().outbound().is_empty());
    }

    #[test]
    fn non_finite_values_are_refused_before_anything_is_tracked() {
        let mut a = agent(Node::new(1, "a"));
        match a.add("load", "cpu", f64::NAN) {
            Err(Error::NonFiniteValue { attribute }) => assert_eq!(attribute, "cpu"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(a.attribute_set("load").is_none());
        assert!(a.distributor().all_tracking_ids().is_empty());
        assert!(a.distributor().outbound().is_empty());

        a.add("load", "cpu", 0.5).unwrap();
        let before = a.distributor().all_tracking_ids().len();
        assert!(a.add("load", "mem", f64::NEG_INFINITY).is_err());
        assert!(a.replace("load", "cpu", f64::INFINITY).is_err());
        assert_eq!(a.distributor().all_tracking_ids().len(), before);
        let set = a.attribute_set("load").unwrap();
        assert!(set.attribute_named("mem").is_none());
        assert_eq!(
            set.attribute_named("cpu").unwrap().attribute.value,
            AttributeValue::Float(0.5)
        );
    }

    #[test]
    fn sweep_interval_comes_from_properties() {
        let a = AttributesAgent::new(
            Node::new(1, "a"),
            Vec::<ApplicationEvent>::new(),
            Vec::<Outbound>::new(),
            Configuration::new(vec![Node::new(1, "a")]),
            Properties {
                redistribution_sweep_millis: 250,
                ..Properties::default()
            },
        );
        assert_eq!(a.sweep_interval(), Duration::from_millis(250));
    }

    #[test]
    fn undecodable_payload_is_an_error() {
        let mut a = agent(Node::new(1, "a"));
        let says = ApplicationSays::from(&Node::new(2, "b"), "][".to_string());
        assert!(a.handle_inbound(&says).is_err());
    }

    #[test]
    fn attribute_for_unknown_set_is_not_confirmed() {
        let mut b = agent(Node::new(2, "b"));
        let a_node = Node::new(1, "a");
        let mut set = AttributeSet::new("config");
        let tracked = set.add(Attribute::new("replicas", 3)).unwrap();
        let msg = ApplicationMessage::attribute(
            ApplicationMessageType::AddAttribute,
            &a_node,
            &set,
            &tracked,
        )
        .unwrap();
        b.handle_inbound(&ApplicationSays::from(&a_node, msg.to_payload().unwrap()))
            .unwrap();
        assert!(b.attribute_set("config").is_none());
        assert!(b.distributor().outbound().is_empty());
    }
}
