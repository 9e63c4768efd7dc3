// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate replicates small pieces of shared cluster state, in the form of
 * named, versioned _attribute sets_ such as "leader is node 3" or "partition
 * count is 12", from the node where they change to every other node, and
 * keeps resending until every node has said it got them.
 *
 * It is deliberately _not_ consensus. There is no leader, no quorum, and no
 * agreement on order; it is at-least-once delivery with per-node
 * acknowledgment, which is enough for eventually-consistent cluster
 * metadata:
 *
 *   - Every change becomes a message with a fresh tracking id, sent to the
 *     other nodes and recorded in a ledger (`Confirmables`) along with the
 *     set of nodes that have not yet confirmed it.
 *
 *   - Receivers apply the change and send back a confirmation naming that
 *     tracking id. The originator strikes the confirming node off; when no
 *     nodes remain, the entry is gone.
 *
 *   - A periodic sweep resends anything older than the redistribution
 *     interval to the nodes still outstanding on it. Forever, by default.
 *
 * Since resends can duplicate and reorder deliveries, receivers apply each
 * attribute by version (newer wins, anything else is a no-op) rather than by
 * arrival order. Removal leaves a versioned tombstone for the same reason.
 *
 * Moving bytes between nodes is left to the client, through the
 * `OperationalOutboundStream` trait; so is deciding when to tick the sweep.
 * The `AttributesAgent` ties the pieces together as a single-writer state
 * machine you feed commands, inbound envelopes and ticks.
 */

mod agent;
mod application;
mod attribute;
mod config;
mod confirmables;
mod distributor;
mod error;
mod message;
mod node;
mod outbound;

pub use agent::AttributesAgent;
pub use application::{ApplicationEvent, ClusterApplication, NoOpClusterApplication};
pub use attribute::{Attribute, AttributeSet, AttributeType, AttributeValue, TrackedAttribute};
pub use config::Properties;
pub use confirmables::{Confirmable, Confirmables};
pub use distributor::ConfirmingDistributor;
pub use error::{Error, Result};
pub use message::{new_tracking_id, ApplicationMessage, ApplicationMessageType, ApplicationSays};
pub use node::{Configuration, Id, Name, Node, NodeSet};
pub use outbound::{OperationalOutboundStream, Outbound};
