// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use im::OrdSet as ArcOrdSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identity of a cluster node. Unique within a `Configuration`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(pub u16);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name(pub String);

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cluster member as seen by this crate: just an identity and a name. How
/// bytes actually reach a `Node` is the business of the outbound stream.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub name: Name,
}

pub type NodeSet = ArcOrdSet<Node>;

impl Node {
    pub fn new(id: u16, name: &str) -> Self {
        Node {
            id: Id(id),
            name: Name(name.to_string()),
        }
    }

    /// The singleton set holding only this node, for point-to-point sends.
    pub fn collected(&self) -> NodeSet {
        ArcOrdSet::unit(self.clone())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// The cluster topology. Peer sets are computed on every call, so joins
/// recorded with `add_node` are visible to the next distribution.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    nodes: NodeSet,
}

impl Configuration {
    pub fn new<I: IntoIterator<Item = Node>>(nodes: I) -> Self {
        Configuration {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn all_nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn all_other_nodes(&self, id: Id) -> NodeSet {
        self.nodes.iter().filter(|n| n.id != id).cloned().collect()
    }

    pub fn node_matching(&self, id: Id) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns false if a node with the same id was already present.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.node_matching(node.id).is_some() {
            return false;
        }
        self.nodes.insert(node);
        true
    }
}
