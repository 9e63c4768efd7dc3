// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{ApplicationSays, NodeSet};

/// The transport as far as this crate cares: hand over one payload and the
/// nodes it should reach. Delivery is best-effort; losses are recovered by
/// redistribution, not here.
pub trait OperationalOutboundStream {
    fn application(&mut self, says: ApplicationSays, to: &NodeSet);
}

/// One queued send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub says: ApplicationSays,
    pub to: NodeSet,
}

/// A plain queue is a fine outbound stream: the embedding process drains it
/// and does the actual routing.
impl OperationalOutboundStream for Vec<Outbound> {
    fn application(&mut self, says: ApplicationSays, to: &NodeSet) {
        self.push(Outbound {
            says,
            to: to.clone(),
        });
    }
}
