// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/// Observer of attribute changes on this node, whether they originated here
/// or arrived from a peer. Purely informational; every method defaults to
/// doing nothing.
pub trait ClusterApplication {
    fn inform_attribute_set_created(&mut self, _set_name: &str) {}
    fn inform_attribute_added(&mut self, _set_name: &str, _attribute_name: &str) {}
    fn inform_attribute_removed(&mut self, _set_name: &str, _attribute_name: &str) {}
    fn inform_attribute_replaced(&mut self, _set_name: &str, _attribute_name: &str) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpClusterApplication;

impl ClusterApplication for NoOpClusterApplication {}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplicationEvent {
    AttributeSetCreated(String),
    AttributeAdded(String, String),
    AttributeRemoved(String, String),
    AttributeReplaced(String, String),
}

/// Records every notification, in order.
impl ClusterApplication for Vec<ApplicationEvent> {
    fn inform_attribute_set_created(&mut self, set_name: &str) {
        self.push(ApplicationEvent::AttributeSetCreated(set_name.to_string()));
    }
    fn inform_attribute_added(&mut self, set_name: &str, attribute_name: &str) {
        self.push(ApplicationEvent::AttributeAdded(
            set_name.to_string(),
            attribute_name.to_string(),
        ));
    }
    fn inform_attribute_removed(&mut self, set_name: &str, attribute_name: &str) {
        self.push(ApplicationEvent::AttributeRemoved(
            set_name.to_string(),
            attribute_name.to_string(),
        ));
    }
    fn inform_attribute_replaced(&mut self, set_name: &str, attribute_name: &str) {
        self.push(ApplicationEvent::AttributeReplaced(
            set_name.to_string(),
            attribute_name.to_string(),
        ));
    }
}
