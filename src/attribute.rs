// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, Result};
use im::OrdMap;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    Text,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Text(_) => AttributeType::Text,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            AttributeValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Int(i64::from(i))
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

/// A named, typed value. Never mutated in place: replacing a value builds a
/// new `Attribute` under the same name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new<V: Into<AttributeValue>>(name: &str, value: V) -> Self {
        Attribute {
            name: name.to_string(),
            value: value.into(),
        }
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.value.attribute_type()
    }

    /// Refuses values that cannot survive the trip through a payload.
    pub fn validate(&self) -> Result<()> {
        if self.value.is_finite() {
            Ok(())
        } else {
            Err(Error::NonFiniteValue {
                attribute: self.name.clone(),
            })
        }
    }
}

/// An `Attribute` as a member of an `AttributeSet`. Every add, replace or
/// remove yields a `TrackedAttribute` with a strictly greater `version`, and
/// receivers only apply versions newer than what they hold. That is what
/// makes redistributed (duplicated, reordered) messages harmless.
///
/// Removal is a tombstone (`removed == true`) rather than absence, so that a
/// stale add arriving after a remove cannot resurrect the attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedAttribute {
    pub id: String,
    pub version: u64,
    pub attribute: Attribute,
    pub removed: bool,
}

impl TrackedAttribute {
    pub fn new(attribute: Attribute) -> Self {
        TrackedAttribute {
            id: Uuid::new_v4().to_string(),
            version: 1,
            attribute,
            removed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.attribute.name
    }

    pub fn replacing_value_with(&self, attribute: Attribute) -> Self {
        TrackedAttribute {
            id: self.id.clone(),
            version: self.version + 1,
            attribute,
            removed: false,
        }
    }

    pub fn as_removed(&self) -> Self {
        TrackedAttribute {
            id: self.id.clone(),
            version: self.version + 1,
            attribute: self.attribute.clone(),
            removed: true,
        }
    }

    pub fn has_newer_version_than(&self, other: &TrackedAttribute) -> bool {
        self.version > other.version
    }
}

/// A named collection of `TrackedAttribute`s, unique by attribute name and
/// iterated in name order. Cloning is cheap (structurally shared).
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeSet {
    pub name: String,
    members: OrdMap<String, TrackedAttribute>,
}

impl AttributeSet {
    pub fn new(name: &str) -> Self {
        AttributeSet {
            name: name.to_string(),
            members: OrdMap::new(),
        }
    }

    /// Live members, in name order. Tombstones are skipped.
    pub fn all(&self) -> impl Iterator<Item = &TrackedAttribute> + '_ {
        self.members.values().filter(|t| !t.removed)
    }

    /// Removed members, in name order.
    pub fn tombstones(&self) -> impl Iterator<Item = &TrackedAttribute> + '_ {
        self.members.values().filter(|t| t.removed)
    }

    pub fn attribute_named(&self, name: &str) -> Option<&TrackedAttribute> {
        self.members.get(name).filter(|t| !t.removed)
    }

    pub fn len(&self) -> usize {
        self.all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.all().next().is_none()
    }

    /// Adds a new live member. Returns `None` if a live member of that name
    /// already exists; re-adding over a tombstone continues its version line.
    pub fn add(&mut self, attribute: Attribute) -> Option<TrackedAttribute> {
        let tracked = match self.members.get(&attribute.name) {
            Some(t) if !t.removed => return None,
            Some(tombstone) => tombstone.replacing_value_with(attribute),
            None => TrackedAttribute::new(attribute),
        };
        self.members.insert(tracked.name().to_string(), tracked.clone());
        Some(tracked)
    }

    pub fn replace(&mut self, attribute: Attribute) -> Option<TrackedAttribute> {
        let tracked = self
            .attribute_named(&attribute.name)?
            .replacing_value_with(attribute);
        self.members.insert(tracked.name().to_string(), tracked.clone());
        Some(tracked)
    }

    pub fn remove(&mut self, name: &str) -> Option<TrackedAttribute> {
        let tombstone = self.attribute_named(name)?.as_removed();
        self.members.insert(name.to_string(), tombstone.clone());
        Some(tombstone)
    }

    /// Tombstones every live member, returning the tombstones.
    pub fn remove_all(&mut self) -> Vec<TrackedAttribute> {
        let names: Vec<String> = self.all().map(|t| t.name().to_string()).collect();
        names.iter().filter_map(|n| self.remove(n)).collect()
    }

    /// Receiving-side application of a replicated member. Applies only if
    /// `tracked` is newer than the held version (or nothing is held); returns
    /// whether anything changed.
    pub fn apply(&mut self, tracked: &TrackedAttribute) -> bool {
        if let Some(held) = self.members.get(tracked.name()) {
            if !tracked.has_newer_version_than(held) {
                trace!(
                    "set {} ignoring {} v{}, holding v{}",
                    self.name,
                    tracked.name(),
                    tracked.version,
                    held.version
                );
                return false;
            }
        }
        self.members.insert(tracked.name().to_string(), tracked.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increase_on_every_change() {
        let mut set = AttributeSet::new("config");
        let added = set.add(Attribute::new("replicas", 3)).unwrap();
        let replaced = set.replace(Attribute::new("replicas", 5)).unwrap();
        let removed = set.remove("replicas").unwrap();
        let readded = set.add(Attribute::new("replicas", 7)).unwrap();
        assert!(replaced.has_newer_version_than(&added));
        assert!(removed.has_newer_version_than(&replaced));
        assert!(readded.has_newer_version_than(&removed));
        assert_eq!(added.id, readded.id);
    }

    #[test]
    fn add_existing_and_replace_missing_are_refused() {
        let mut set = AttributeSet::new("config");
        assert!(set.add(Attribute::new("leader", "node-1")).is_some());
        assert!(set.add(Attribute::new("leader", "node-2")).is_none());
        assert!(set.replace(Attribute::new("partitions", 12)).is_none());
        assert!(set.remove("partitions").is_none());
        assert_eq!(
            set.attribute_named("leader").unwrap().attribute.value,
            AttributeValue::Text("node-1".into())
        );
    }

    #[test]
    fn apply_ignores_stale_and_duplicate_versions() {
        let mut origin = AttributeSet::new("config");
        let v1 = origin.add(Attribute::new("replicas", 3)).unwrap();
        let v2 = origin.replace(Attribute::new("replicas", 4)).unwrap();

        let mut replica = AttributeSet::new("config");
        assert!(replica.apply(&v2));
        assert!(!replica.apply(&v2));
        assert!(!replica.apply(&v1));
        assert_eq!(
            replica.attribute_named("replicas").unwrap().attribute.value,
            AttributeValue::Int(4)
        );
    }

    #[test]
    fn stale_add_cannot_resurrect_removed_attribute() {
        let mut origin = AttributeSet::new("config");
        let added = origin.add(Attribute::new("replicas", 3)).unwrap();
        let removed = origin.remove("replicas").unwrap();

        let mut replica = AttributeSet::new("config");
        assert!(replica.apply(&added));
        assert!(replica.apply(&removed));
        assert!(!replica.apply(&added));
        assert!(replica.attribute_named("replicas").is_none());
        assert!(replica.is_empty());
    }

    #[test]
    fn members_iterate_in_name_order() {
        let mut set = AttributeSet::new("config");
        set.add(Attribute::new("zeta", true));
        set.add(Attribute::new("alpha", 1.5));
        set.add(Attribute::new("mu", 2));
        set.remove("mu");
        let names: Vec<&str> = set.all().map(|t| t.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.attribute_named("alpha").unwrap().attribute.attribute_type(),
            AttributeType::Float
        );
    }

    #[test]
    fn tombstones_are_kept_apart_from_live_members() {
        let mut set = AttributeSet::new("config");
        set.add(Attribute::new("leader", "a"));
        set.add(Attribute::new("replicas", 3));
        set.remove("leader");
        let tombstones: Vec<&str> = set.tombstones().map(|t| t.name()).collect();
        assert_eq!(tombstones, vec!["leader"]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn only_finite_floats_validate() {
        assert!(Attribute::new("load", 0.25).validate().is_ok());
        assert!(Attribute::new("load", "high").validate().is_ok());
        for f in &[f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            match Attribute::new("load", *f).validate() {
                Err(Error::NonFiniteValue { attribute }) => assert_eq!(attribute, "load"),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
