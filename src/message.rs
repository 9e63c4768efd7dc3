// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{AttributeSet, Error, Id, Name, Node, Result, TrackedAttribute};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tags for every kind of message this crate exchanges. Distribution and
/// confirmation entry points take one of these and refuse the tags they
/// cannot handle with `Error::UnsupportedMessageType`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplicationMessageType {
    CreateAttributeSet,
    AddAttribute,
    RemoveAttribute,
    ReplaceAttribute,
    ConfirmCreateAttributeSet,
    ConfirmAddAttribute,
    ConfirmRemoveAttribute,
    ConfirmReplaceAttribute,
}

impl ApplicationMessageType {
    pub fn is_confirmation(self) -> bool {
        match self {
            ApplicationMessageType::ConfirmCreateAttributeSet
            | ApplicationMessageType::ConfirmAddAttribute
            | ApplicationMessageType::ConfirmRemoveAttribute
            | ApplicationMessageType::ConfirmReplaceAttribute => true,
            _ => false,
        }
    }

    /// The confirmation tag answering this mutation tag, if it is one.
    pub fn confirmation(self) -> Option<ApplicationMessageType> {
        match self {
            ApplicationMessageType::CreateAttributeSet => {
                Some(ApplicationMessageType::ConfirmCreateAttributeSet)
            }
            ApplicationMessageType::AddAttribute => {
                Some(ApplicationMessageType::ConfirmAddAttribute)
            }
            ApplicationMessageType::RemoveAttribute => {
                Some(ApplicationMessageType::ConfirmRemoveAttribute)
            }
            ApplicationMessageType::ReplaceAttribute => {
                Some(ApplicationMessageType::ConfirmReplaceAttribute)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ApplicationMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub fn new_tracking_id() -> String {
    Uuid::new_v4().to_string()
}

/// The messages nodes exchange about attribute sets. Mutations flow from an
/// originator to its peers; each peer answers with a confirmation carrying
/// the mutation's tracking id as `correlating_message_id`.
///
/// Every message has its own fresh `tracking_id`, including confirmations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ApplicationMessage {
    CreateAttributeSet {
        tracking_id: String,
        from: Node,
        set: String,
    },
    AddAttribute {
        tracking_id: String,
        from: Node,
        set: String,
        tracked: TrackedAttribute,
    },
    RemoveAttribute {
        tracking_id: String,
        from: Node,
        set: String,
        tracked: TrackedAttribute,
    },
    ReplaceAttribute {
        tracking_id: String,
        from: Node,
        set: String,
        tracked: TrackedAttribute,
    },
    ConfirmAttributeSet {
        tracking_id: String,
        correlating_message_id: String,
        from: Node,
        set: String,
    },
    ConfirmAttribute {
        tracking_id: String,
        correlating_message_id: String,
        from: Node,
        set: String,
        attribute: String,
        confirms: ApplicationMessageType,
    },
}

impl ApplicationMessage {
    pub fn create_attribute_set(from: &Node, set: &AttributeSet) -> Self {
        ApplicationMessage::CreateAttributeSet {
            tracking_id: new_tracking_id(),
            from: from.clone(),
            set: set.name.clone(),
        }
    }

    /// Builds the mutation message for `message_type`, which must be one of
    /// the add/remove/replace tags. Non-finite values are refused.
    pub fn attribute(
        message_type: ApplicationMessageType,
        from: &Node,
        set: &AttributeSet,
        tracked: &TrackedAttribute,
    ) -> Result<Self> {
        tracked.attribute.validate()?;
        let tracking_id = new_tracking_id();
        let from = from.clone();
        let set = set.name.clone();
        let tracked = tracked.clone();
        match message_type {
            ApplicationMessageType::AddAttribute => Ok(ApplicationMessage::AddAttribute {
                tracking_id,
                from,
                set,
                tracked,
            }),
            ApplicationMessageType::RemoveAttribute => Ok(ApplicationMessage::RemoveAttribute {
                tracking_id,
                from,
                set,
                tracked,
            }),
            ApplicationMessageType::ReplaceAttribute => Ok(ApplicationMessage::ReplaceAttribute {
                tracking_id,
                from,
                set,
                tracked,
            }),
            other => Err(Error::UnsupportedMessageType {
                operation: "distribute",
                message_type: other,
            }),
        }
    }

    pub fn confirm_attribute_set(
        correlating_message_id: &str,
        from: &Node,
        set: &AttributeSet,
    ) -> Self {
        ApplicationMessage::ConfirmAttributeSet {
            tracking_id: new_tracking_id(),
            correlating_message_id: correlating_message_id.to_string(),
            from: from.clone(),
            set: set.name.clone(),
        }
    }

    /// Builds the confirmation answering a mutation of `message_type`, which
    /// must be one of the add/remove/replace tags.
    pub fn confirm_attribute(
        correlating_message_id: &str,
        from: &Node,
        set: &AttributeSet,
        tracked: &TrackedAttribute,
        message_type: ApplicationMessageType,
    ) -> Result<Self> {
        let confirms = match message_type {
            ApplicationMessageType::AddAttribute
            | ApplicationMessageType::RemoveAttribute
            | ApplicationMessageType::ReplaceAttribute => message_type.confirmation(),
            _ => None,
        };
        match confirms {
            Some(confirms) => Ok(ApplicationMessage::ConfirmAttribute {
                tracking_id: new_tracking_id(),
                correlating_message_id: correlating_message_id.to_string(),
                from: from.clone(),
                set: set.name.clone(),
                attribute: tracked.name().to_string(),
                confirms,
            }),
            None => Err(Error::UnsupportedMessageType {
                operation: "confirm",
                message_type,
            }),
        }
    }

    pub fn tracking_id(&self) -> &str {
        match self {
            ApplicationMessage::CreateAttributeSet { tracking_id, .. }
            | ApplicationMessage::AddAttribute { tracking_id, .. }
            | ApplicationMessage::RemoveAttribute { tracking_id, .. }
            | ApplicationMessage::ReplaceAttribute { tracking_id, .. }
            | ApplicationMessage::ConfirmAttributeSet { tracking_id, .. }
            | ApplicationMessage::ConfirmAttribute { tracking_id, .. } => tracking_id,
        }
    }

    pub fn from(&self) -> &Node {
        match self {
            ApplicationMessage::CreateAttributeSet { from, .. }
            | ApplicationMessage::AddAttribute { from, .. }
            | ApplicationMessage::RemoveAttribute { from, .. }
            | ApplicationMessage::ReplaceAttribute { from, .. }
            | ApplicationMessage::ConfirmAttributeSet { from, .. }
            | ApplicationMessage::ConfirmAttribute { from, .. } => from,
        }
    }

    pub fn set_name(&self) -> &str {
        match self {
            ApplicationMessage::CreateAttributeSet { set, .. }
            | ApplicationMessage::AddAttribute { set, .. }
            | ApplicationMessage::RemoveAttribute { set, .. }
            | ApplicationMessage::ReplaceAttribute { set, .. }
            | ApplicationMessage::ConfirmAttributeSet { set, .. }
            | ApplicationMessage::ConfirmAttribute { set, .. } => set,
        }
    }

    pub fn message_type(&self) -> ApplicationMessageType {
        match self {
            ApplicationMessage::CreateAttributeSet { .. } => {
                ApplicationMessageType::CreateAttributeSet
            }
            ApplicationMessage::AddAttribute { .. } => ApplicationMessageType::AddAttribute,
            ApplicationMessage::RemoveAttribute { .. } => ApplicationMessageType::RemoveAttribute,
            ApplicationMessage::ReplaceAttribute { .. } => ApplicationMessageType::ReplaceAttribute,
            ApplicationMessage::ConfirmAttributeSet { .. } => {
                ApplicationMessageType::ConfirmCreateAttributeSet
            }
            ApplicationMessage::ConfirmAttribute { confirms, .. } => *confirms,
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// The addressed envelope handed to the outbound stream: who is speaking,
/// plus an opaque payload.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSays {
    pub id: Id,
    pub name: Name,
    pub payload: String,
}

impl ApplicationSays {
    pub fn from(node: &Node, payload: String) -> Self {
        ApplicationSays {
            id: node.id,
            name: node.name.clone(),
            payload,
        }
    }
}
