// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::ApplicationMessageType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the distributor and the agent wrapped around it.
///
/// Note that an unknown tracking id is _not_ an error anywhere in this crate:
/// confirmations routinely race with purges, so those paths are no-ops.
#[derive(Debug, Error)]
pub enum Error {
    /// A message-type tag was passed to an operation that cannot handle it,
    /// eg. a confirmation tag handed to `distribute_attribute`. This is a
    /// protocol-extension mismatch in the caller, not a transient condition.
    #[error("cannot {operation} message type {message_type}")]
    UnsupportedMessageType {
        operation: &'static str,
        message_type: ApplicationMessageType,
    },

    #[error("unknown attribute set: {0}")]
    UnknownAttributeSet(String),

    #[error("unknown attribute {attribute} in set {set}")]
    UnknownAttribute { set: String, attribute: String },

    /// NaN and the infinities have no JSON encoding, so a message carrying
    /// one could never be parsed by the receiver.
    #[error("attribute {attribute} has a non-finite value")]
    NonFiniteValue { attribute: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
