// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the attributes subsystem. Any field missing from a parsed
/// document takes its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    /// Age past which an unconfirmed message is sent again.
    pub redistribution_interval_millis: u64,
    /// How often the embedding process is expected to tick the agent.
    pub redistribution_sweep_millis: u64,
    /// If set, unconfirmed messages older than this are given up on. Unset
    /// means retry forever.
    pub max_redistribution_age_millis: Option<u64>,
}

impl Default for Properties {
    fn default() -> Self {
        Properties {
            redistribution_interval_millis: 1000,
            redistribution_sweep_millis: 1000,
            max_redistribution_age_millis: None,
        }
    }
}

impl Properties {
    pub fn from_json(text: &str) -> Result<Self> {
        let properties: Properties = serde_json::from_str(text)?;
        properties.validate()?;
        Ok(properties)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redistribution_interval_millis == 0 {
            return Err(Error::Config(
                "redistribution_interval_millis must be positive".to_string(),
            ));
        }
        if self.redistribution_sweep_millis == 0 {
            return Err(Error::Config(
                "redistribution_sweep_millis must be positive".to_string(),
            ));
        }
        match self.max_redistribution_age_millis {
            Some(max) if max <= self.redistribution_interval_millis => Err(Error::Config(format!(
                "max_redistribution_age_millis ({}) must exceed the redistribution interval ({})",
                max, self.redistribution_interval_millis
            ))),
            _ => Ok(()),
        }
    }

    pub fn redistribution_interval(&self) -> Duration {
        Duration::from_millis(self.redistribution_interval_millis)
    }

    pub fn redistribution_sweep(&self) -> Duration {
        Duration::from_millis(self.redistribution_sweep_millis)
    }

    pub fn max_redistribution_age(&self) -> Option<Duration> {
        self.max_redistribution_age_millis.map(Duration::from_millis)
    }
}
