// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use dal::DalError;
use dal::DalResult;
use rand::random;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
#[serde(transparent)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }

    /// Set the chaos value, clamped to [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        self.value = value.clamp(0.0, 1.0);
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    /// A value of zero never fails.
    pub fn unfurled(&self, log: &Logger, message: &str) -> DalResult<()> {
        if self.value > 0.0 && self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(DalError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// Chaos values for each simulated operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChaosConfig {
    pub reg_read: Chaos,
    pub reg_write: Chaos,
    pub set_rate: Chaos,
    pub sysref: Chaos,
    /// Applies to every bring-up stage callback.
    pub stage: Chaos,
}

impl ChaosConfig {
    /// Apply a uniform probability to every operation.
    pub fn uniform(v: f64) -> Self {
        Self {
            reg_read: Chaos::new(v),
            reg_write: Chaos::new(v),
            set_rate: Chaos::new(v),
            sysref: Chaos::new(v),
            stage: Chaos::new(v),
        }
    }
}

/// A convenience macro for unfurling chaos.  The $name should be a member of
/// [`ChaosConfig`], and `$handle` anything with `chaos` and `log` fields.
macro_rules! unfurl {
    ($handle:expr, $name:ident) => {
        $handle
            .chaos
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}
pub(crate) use unfurl;
