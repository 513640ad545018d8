// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::Deserialize;
use serde::Serialize;

/// A bounded number of attempts at a fixed interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval_ms: u32,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval_ms: u32) -> Self {
        RetryPolicy {
            attempts,
            interval_ms,
        }
    }

    /// The longest time the policy can spend waiting.
    pub fn budget_ms(&self) -> u64 {
        u64::from(self.attempts.saturating_sub(1)) * u64::from(self.interval_ms)
    }
}

/// Tunables for a bring-up run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsmPolicy {
    /// How long to wait for each link to reach `DATA`.
    pub running: RetryPolicy,
    /// How many rounds a stage may be deferred.
    pub defer: RetryPolicy,
    /// After a SYSREF strobe, wait this long for it to propagate.
    pub sysref_settle_ms: u32,
    /// When a run fails at or after `LINK_ENABLE`, disable the links that
    /// were already enabled.
    pub disable_on_failure: bool,
}

impl Default for FsmPolicy {
    fn default() -> Self {
        FsmPolicy {
            running: RetryPolicy::new(20, 4),
            defer: RetryPolicy::new(100, 1),
            sysref_settle_ms: 2,
            disable_on_failure: true,
        }
    }
}
