// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;

use crate::fsm::Stage;

/// Counters describing the work done by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FsmStats {
    callbacks: BTreeMap<Stage, u32>,
    defers: BTreeMap<Stage, u32>,
    /// Number of link status reads made while waiting for `DATA`.
    pub status_polls: u32,
    pub sysref_strobes: u32,
    pub runs: u32,
    pub failures: u32,
}

impl FsmStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of callbacks made for a single stage.
    pub fn callbacks(&self, stage: Stage) -> u32 {
        *self.callbacks.get(&stage).unwrap_or(&0)
    }

    /// Returns the number of times a device deferred a single stage.
    pub fn defers(&self, stage: Stage) -> u32 {
        *self.defers.get(&stage).unwrap_or(&0)
    }

    pub(crate) fn bump_callback(&mut self, stage: Stage) {
        self.callbacks
            .entry(stage)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    pub(crate) fn bump_defer(&mut self, stage: Stage) {
        self.defers
            .entry(stage)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    /// Returns the stages that have seen at least one callback.
    pub fn stages(&self) -> Vec<Stage> {
        self.callbacks.keys().cloned().collect()
    }
}
