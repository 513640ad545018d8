// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

use strum::EnumCount;
use strum::EnumIter;
use strum::IntoStaticStr;

/// The bring-up stages, in execution order.  Every device completes a stage
/// before any device starts the next one.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumCount,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    LinkSupported,
    LinkPreSetup,
    LinkSetup,
    ClocksEnable,
    ClkSyncStage1,
    ClkSyncStage2,
    ClkSyncStage3,
    LinkEnable,
    LinkRunning,
}

impl Stage {
    /// Stages whose callbacks run once per device, covering all of the
    /// device's target links, rather than once per link.
    pub fn is_per_device(&self) -> bool {
        matches!(
            self,
            Stage::ClkSyncStage1 | Stage::ClkSyncStage2 | Stage::ClkSyncStage3
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.into();
        write!(f, "{name}")
    }
}

/// Why a stage callback is being invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Bringing the link up.
    Init,
    /// Taking the link down.
    Uninit,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Init => write!(f, "init"),
            Reason::Uninit => write!(f, "uninit"),
        }
    }
}

/// The non-error outcomes of a stage callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// The device finished the stage.
    Done,
    /// The device is not ready yet; call it again later within this stage.
    Defer,
}
