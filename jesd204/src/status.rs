// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Link health, decoded from the link controller's status registers.

use std::fmt;

use serde::Serialize;

use crate::axi::regs;
use crate::link::Encoder;

/// Position of the link layer state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LinkState {
    Wait,
    Cgs,
    Ilas,
    Data,
    /// A value outside the documented encoding.
    Unknown(u8),
}

impl LinkState {
    /// Decode the state nibble.  Every value maps to some state.
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0xf {
            0 => LinkState::Wait,
            1 => LinkState::Cgs,
            2 => LinkState::Ilas,
            3 => LinkState::Data,
            x => LinkState::Unknown(x as u8),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Wait => write!(f, "WAIT"),
            LinkState::Cgs => write!(f, "CGS"),
            LinkState::Ilas => write!(f, "ILAS"),
            LinkState::Data => write!(f, "DATA"),
            LinkState::Unknown(x) => write!(f, "UNKNOWN({x})"),
        }
    }
}

/// State of the SYNC~ signal.  64B66B links have no SYNC~.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SyncStatus {
    Asserted,
    Deasserted,
    NotApplicable,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Asserted => write!(f, "asserted"),
            SyncStatus::Deasserted => write!(f, "deasserted"),
            SyncStatus::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// Raw contents of the registers a status decode draws on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawLinkStatus {
    pub link_status: u32,
    pub sysref_status: u32,
    pub link_state: u32,
    pub link_disable: u32,
}

/// Decoded link health.  `state == Data` does not imply the PLL is locked or
/// that SYSREF was captured; callers needing both must check them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub enabled: bool,
    pub state: LinkState,
    pub sync: SyncStatus,
    pub sysref_captured: bool,
    pub sysref_error: bool,
    pub pll_locked: bool,
}

impl LinkStatus {
    pub fn decode(encoder: Encoder, raw: &RawLinkStatus) -> Self {
        let sync = match encoder {
            Encoder::Enc64b66b => SyncStatus::NotApplicable,
            Encoder::Enc8b10b => {
                // SYNC~ is active low.
                if raw.link_status & regs::LINK_STATUS_SYNC != 0 {
                    SyncStatus::Deasserted
                } else {
                    SyncStatus::Asserted
                }
            }
        };
        LinkStatus {
            enabled: raw.link_disable & regs::LINK_DISABLE_DISABLED == 0,
            state: LinkState::from_raw(raw.link_status),
            sync,
            sysref_captured: raw.sysref_status & regs::SYSREF_STATUS_CAPTURED
                != 0,
            sysref_error: raw.sysref_status & regs::SYSREF_STATUS_ALIGN_ERROR
                != 0,
            pll_locked: raw.link_state & regs::LINK_STATE_EXTERNAL_RESET == 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == LinkState::Data
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} state {}, SYNC~ {}, SYSREF {}{}, PLL {}",
            if self.enabled { "enabled" } else { "disabled" },
            self.state,
            self.sync,
            if self.sysref_captured {
                "captured"
            } else {
                "not captured"
            },
            if self.sysref_error {
                " (alignment error)"
            } else {
                ""
            },
            if self.pll_locked { "locked" } else { "unlocked" },
        )
    }
}

/// Code group synchronization state of one RX lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CgsState {
    Init,
    Check,
    Data,
    Unknown(u8),
}

impl fmt::Display for CgsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgsState::Init => write!(f, "INIT"),
            CgsState::Check => write!(f, "CHECK"),
            CgsState::Data => write!(f, "DATA"),
            CgsState::Unknown(x) => write!(f, "UNKNOWN({x})"),
        }
    }
}

/// Per-lane status of an RX link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    pub lane: u32,
    pub cgs_state: CgsState,
    pub ifs_ready: bool,
    pub ilas_ready: bool,
    pub errors: u32,
    /// Lane arrival latency, in octets.
    pub latency: u32,
}

impl LaneStatus {
    pub fn decode(lane: u32, status: u32, errors: u32, latency: u32) -> Self {
        let cgs_state = match status & 0x3 {
            0 => CgsState::Init,
            1 => CgsState::Check,
            2 => CgsState::Data,
            x => CgsState::Unknown(x as u8),
        };
        LaneStatus {
            lane,
            cgs_state,
            ifs_ready: status & (1 << 4) != 0,
            ilas_ready: status & (1 << 5) != 0,
            errors,
            latency,
        }
    }
}
