// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Register map shared by the AXI JESD204 TX and RX link layer cores.  All
//! offsets are bytes from the peripheral base.

pub const VERSION: u32 = 0x00;
pub const ID: u32 = 0x04;
pub const SCRATCH: u32 = 0x08;
pub const MAGIC: u32 = 0x0c;
pub const CONF_NUM_LANES: u32 = 0x10;
/// [3:0] log2 of the link data path width in octets, [15:8] transport layer
/// data path width in octets.
pub const CONF_DATA_PATH_WIDTH: u32 = 0x14;
/// [9:8] encoder: 0 and 1 select 8B10B, 2 selects 64B66B.
pub const SYNTH_REG_1: u32 = 0x18;

/// [0] link disabled
pub const LINK_DISABLE: u32 = 0xc0;
/// [0] external reset asserted
pub const LINK_STATE: u32 = 0xc4;
/// Link clock frequency relative to the 100 MHz AXI clock, 16.16 fixed point.
pub const LINK_CLK_RATIO: u32 = 0xc8;

pub const SYSREF_CONF: u32 = 0x100;
pub const SYSREF_LMFC_OFFSET: u32 = 0x104;
/// Write one to clear.
pub const SYSREF_STATUS: u32 = 0x108;

/// One bit per lane, set to disable the lane.
pub const LANES_DISABLE: u32 = 0x200;
/// [9:0] octets per multiframe - 1, [23:16] octets per frame - 1
pub const LINK_CONF0: u32 = 0x210;
/// Largest multiframe the 10-bit `LINK_CONF0` field can hold.
pub const OCTETS_PER_MULTIFRAME_MAX: u32 = 1024;
pub const LINK_CONF1: u32 = 0x214;

/// [3:0] state, [4] SYNC~ level
pub const LINK_STATUS: u32 = 0x280;

pub const fn lane_status(lane: u32) -> u32 {
    lane * 32 + 0x300
}

pub const fn lane_latency(lane: u32) -> u32 {
    lane * 32 + 0x304
}

pub const fn lane_errors(lane: u32) -> u32 {
    lane * 32 + 0x308
}

/// The ILAS configuration word `word` of lane `lane`.  Written by the TX core,
/// captured from the wire by the RX core.
pub const fn ilas(lane: u32, word: u32) -> u32 {
    lane * 32 + word * 4 + 0x310
}

pub const TX_MAGIC: u32 = u32::from_be_bytes(*b"204T");
pub const RX_MAGIC: u32 = u32::from_be_bytes(*b"204R");

pub const SUPPORTED_MAJOR_VERSION: u32 = 1;

pub const fn version_major(v: u32) -> u32 {
    v >> 16
}

pub const fn version_minor(v: u32) -> u32 {
    (v >> 8) & 0xff
}

pub const fn version_patch(v: u32) -> u32 {
    v & 0xff
}

pub const LINK_DISABLE_DISABLED: u32 = 1 << 0;
pub const LINK_STATE_EXTERNAL_RESET: u32 = 1 << 0;
pub const LINK_STATUS_SYNC: u32 = 1 << 4;

pub const SYSREF_CONF_DISABLE: u32 = 1 << 0;
pub const SYSREF_CONF_ONESHOT: u32 = 1 << 1;

pub const SYSREF_STATUS_CAPTURED: u32 = 1 << 0;
pub const SYSREF_STATUS_ALIGN_ERROR: u32 = 1 << 1;

pub const LINK_CONF1_SCRAMBLER_DISABLE: u32 = 1 << 0;

pub const ENCODER_8B10B: u32 = 1;
pub const ENCODER_64B66B: u32 = 2;

pub const fn synth_encoder(v: u32) -> u32 {
    (v >> 8) & 0x3
}
