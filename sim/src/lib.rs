// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Simulated JESD204 hardware.
//!
//! Everything here stands in for a piece of a real board: the AXI JESD204
//! link layer cores behind a register file, programmable clocks, a clock
//! distribution chip providing SYSREF, and a data converter.  Each model can
//! be configured with [`ChaosConfig`] to fail its operations at random.

pub mod axi;
pub mod chaos;
pub mod clock;
pub mod clock_chip;
pub mod converter;

pub use axi::SimAxiJesd204;
pub use axi::SimSynth;
pub use chaos::Chaos;
pub use chaos::ChaosConfig;
pub use clock::SimClock;
pub use clock::SimDelay;
pub use clock_chip::ClockChipMonitor;
pub use clock_chip::SimClockChip;
pub use clock_chip::SysrefPlan;
pub use converter::SimConverter;
