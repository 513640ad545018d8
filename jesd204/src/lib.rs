// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! JESD204B/C link bring-up.
//!
//! The crate has two layers.  The link controllers in [`axi`] own the
//! register-level configuration of a single unidirectional link: they
//! program frame geometry and ILAS payloads, and decode link health.  The
//! orchestrator in [`fsm`] drives a [`fsm::Topology`] of heterogeneous devices
//! (clock distribution chips, converters, link controllers) through the fixed
//! sequence of bring-up stages, one stage at a time across every device.

pub mod axi;
pub mod fsm;
pub mod ilas;
pub mod link;
pub mod status;
pub mod sysref;
mod types;

pub use link::JesdLink;
pub use link::LinkConfig;
pub use link::LinkId;
pub use link::LinkSelect;
pub use status::LinkStatus;
pub use types::*;
