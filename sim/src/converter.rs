// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A data converter sitting at the top of a topology.
//!
//! The converter owns the link identity fields (DID and BID) and optionally
//! the sample rate, filling them in from `link_init`.  For links where the
//! FPGA receives, the converter is the transmitter: enabling such a link
//! starts the converter's ILAS toward the attached RX link controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use jesd204::fsm::JesdDevice;
use jesd204::fsm::Reason;
use jesd204::fsm::Stage;
use jesd204::fsm::StageResult;
use jesd204::fsm::StateChange;
use jesd204::link::Direction;
use jesd204::DeviceError;
use jesd204::JesdLink;
use jesd204::LinkId;
use slog::debug;
use slog::o;
use slog::Logger;

use crate::axi::SimAxiJesd204;
use crate::chaos::unfurl;
use crate::chaos::ChaosConfig;

pub struct SimConverter {
    log: Logger,
    name: String,
    device_id: u8,
    bank_id: u8,
    sample_rate_hz: Option<u64>,
    /// Number of times `LINK_SETUP` defers before completing.
    setup_defers: u32,
    fail_at: Option<Stage>,
    peers: BTreeMap<LinkId, Arc<SimAxiJesd204>>,
    chaos: ChaosConfig,
}

impl SimConverter {
    pub fn new(log: &Logger, name: impl Into<String>) -> Self {
        let name = name.into();
        SimConverter {
            log: log.new(o!("device" => name.clone())),
            name,
            device_id: 0,
            bank_id: 0,
            sample_rate_hz: None,
            setup_defers: 0,
            fail_at: None,
            peers: BTreeMap::new(),
            chaos: ChaosConfig::default(),
        }
    }

    pub fn with_ids(mut self, device_id: u8, bank_id: u8) -> Self {
        self.device_id = device_id;
        self.bank_id = bank_id;
        self
    }

    /// Override every link's sample rate during `link_init`.
    pub fn with_sample_rate(mut self, hz: u64) -> Self {
        self.sample_rate_hz = Some(hz);
        self
    }

    pub fn with_setup_defers(mut self, count: u32) -> Self {
        self.setup_defers = count;
        self
    }

    /// Fail every callback for `stage`.
    pub fn with_failure_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Attach the RX link controller receiving this converter's `link`.
    pub fn with_peer(mut self, link: LinkId, peer: Arc<SimAxiJesd204>) -> Self {
        self.peers.insert(link, peer);
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    fn step(&mut self, stage: Stage, reason: Reason) -> StageResult {
        if reason == Reason::Init {
            unfurl!(self, stage);
            if self.fail_at == Some(stage) {
                return Err(DeviceError::Failed(format!("{stage} refused")));
            }
        }
        Ok(StateChange::Done)
    }
}

impl JesdDevice for SimConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_init(&mut self, link: &mut JesdLink) -> Result<(), DeviceError> {
        link.config.device_id = self.device_id;
        link.config.bank_id = self.bank_id;
        if let Some(hz) = self.sample_rate_hz {
            link.sample_rate_hz = hz;
        }
        debug!(self.log, "link init";
            "link" => link.id,
            "device_id" => self.device_id,
            "bank_id" => self.bank_id,
            "sample_rate_hz" => link.sample_rate_hz);
        Ok(())
    }

    fn link_supported(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.step(Stage::LinkSupported, reason)
    }

    fn link_pre_setup(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.step(Stage::LinkPreSetup, reason)
    }

    fn link_setup(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        if reason == Reason::Init && self.setup_defers > 0 {
            self.setup_defers -= 1;
            debug!(self.log, "deferring setup"; "link" => link.id);
            return Ok(StateChange::Defer);
        }
        self.step(Stage::LinkSetup, reason)
    }

    fn clks_enable(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.step(Stage::ClocksEnable, reason)
    }

    fn clk_sync_stage1(
        &mut self,
        reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        self.step(Stage::ClkSyncStage1, reason)
    }

    fn clk_sync_stage2(
        &mut self,
        reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        self.step(Stage::ClkSyncStage2, reason)
    }

    fn clk_sync_stage3(
        &mut self,
        reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        self.step(Stage::ClkSyncStage3, reason)
    }

    fn link_enable(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        let result = self.step(Stage::LinkEnable, reason)?;
        if reason == Reason::Init && link.direction == Direction::Rx {
            if let Some(peer) = self.peers.get(&link.id) {
                peer.transmit_ilas(&link.config);
                debug!(self.log, "transmitting ILAS"; "link" => link.id);
            }
        }
        Ok(result)
    }

    fn link_running(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.step(Stage::LinkRunning, reason)
    }
}
