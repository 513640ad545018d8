// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use dal::RegisterAccess;
use slog::debug;
use slog::warn;

use crate::axi::regs;
use crate::axi::AxiJesd204;
use crate::axi::Core;
use crate::ilas::IlasFields;
use crate::link::Direction;
use crate::link::Encoder;
use crate::link::JesdLink;
use crate::link::LinkConfig;
use crate::status::LaneStatus;
use crate::ControllerError;
use crate::ControllerResult;

/// Marker for the receive core.
pub enum Rx {}

impl Core for Rx {
    const MAGIC: u32 = regs::RX_MAGIC;
    const DIRECTION: Direction = Direction::Rx;
    const SENDS_ILAS: bool = false;

    fn post_running<R: RegisterAccess>(
        ctrl: &AxiJesd204<Self, R>,
        link: &JesdLink,
    ) -> ControllerResult<()> {
        if ctrl.encoder() != Encoder::Enc8b10b {
            return Ok(());
        }
        for lane in ctrl.lane_statuses(&link.config)? {
            debug!(ctrl.log(), "lane status";
                "lane" => lane.lane,
                "cgs" => %lane.cgs_state,
                "ilas_ready" => lane.ilas_ready,
                "errors" => lane.errors,
                "latency" => lane.latency);
        }
        ctrl.verify_lane_ilas(&link.config)
    }
}

pub type AxiJesd204Rx<R> = AxiJesd204<Rx, R>;

impl<R: RegisterAccess> AxiJesd204<Rx, R> {
    pub fn read_lane_status(&self, lane: u32) -> ControllerResult<LaneStatus> {
        let io = self.regs();
        Ok(LaneStatus::decode(
            lane,
            io.reg_read(regs::lane_status(lane))?,
            io.reg_read(regs::lane_errors(lane))?,
            io.reg_read(regs::lane_latency(lane))?,
        ))
    }

    /// Status of every lane used by `cfg`.
    pub fn lane_statuses(
        &self,
        cfg: &LinkConfig,
    ) -> ControllerResult<Vec<LaneStatus>> {
        (0..u32::from(cfg.lane_count))
            .map(|lane| self.read_lane_status(lane))
            .collect()
    }

    /// The ILAS configuration captured on `lane`.
    pub fn read_lane_ilas(&self, lane: u32) -> ControllerResult<IlasFields> {
        let mut words = [0u32; 4];
        for (word, value) in (0u32..).zip(words.iter_mut()) {
            *value = self.regs().reg_read(regs::ilas(lane, word))?;
        }
        Ok(IlasFields::decode(&words))
    }

    /// Compare the ILAS received on each lane with what `cfg` says the
    /// transmitter should have sent.
    pub fn verify_lane_ilas(&self, cfg: &LinkConfig) -> ControllerResult<()> {
        for lane in 0..cfg.lane_count {
            let received = self.read_lane_ilas(lane.into())?;
            let expected = IlasFields::from_config(cfg, cfg.lane_id(lane));
            let fields = expected.diff(&received);
            if !fields.is_empty() {
                warn!(self.log(), "ILAS mismatch";
                    "lane" => lane,
                    "fields" => fields.join(","));
                return Err(ControllerError::IlasMismatch {
                    lane: lane.into(),
                    fields,
                });
            }
        }
        Ok(())
    }
}
