// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A register-level model of the AXI JESD204 TX and RX link layer cores.
//!
//! The model keeps a register file and walks the link state machine forward
//! one state per read of `LINK_STATUS` while the link is enabled.  For
//! subclass 1 operation the link will not leave CGS until a SYSREF edge has
//! aligned its LMFC.

use std::collections::BTreeMap;
use std::sync::Mutex;

use dal::DalResult;
use dal::RegisterAccess;
use jesd204::axi::regs;
use jesd204::ilas::compute_ilas;
use jesd204::link::Direction;
use jesd204::link::Encoder;
use jesd204::status::LinkState;
use jesd204::LinkConfig;
use slog::debug;
use slog::o;
use slog::Logger;

use crate::chaos::unfurl;
use crate::chaos::ChaosConfig;

const STATE_WAIT: u32 = 0;
const STATE_CGS: u32 = 1;
const STATE_ILAS: u32 = 2;
const STATE_DATA: u32 = 3;

/// Synthesis parameters of a simulated core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimSynth {
    pub version: u32,
    pub lanes: u32,
    pub data_path_width_log2: u32,
    pub tpl_data_path_width: u32,
    pub encoder: Encoder,
}

impl SimSynth {
    pub fn new(encoder: Encoder) -> Self {
        let (dpw_log2, tpl) = match encoder {
            Encoder::Enc8b10b => (2, 4),
            Encoder::Enc64b66b => (3, 8),
        };
        SimSynth {
            version: 0x0001_0761,
            lanes: 4,
            data_path_width_log2: dpw_log2,
            tpl_data_path_width: tpl,
            encoder,
        }
    }

    pub fn with_lanes(mut self, lanes: u32) -> Self {
        self.lanes = lanes;
        self
    }
}

impl Default for SimSynth {
    fn default() -> Self {
        SimSynth::new(Encoder::default())
    }
}

#[derive(Debug, Default)]
struct CoreState {
    regs: BTreeMap<u32, u32>,
    state: u32,
    stall_at: Option<u32>,
    aligned: bool,
    continuous: bool,
    remote: Option<LinkConfig>,
    status_reads: u32,
    pulses: u32,
}

impl CoreState {
    fn get(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn set(&mut self, addr: u32, value: u32) {
        self.regs.insert(addr, value);
    }

    fn enabled(&self) -> bool {
        self.get(regs::LINK_DISABLE) & regs::LINK_DISABLE_DISABLED == 0
    }

    fn sysref_enabled(&self) -> bool {
        self.get(regs::SYSREF_CONF) & regs::SYSREF_CONF_DISABLE == 0
    }
}

/// A simulated AXI JESD204 TX or RX core.
pub struct SimAxiJesd204 {
    log: Logger,
    direction: Direction,
    encoder: Encoder,
    num_lanes: u32,
    chaos: ChaosConfig,
    core: Mutex<CoreState>,
}

impl SimAxiJesd204 {
    pub fn new(
        log: &Logger,
        name: &str,
        direction: Direction,
        synth: SimSynth,
    ) -> Self {
        let mut core = CoreState::default();
        let magic = match direction {
            Direction::Tx => regs::TX_MAGIC,
            Direction::Rx => regs::RX_MAGIC,
        };
        let encoder = match synth.encoder {
            Encoder::Enc8b10b => regs::ENCODER_8B10B,
            Encoder::Enc64b66b => regs::ENCODER_64B66B,
        };
        core.set(regs::MAGIC, magic);
        core.set(regs::VERSION, synth.version);
        core.set(regs::CONF_NUM_LANES, synth.lanes);
        core.set(
            regs::CONF_DATA_PATH_WIDTH,
            synth.data_path_width_log2 | synth.tpl_data_path_width << 8,
        );
        core.set(regs::SYNTH_REG_1, encoder << 8);
        core.set(regs::LINK_DISABLE, regs::LINK_DISABLE_DISABLED);
        core.set(regs::LINK_STATE, regs::LINK_STATE_EXTERNAL_RESET);

        SimAxiJesd204 {
            log: log.new(o!("sim" => name.to_string())),
            direction,
            encoder: synth.encoder,
            num_lanes: synth.lanes,
            chaos: ChaosConfig::default(),
            core: Mutex::new(core),
        }
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Keep the link from advancing past `state`.
    pub fn stall_at(&self, state: LinkState) {
        let raw = match state {
            LinkState::Wait => STATE_WAIT,
            LinkState::Cgs => STATE_CGS,
            LinkState::Ilas => STATE_ILAS,
            LinkState::Data | LinkState::Unknown(_) => STATE_DATA,
        };
        self.core.lock().unwrap().stall_at = Some(raw);
    }

    /// A SYSREF edge arrives at the core.
    pub fn sysref_pulse(&self) {
        let mut core = self.core.lock().unwrap();
        core.pulses += 1;
        if core.sysref_enabled() {
            core.aligned = true;
            let status = core.get(regs::SYSREF_STATUS);
            core.set(regs::SYSREF_STATUS, status | regs::SYSREF_STATUS_CAPTURED);
        }
    }

    /// Feed the core a free-running SYSREF.
    pub fn set_continuous_sysref(&self, on: bool) {
        self.core.lock().unwrap().continuous = on;
    }

    /// The configuration the far end of an RX link transmits in its ILAS.
    pub fn transmit_ilas(&self, cfg: &LinkConfig) {
        self.core.lock().unwrap().remote = Some(cfg.clone());
    }

    /// Make the core's link clock counter report `hz`.
    pub fn set_link_clock_hz(&self, hz: u64) {
        let ratio = u128::from(hz) * 65536 / 100_000_000;
        let ratio = u32::try_from(ratio).unwrap_or(u32::MAX);
        self.core.lock().unwrap().set(regs::LINK_CLK_RATIO, ratio);
    }

    /// Read a register without side effects.
    pub fn peek(&self, addr: u32) -> u32 {
        self.core.lock().unwrap().get(addr)
    }

    pub fn is_enabled(&self) -> bool {
        self.core.lock().unwrap().enabled()
    }

    /// Number of times `LINK_STATUS` has been read.
    pub fn status_reads(&self) -> u32 {
        self.core.lock().unwrap().status_reads
    }

    /// Number of SYSREF edges that reached the core.
    pub fn sysref_pulses(&self) -> u32 {
        self.core.lock().unwrap().pulses
    }

    fn write(&self, core: &mut CoreState, addr: u32, value: u32) {
        match addr {
            regs::MAGIC
            | regs::VERSION
            | regs::CONF_NUM_LANES
            | regs::CONF_DATA_PATH_WIDTH
            | regs::SYNTH_REG_1
            | regs::LINK_STATE
            | regs::LINK_STATUS
            | regs::LINK_CLK_RATIO => {}
            regs::SYSREF_STATUS => {
                let status = core.get(addr);
                core.set(addr, status & !value);
            }
            regs::LINK_DISABLE => {
                core.set(addr, value);
                core.state = STATE_WAIT;
                if core.enabled() {
                    core.set(regs::LINK_STATE, 0);
                    debug!(self.log, "link enabled");
                } else {
                    core.set(regs::LINK_STATE, regs::LINK_STATE_EXTERNAL_RESET);
                    debug!(self.log, "link disabled");
                }
            }
            _ if self.direction == Direction::Rx && addr >= regs::ilas(0, 0) => {}
            _ => core.set(addr, value),
        }
    }

    fn read_link_status(&self, core: &mut CoreState) -> u32 {
        core.status_reads += 1;
        if !core.enabled() {
            return STATE_WAIT;
        }
        if core.continuous && core.sysref_enabled() {
            core.aligned = true;
            let status = core.get(regs::SYSREF_STATUS);
            core.set(regs::SYSREF_STATUS, status | regs::SYSREF_STATUS_CAPTURED);
        }

        let state = core.state;
        let sync = match (self.encoder, state) {
            (Encoder::Enc8b10b, STATE_ILAS | STATE_DATA) => regs::LINK_STATUS_SYNC,
            _ => 0,
        };

        let blocked = core.stall_at.is_some_and(|limit| state >= limit)
            || (state == STATE_CGS && core.sysref_enabled() && !core.aligned);
        if state < STATE_DATA && !blocked {
            core.state += 1;
            debug!(self.log, "link state"; "state" => %LinkState::from_raw(core.state));
            match core.state {
                STATE_ILAS => self.enter_ilas(core),
                STATE_DATA => self.enter_data(core),
                _ => {}
            }
        }
        state | sync
    }

    fn active_lanes(&self, core: &CoreState) -> u32 {
        let disabled = core.get(regs::LANES_DISABLE);
        (0..self.num_lanes.min(32))
            .filter(|lane| disabled & (1 << lane) == 0)
            .count() as u32
    }

    fn enter_ilas(&self, core: &mut CoreState) {
        if core.aligned {
            let status = core.get(regs::SYSREF_STATUS);
            core.set(regs::SYSREF_STATUS, status | regs::SYSREF_STATUS_CAPTURED);
        }
        if self.direction != Direction::Rx || self.encoder != Encoder::Enc8b10b {
            return;
        }
        let Some(remote) = core.remote.clone() else {
            return;
        };
        for lane in 0..remote.lane_count.min(self.num_lanes as u8) {
            let words = compute_ilas(&remote, remote.lane_id(lane));
            for (word, value) in (0u32..).zip(words) {
                core.set(regs::ilas(lane.into(), word), value);
            }
        }
    }

    fn enter_data(&self, core: &mut CoreState) {
        if self.direction != Direction::Rx {
            return;
        }
        for lane in 0..self.active_lanes(core) {
            core.set(regs::lane_status(lane), 0x32);
            core.set(regs::lane_latency(lane), 32 + lane);
        }
    }
}

impl RegisterAccess for SimAxiJesd204 {
    fn reg_read(&self, addr: u32) -> DalResult<u32> {
        unfurl!(self, reg_read);
        let mut core = self.core.lock().unwrap();
        if addr == regs::LINK_STATUS {
            return Ok(self.read_link_status(&mut core));
        }
        Ok(core.get(addr))
    }

    fn reg_write(&self, addr: u32, value: u32) -> DalResult<()> {
        unfurl!(self, reg_write);
        let mut core = self.core.lock().unwrap();
        self.write(&mut core, addr, value);
        Ok(())
    }
}
