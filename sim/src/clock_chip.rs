// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A clock distribution chip acting as the topology's SYSREF provider.
//!
//! During `LINK_SUPPORTED` the chip folds every link's LMFC/LEMC rate into a
//! SYSREF plan, and during `LINK_PRE_SETUP` it settles on a SYSREF frequency
//! and pulse timer.  A SYSREF strobe is delivered to every attached link
//! controller.  Each bring-up starts from an empty plan: the first
//! `LINK_SUPPORTED` after a settled or failed plan, or for a link that was
//! already folded in, discards what the previous run left behind.

use std::sync::Arc;
use std::sync::Mutex;

use jesd204::fsm::JesdDevice;
use jesd204::fsm::Reason;
use jesd204::fsm::StageResult;
use jesd204::fsm::StateChange;
use jesd204::link::SysrefMode;
use jesd204::sysref;
use jesd204::DeviceError;
use jesd204::JesdLink;
use jesd204::LinkId;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;

use crate::axi::SimAxiJesd204;
use crate::chaos::unfurl;
use crate::chaos::ChaosConfig;

pub const DEFAULT_VCO_HZ: u64 = 2_949_120_000;
pub const DEFAULT_MAX_SYSREF_HZ: u64 = 10_000_000;
/// Largest divider an output channel supports.
pub const OUTPUT_DIVIDER_MAX: u64 = 4094;

/// The SYSREF frequency plan built up during bring-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SysrefPlan {
    /// Slowest LMFC/LEMC rate seen.
    pub lmfc_lemc_rate_hz: Option<u64>,
    /// Running GCD of the LMFC/LEMC rates and the VCO.
    pub gcd_hz: Option<u64>,
    pub sysref_hz: u64,
    /// SYSREF pulse timer, as a divider of the VCO.
    pub timer_div: u64,
}

#[derive(Debug, Default)]
struct ChipState {
    plan: SysrefPlan,
    /// Links folded into `plan` so far.
    folded: Vec<LinkId>,
    /// Set once `LINK_PRE_SETUP` has chosen a frequency.
    settled: bool,
    pulses: u32,
    /// `pulses` when the outputs were last armed.
    pulses_at_arm: u32,
    outputs_enabled: bool,
    armed: bool,
}

impl ChipState {
    fn plan_is_stale(&self, link: LinkId) -> bool {
        let failed =
            self.plan.lmfc_lemc_rate_hz.is_some() && self.plan.gcd_hz.is_none();
        self.settled || failed || self.folded.contains(&link)
    }

    fn reset_plan(&mut self) {
        self.plan = SysrefPlan::default();
        self.folded.clear();
        self.settled = false;
    }
}

/// A cloneable view of a [`SimClockChip`]'s state, usable after the chip has
/// been handed to a topology.
#[derive(Clone, Debug, Default)]
pub struct ClockChipMonitor(Arc<Mutex<ChipState>>);

impl ClockChipMonitor {
    pub fn plan(&self) -> SysrefPlan {
        self.0.lock().unwrap().plan
    }

    /// SYSREF strobes emitted so far.
    pub fn pulses(&self) -> u32 {
        self.0.lock().unwrap().pulses
    }

    pub fn outputs_enabled(&self) -> bool {
        self.0.lock().unwrap().outputs_enabled
    }
}

pub struct SimClockChip {
    log: Logger,
    name: String,
    vco_hz: u64,
    desired_sysref_hz: Option<u64>,
    max_sysref_hz: u64,
    sinks: Vec<Arc<SimAxiJesd204>>,
    chaos: ChaosConfig,
    state: ClockChipMonitor,
}

impl SimClockChip {
    pub fn new(log: &Logger, name: impl Into<String>) -> Self {
        let name = name.into();
        SimClockChip {
            log: log.new(o!("device" => name.clone())),
            name,
            vco_hz: DEFAULT_VCO_HZ,
            desired_sysref_hz: None,
            max_sysref_hz: DEFAULT_MAX_SYSREF_HZ,
            sinks: Vec::new(),
            chaos: ChaosConfig::default(),
            state: ClockChipMonitor::default(),
        }
    }

    pub fn with_vco(mut self, hz: u64) -> Self {
        self.vco_hz = hz;
        self
    }

    pub fn with_desired_sysref(mut self, hz: u64) -> Self {
        self.desired_sysref_hz = Some(hz);
        self
    }

    pub fn with_max_sysref(mut self, hz: u64) -> Self {
        self.max_sysref_hz = hz;
        self
    }

    /// Route this chip's SYSREF output to `sink`.
    pub fn with_sink(mut self, sink: Arc<SimAxiJesd204>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn monitor(&self) -> ClockChipMonitor {
        self.state.clone()
    }

    fn min_divisor(&self) -> u64 {
        (self.vco_hz + OUTPUT_DIVIDER_MAX / 2) / OUTPUT_DIVIDER_MAX
    }
}

impl JesdDevice for SimClockChip {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_supported(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        let mut state = self.state.0.lock().unwrap();
        if reason == Reason::Uninit {
            state.reset_plan();
            return Ok(StateChange::Done);
        }
        if state.plan_is_stale(link.id) {
            debug!(self.log, "starting a new SYSREF plan"; "link" => link.id);
            state.reset_plan();
        }
        state.folded.push(link.id);

        let rate = link.lmfc_lemc_rate_hz();
        let plan = &mut state.plan;
        let dividend = plan.gcd_hz.unwrap_or(self.vco_hz);
        plan.lmfc_lemc_rate_hz =
            Some(plan.lmfc_lemc_rate_hz.map_or(rate, |r| r.min(rate)));
        plan.gcd_hz = sysref::lmfc_lemc_validate(
            plan.gcd_hz,
            dividend,
            rate,
            self.min_divisor(),
        );
        debug!(self.log, "folded link into SYSREF plan";
            "link" => link.id,
            "lmfc_lemc_rate_hz" => rate,
            "gcd_hz" => ?plan.gcd_hz);
        if plan.gcd_hz.is_none() {
            return Err(DeviceError::Failed(format!(
                "link {}: LMFC/LEMC rate {rate} Hz has no usable SYSREF divisor",
                link.id
            )));
        }
        Ok(StateChange::Done)
    }

    fn link_pre_setup(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        if reason != Reason::Init {
            return Ok(StateChange::Done);
        }
        let mut state = self.state.0.lock().unwrap();
        let plan = &mut state.plan;
        let Some(gcd) = plan.gcd_hz else {
            return Err(DeviceError::Failed(format!(
                "link {}: no SYSREF plan",
                link.id
            )));
        };
        let sysref_hz = sysref::sysref_frequency(
            gcd,
            self.desired_sysref_hz,
            self.max_sysref_hz,
        );
        let timer_div =
            sysref::sysref_timer(sysref_hz, self.vco_hz).ok_or_else(|| {
                DeviceError::Failed(format!(
                    "SYSREF of {sysref_hz} Hz is too slow for the pulse timer"
                ))
            })?;
        plan.sysref_hz = sysref_hz;
        plan.timer_div = timer_div;
        state.settled = true;
        info!(self.log, "SYSREF plan";
            "link" => link.id,
            "sysref_hz" => sysref_hz,
            "timer_div" => timer_div);
        Ok(StateChange::Done)
    }

    fn clks_enable(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.state.0.lock().unwrap().outputs_enabled = reason == Reason::Init;
        Ok(StateChange::Done)
    }

    fn clk_sync_stage1(
        &mut self,
        reason: Reason,
        links: &[&JesdLink],
    ) -> StageResult {
        if reason != Reason::Init {
            return Ok(StateChange::Done);
        }
        let continuous = links
            .iter()
            .any(|l| l.uses_sysref() && l.sysref_mode == SysrefMode::Continuous);
        for sink in &self.sinks {
            sink.set_continuous_sysref(continuous);
        }
        let mut state = self.state.0.lock().unwrap();
        state.armed = true;
        state.pulses_at_arm = state.pulses;
        debug!(self.log, "output dividers restarted"; "continuous" => continuous);
        Ok(StateChange::Done)
    }

    fn clk_sync_stage3(
        &mut self,
        reason: Reason,
        links: &[&JesdLink],
    ) -> StageResult {
        if reason != Reason::Init {
            return Ok(StateChange::Done);
        }
        let mut state = self.state.0.lock().unwrap();
        state.armed = false;
        let needs_pulse = links
            .iter()
            .any(|l| l.uses_sysref() && l.sysref_mode == SysrefMode::OneShot);
        if needs_pulse && state.pulses == state.pulses_at_arm {
            warn!(self.log, "SYSREF phase is not stable, no pulse was emitted");
        }
        Ok(StateChange::Done)
    }

    fn sysref(&mut self) -> Result<(), DeviceError> {
        unfurl!(self, sysref);
        let mut state = self.state.0.lock().unwrap();
        if !state.outputs_enabled {
            return Err(DeviceError::Failed(
                "SYSREF requested with outputs disabled".to_string(),
            ));
        }
        state.pulses += 1;
        for sink in &self.sinks {
            sink.sysref_pulse();
        }
        debug!(self.log, "SYSREF pulse"; "count" => state.pulses);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axi::SimSynth;
    use jesd204::link::Direction;
    use jesd204::LinkConfig;
    use slog::Drain;

    fn logger() -> Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Logger::root(drain, slog::o!())
    }

    fn link(id: u8, k: u16) -> JesdLink {
        let mut link = JesdLink::new(
            id,
            Direction::Tx,
            LinkConfig {
                lane_count: 4,
                octets_per_frame: 4,
                frames_per_multiframe: k,
                converters_per_device: 8,
                ..Default::default()
            },
        );
        link.sample_rate_hz = 245_760_000;
        link
    }

    #[test]
    fn test_sysref_plan() {
        let mut chip = SimClockChip::new(&logger(), "clk");
        let monitor = chip.monitor();
        let a = link(0, 32);
        let b = link(1, 16);

        chip.link_supported(Reason::Init, &a).unwrap();
        chip.link_supported(Reason::Init, &b).unwrap();
        let plan = monitor.plan();
        assert_eq!(plan.lmfc_lemc_rate_hz, Some(a.lmfc_lemc_rate_hz()));
        assert_eq!(plan.gcd_hz, Some(a.lmfc_lemc_rate_hz()));

        chip.link_pre_setup(Reason::Init, &a).unwrap();
        let plan = monitor.plan();
        assert!(plan.sysref_hz <= DEFAULT_MAX_SYSREF_HZ);
        assert_eq!(plan.gcd_hz.unwrap() % plan.sysref_hz, 0);
        assert!(plan.timer_div > 0);

        chip.link_supported(Reason::Uninit, &a).unwrap();
        assert_eq!(monitor.plan(), SysrefPlan::default());
    }

    #[test]
    fn test_each_bringup_starts_a_new_plan() {
        let mut chip = SimClockChip::new(&logger(), "clk");
        let monitor = chip.monitor();
        let fast = link(0, 16);
        let slow = link(1, 32);

        chip.link_supported(Reason::Init, &fast).unwrap();
        chip.link_pre_setup(Reason::Init, &fast).unwrap();
        let alone = monitor.plan();

        // A run over both links, then a run over the fast one again.
        chip.link_supported(Reason::Init, &fast).unwrap();
        chip.link_supported(Reason::Init, &slow).unwrap();
        chip.link_pre_setup(Reason::Init, &fast).unwrap();
        assert_eq!(
            monitor.plan().lmfc_lemc_rate_hz,
            Some(slow.lmfc_lemc_rate_hz())
        );

        chip.link_supported(Reason::Init, &fast).unwrap();
        chip.link_pre_setup(Reason::Init, &fast).unwrap();
        assert_eq!(monitor.plan(), alone);
    }

    #[test]
    fn test_plan_restarts_after_unsettled_run() {
        let mut chip = SimClockChip::new(&logger(), "clk");
        let monitor = chip.monitor();
        let fast = link(0, 16);
        let slow = link(1, 32);

        // This run folds both links but fails before LINK_PRE_SETUP.
        chip.link_supported(Reason::Init, &slow).unwrap();
        chip.link_supported(Reason::Init, &fast).unwrap();

        // The next run only brings up the fast link.
        chip.link_supported(Reason::Init, &fast).unwrap();
        let plan = monitor.plan();
        assert_eq!(plan.lmfc_lemc_rate_hz, Some(fast.lmfc_lemc_rate_hz()));
        assert_eq!(plan.gcd_hz, Some(fast.lmfc_lemc_rate_hz()));
    }

    #[test]
    fn test_pre_setup_without_plan() {
        let mut chip = SimClockChip::new(&logger(), "clk");
        assert!(chip.link_pre_setup(Reason::Init, &link(0, 32)).is_err());
    }

    #[test]
    fn test_sysref_reaches_sinks() {
        let log = logger();
        let sink = Arc::new(SimAxiJesd204::new(
            &log,
            "tx",
            Direction::Tx,
            SimSynth::default(),
        ));
        let mut chip = SimClockChip::new(&log, "clk").with_sink(sink.clone());
        let monitor = chip.monitor();

        // Outputs must be running first.
        assert!(chip.sysref().is_err());
        chip.clks_enable(Reason::Init, &link(0, 32)).unwrap();
        chip.sysref().unwrap();
        chip.sysref().unwrap();
        assert_eq!(monitor.pulses(), 2);
        assert_eq!(sink.sysref_pulses(), 2);
    }

    #[test]
    fn test_sysref_chaos() {
        let mut chip = SimClockChip::new(&logger(), "clk")
            .with_chaos(ChaosConfig::uniform(1.0));
        chip.clks_enable(Reason::Init, &link(0, 32)).unwrap();
        assert!(matches!(chip.sysref(), Err(DeviceError::Dal(_))));
        assert_eq!(chip.monitor().pulses(), 0);
    }
}
