// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Drivers for the AXI JESD204 TX and RX link layer cores.
//!
//! The two cores share a register layout and most of their behavior, so a
//! single [`AxiJesd204`] type implements both, parameterized by a marker type
//! ([`Tx`] or [`Rx`]) that supplies the peripheral identity and the handful of
//! direction-specific operations.

use std::marker::PhantomData;

use dal::ClockControl;
use dal::RegisterAccess;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;

use crate::fsm::JesdDevice;
use crate::fsm::Reason;
use crate::fsm::StageResult;
use crate::fsm::StateChange;
use crate::ilas;
use crate::link::Direction;
use crate::link::Encoder;
use crate::link::JesdLink;
use crate::link::LinkConfig;
use crate::link::SysrefMode;
use crate::status::LinkStatus;
use crate::status::RawLinkStatus;
use crate::ConfigError;
use crate::ConfigResult;
use crate::ControllerError;
use crate::ControllerResult;
use crate::DeviceError;

pub mod regs;
mod rx;
mod tx;

pub use rx::AxiJesd204Rx;
pub use rx::Rx;
pub use tx::AxiJesd204Tx;
pub use tx::Tx;

/// Identifies which of the two link layer cores a controller drives.
pub trait Core: Sized {
    /// The value of the `MAGIC` register.
    const MAGIC: u32;
    const DIRECTION: Direction;
    /// Whether the core transmits ILAS from its configuration registers.
    /// The RX core instead captures the ILAS it receives.
    const SENDS_ILAS: bool;

    /// Direction-specific work once the link is carrying data.
    fn post_running<R: RegisterAccess>(
        _ctrl: &AxiJesd204<Self, R>,
        _link: &JesdLink,
    ) -> ControllerResult<()> {
        Ok(())
    }
}

/// Derive the link layer core's device clock from its link clock.
/// The division floors; a zero transport data path width means the two
/// widths are equal.
pub fn compute_device_clock(
    link_rate: u64,
    data_path_width: u32,
    tpl_data_path_width: u32,
) -> u64 {
    if tpl_data_path_width == 0 {
        return link_rate;
    }
    let rate = u128::from(link_rate) * u128::from(data_path_width)
        / u128::from(tpl_data_path_width);
    u64::try_from(rate).unwrap_or(u64::MAX)
}

fn low_bits(n: u32) -> u32 {
    if n >= 32 {
        u32::MAX
    } else {
        (1 << n) - 1
    }
}

/// A single AXI JESD204 link layer core.
pub struct AxiJesd204<D: Core, R: RegisterAccess> {
    log: Logger,
    name: String,
    regs: R,
    version: u32,
    num_lanes: u32,
    data_path_width: u32,
    tpl_data_path_width: u32,
    encoder: Encoder,
    sysref_mode: SysrefMode,
    lane_clk: Option<Box<dyn ClockControl>>,
    device_clk: Option<Box<dyn ClockControl>>,
    lane_rate_hz: u64,
    device_clock_hz: u64,
    _core: PhantomData<D>,
}

impl<D: Core, R: RegisterAccess> AxiJesd204<D, R> {
    /// Identify the peripheral behind `regs` and read its synthesis
    /// parameters.  Nothing is written.
    pub fn new(
        log: &Logger,
        name: impl Into<String>,
        regs: R,
    ) -> ControllerResult<Self> {
        let name = name.into();
        let log = log.new(o!("device" => name.clone()));

        let magic = regs.reg_read(regs::MAGIC)?;
        if magic != D::MAGIC {
            return Err(ControllerError::UnexpectedPeripheral {
                expected: D::MAGIC,
                found: magic,
            });
        }

        let version = regs.reg_read(regs::VERSION)?;
        if regs::version_major(version) != regs::SUPPORTED_MAJOR_VERSION {
            return Err(ControllerError::UnsupportedVersion {
                major: regs::version_major(version),
                minor: regs::version_minor(version),
                patch: regs::version_patch(version),
            });
        }

        let num_lanes = regs.reg_read(regs::CONF_NUM_LANES)?;
        let widths = regs.reg_read(regs::CONF_DATA_PATH_WIDTH)?;
        let data_path_width = 1 << (widths & 0xf);
        let tpl_data_path_width = (widths >> 8) & 0xff;
        let synth = regs.reg_read(regs::SYNTH_REG_1)?;
        let encoder = match regs::synth_encoder(synth) {
            regs::ENCODER_64B66B => Encoder::Enc64b66b,
            _ => Encoder::Enc8b10b,
        };

        info!(log, "found AXI JESD204 {} core", D::DIRECTION;
            "version" => format!(
                "{}.{}.{}",
                regs::version_major(version),
                regs::version_minor(version),
                regs::version_patch(version)
            ),
            "lanes" => num_lanes,
            "data_path_width" => data_path_width,
            "tpl_data_path_width" => tpl_data_path_width,
            "encoder" => %encoder);

        Ok(AxiJesd204 {
            log,
            name,
            regs,
            version,
            num_lanes,
            data_path_width,
            tpl_data_path_width,
            encoder,
            sysref_mode: SysrefMode::default(),
            lane_clk: None,
            device_clk: None,
            lane_rate_hz: 0,
            device_clock_hz: 0,
            _core: PhantomData,
        })
    }

    /// Attach the clock feeding the transceiver lanes.
    pub fn with_lane_clock(mut self, clk: Box<dyn ClockControl>) -> Self {
        self.lane_clk = Some(clk);
        self
    }

    /// Attach the clock feeding the link layer core.
    pub fn with_device_clock(mut self, clk: Box<dyn ClockControl>) -> Self {
        self.device_clk = Some(clk);
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_lanes(&self) -> u32 {
        self.num_lanes
    }

    /// Width of the link data path, in octets.
    pub fn data_path_width(&self) -> u32 {
        self.data_path_width
    }

    pub fn tpl_data_path_width(&self) -> u32 {
        self.tpl_data_path_width
    }

    pub fn encoder(&self) -> Encoder {
        self.encoder
    }

    /// The lane rate programmed during the last `LINK_PRE_SETUP`.
    pub fn lane_rate_hz(&self) -> u64 {
        self.lane_rate_hz
    }

    /// The device clock programmed during the last `LINK_PRE_SETUP`.
    pub fn device_clock_hz(&self) -> u64 {
        self.device_clock_hz
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub(crate) fn log(&self) -> &Logger {
        &self.log
    }

    pub fn set_sysref_mode(&mut self, mode: SysrefMode) {
        self.sysref_mode = mode;
    }

    /// Check `cfg` against this core without touching the hardware.
    pub fn check_config(&self, cfg: &LinkConfig) -> ConfigResult<()> {
        cfg.validate()?;
        let lanes = u32::from(cfg.lane_count);
        if lanes > self.num_lanes {
            return Err(ConfigError::TooManyLanes {
                lanes,
                max: self.num_lanes,
            });
        }
        let octets_per_multiframe = cfg.octets_per_multiframe();
        if octets_per_multiframe > regs::OCTETS_PER_MULTIFRAME_MAX {
            return Err(ConfigError::FieldRange {
                field: "octets_per_multiframe",
                value: octets_per_multiframe,
                min: 1,
                max: regs::OCTETS_PER_MULTIFRAME_MAX,
            });
        }
        let alignment = self.encoder.multiframe_alignment(self.data_path_width);
        if octets_per_multiframe % alignment != 0 {
            return Err(ConfigError::InvalidFrameAlignment {
                octets_per_multiframe,
                alignment,
            });
        }
        Ok(())
    }

    /// Program the frame geometry, scrambling, lane mask, SYSREF handling and
    /// (TX 8B10B only) ILAS payloads.  The configuration is fully checked
    /// before the first register write.  The link is left disabled.
    pub fn apply_config(&mut self, cfg: &LinkConfig) -> ControllerResult<()> {
        self.check_config(cfg)?;

        let octets_per_multiframe = cfg.octets_per_multiframe();
        let octets_per_frame = u32::from(cfg.octets_per_frame);
        self.regs.reg_write(
            regs::LINK_CONF0,
            (octets_per_multiframe - 1) | (octets_per_frame - 1) << 16,
        )?;
        self.regs.reg_write(
            regs::LINK_CONF1,
            if cfg.scrambling_enabled {
                0
            } else {
                regs::LINK_CONF1_SCRAMBLER_DISABLE
            },
        )?;
        self.regs.reg_write(
            regs::LANES_DISABLE,
            low_bits(self.num_lanes) & !low_bits(cfg.lane_count.into()),
        )?;

        let sysref_conf = if cfg.subclass == 0 {
            regs::SYSREF_CONF_DISABLE
        } else if self.sysref_mode == SysrefMode::OneShot {
            regs::SYSREF_CONF_ONESHOT
        } else {
            0
        };
        self.regs.reg_write(regs::SYSREF_CONF, sysref_conf)?;

        if D::SENDS_ILAS && self.encoder == Encoder::Enc8b10b {
            for lane in 0..cfg.lane_count {
                let words = ilas::compute_ilas(cfg, cfg.lane_id(lane));
                for (word, value) in (0u32..).zip(words) {
                    self.regs
                        .reg_write(regs::ilas(lane.into(), word), value)?;
                }
            }
        }

        debug!(self.log, "applied link config";
            "lanes" => cfg.lane_count,
            "octets_per_multiframe" => octets_per_multiframe,
            "sysref_conf" => sysref_conf);
        Ok(())
    }

    /// Apply a topology link to this core.
    pub fn setup_link(&mut self, link: &JesdLink) -> ControllerResult<()> {
        self.check_link(link)?;
        self.sysref_mode = link.sysref_mode;
        self.apply_config(&link.config)
    }

    fn check_link(&self, link: &JesdLink) -> ConfigResult<()> {
        if link.encoder != self.encoder {
            return Err(ConfigError::InvalidMode(format!(
                "link {} uses {}, core {} is synthesized for {}",
                link.id, link.encoder, self.name, self.encoder
            )));
        }
        if link.direction != D::DIRECTION {
            return Err(ConfigError::InvalidMode(format!(
                "link {} is {}, core {} is {}",
                link.id,
                link.direction,
                self.name,
                D::DIRECTION
            )));
        }
        link.validate()?;
        self.check_config(&link.config)
    }

    /// Clear any stale SYSREF status and take the link out of reset.
    pub fn enable(&mut self) -> ControllerResult<()> {
        self.regs.reg_write(
            regs::SYSREF_STATUS,
            regs::SYSREF_STATUS_CAPTURED | regs::SYSREF_STATUS_ALIGN_ERROR,
        )?;
        self.regs.reg_write(regs::LINK_DISABLE, 0)?;
        debug!(self.log, "link enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> ControllerResult<()> {
        self.regs
            .reg_write(regs::LINK_DISABLE, regs::LINK_DISABLE_DISABLED)?;
        debug!(self.log, "link disabled");
        Ok(())
    }

    pub fn read_status(&self) -> ControllerResult<LinkStatus> {
        let raw = RawLinkStatus {
            link_disable: self.regs.reg_read(regs::LINK_DISABLE)?,
            link_state: self.regs.reg_read(regs::LINK_STATE)?,
            link_status: self.regs.reg_read(regs::LINK_STATUS)?,
            sysref_status: self.regs.reg_read(regs::SYSREF_STATUS)?,
        };
        let status = LinkStatus::decode(self.encoder, &raw);
        debug!(self.log, "link status"; "status" => %status);
        Ok(status)
    }

    /// The link clock measured by the core against its 100 MHz AXI clock,
    /// in kHz.  `None` until the core has seen a link clock.
    pub fn measured_link_clock_khz(&self) -> ControllerResult<Option<u64>> {
        let ratio = u64::from(self.regs.reg_read(regs::LINK_CLK_RATIO)?);
        if ratio == 0 {
            return Ok(None);
        }
        Ok(Some((ratio * 100_000 + (1 << 15)) >> 16))
    }

    // Compute the lane rate and device clock for `link` and program the
    // attached clocks.
    fn program_clocks(&mut self, link: &JesdLink) -> ControllerResult<()> {
        let lane_rate = link.lane_rate_hz();
        let device_clock = compute_device_clock(
            link.link_clock_hz(),
            self.data_path_width,
            self.tpl_data_path_width,
        );
        if let Some(clk) = &self.lane_clk {
            dal::set_exact_rate(clk.as_ref(), lane_rate)?;
        }
        if let Some(clk) = &self.device_clk {
            clk.set_rate(device_clock)?;
        }
        info!(self.log, "link clocks";
            "link" => link.id,
            "lane_rate_hz" => lane_rate,
            "device_clock_hz" => device_clock);
        self.lane_rate_hz = lane_rate;
        self.device_clock_hz = device_clock;
        Ok(())
    }

    fn set_clocks_enabled(&self, enabled: bool) -> ControllerResult<()> {
        for clk in [&self.lane_clk, &self.device_clk].into_iter().flatten() {
            if enabled {
                clk.enable()?;
            } else {
                clk.disable()?;
            }
        }
        Ok(())
    }
}

impl<D: Core, R: RegisterAccess> JesdDevice for AxiJesd204<D, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_supported(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        if reason == Reason::Init {
            self.check_link(link)?;
        }
        Ok(StateChange::Done)
    }

    fn link_pre_setup(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        if reason == Reason::Init {
            self.program_clocks(link)?;
        }
        Ok(StateChange::Done)
    }

    fn link_setup(&mut self, reason: Reason, link: &JesdLink) -> StageResult {
        match reason {
            Reason::Init => self.setup_link(link)?,
            Reason::Uninit => self.disable()?,
        }
        Ok(StateChange::Done)
    }

    fn clks_enable(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        self.set_clocks_enabled(reason == Reason::Init)?;
        Ok(StateChange::Done)
    }

    fn link_enable(&mut self, reason: Reason, _link: &JesdLink) -> StageResult {
        match reason {
            Reason::Init => self.enable()?,
            Reason::Uninit => self.disable()?,
        }
        Ok(StateChange::Done)
    }

    fn post_running(&mut self, link: &JesdLink) -> Result<(), DeviceError> {
        D::post_running(self, link)?;
        if let Some(khz) = self.measured_link_clock_khz()? {
            debug!(self.log, "measured link clock"; "khz" => khz);
        }
        Ok(())
    }

    fn link_status(
        &mut self,
        _link: &JesdLink,
    ) -> Result<Option<LinkStatus>, DeviceError> {
        Ok(Some(self.read_status()?))
    }
}
