// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The JESD204 link data model.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigError;
use crate::ConfigResult;

/// Identifies a single link within a topology.
pub type LinkId = u8;

/// The ILAS version field for JESD204B links.
pub const JESD204_VERSION_B: u8 = 1;
/// The ILAS version field for JESD204C links.
pub const JESD204_VERSION_C: u8 = 2;

/// The line coding used on the link's lanes.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Encoder {
    #[default]
    #[serde(rename = "8b10b")]
    Enc8b10b,
    #[serde(rename = "64b66b")]
    Enc64b66b,
}

impl Encoder {
    /// Line rate overhead of the encoding, as (coded bits, payload bits).
    pub fn ratio(self) -> (u64, u64) {
        match self {
            Encoder::Enc8b10b => (10, 8),
            Encoder::Enc64b66b => (66, 64),
        }
    }

    /// Returns the value the octets per multiframe must be a multiple of,
    /// given the controller's native data path width in octets.
    pub fn multiframe_alignment(self, data_path_width: u32) -> u32 {
        match self {
            Encoder::Enc8b10b => data_path_width,
            Encoder::Enc64b66b => 256,
        }
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoder::Enc8b10b => write!(f, "8B10B"),
            Encoder::Enc64b66b => write!(f, "64B66B"),
        }
    }
}

impl FromStr for Encoder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "8b10b" => Ok(Encoder::Enc8b10b),
            "64b66b" => Ok(Encoder::Enc64b66b),
            _ => Err(ConfigError::InvalidMode(format!("unknown encoder {s}"))),
        }
    }
}

/// Which way data flows over the link, as seen from the FPGA.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// FPGA to DAC.
    #[default]
    Tx,
    /// ADC to FPGA.
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tx => write!(f, "tx"),
            Direction::Rx => write!(f, "rx"),
        }
    }
}

/// How the SYSREF provider emits SYSREF for a link.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SysrefMode {
    /// A single strobe, requested by the orchestrator during clock sync.
    #[default]
    OneShot,
    /// A free-running periodic SYSREF.
    Continuous,
}

/// The converter-link contract for one direction of one link.  The fields map
/// onto the JESD204 ILAS configuration fields; the letter in each comment is
/// the name the standard uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// DID
    pub device_id: u8,
    /// BID
    pub bank_id: u8,
    /// L
    pub lane_count: u8,
    /// F
    pub octets_per_frame: u16,
    /// K
    pub frames_per_multiframe: u16,
    /// M
    pub converters_per_device: u16,
    /// N
    pub converter_resolution: u8,
    /// N'
    pub bits_per_sample: u8,
    /// CS
    pub control_bits_per_sample: u8,
    /// S, encoded as zero when unset
    pub samples_per_frame: Option<u8>,
    /// SUBCLASSV
    pub subclass: u8,
    /// JESDV
    pub jesd_version: u8,
    /// HD
    pub high_density: bool,
    /// SCR
    pub scrambling_enabled: bool,
    /// Logical lane to lane id.  When empty, lane `n` carries id `n`.
    pub lane_ids: Vec<u8>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            device_id: 0,
            bank_id: 0,
            lane_count: 1,
            octets_per_frame: 1,
            frames_per_multiframe: 32,
            converters_per_device: 1,
            converter_resolution: 16,
            bits_per_sample: 16,
            control_bits_per_sample: 0,
            samples_per_frame: None,
            subclass: 1,
            jesd_version: JESD204_VERSION_B,
            high_density: false,
            scrambling_enabled: true,
            lane_ids: Vec::new(),
        }
    }
}

fn check_range(
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> ConfigResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FieldRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl LinkConfig {
    /// Verify every field fits its ILAS encoding.
    pub fn validate(&self) -> ConfigResult<()> {
        check_range("bank_id", self.bank_id.into(), 0, 15)?;
        check_range("lane_count", self.lane_count.into(), 1, 32)?;
        check_range("octets_per_frame", self.octets_per_frame.into(), 1, 256)?;
        check_range(
            "frames_per_multiframe",
            self.frames_per_multiframe.into(),
            1,
            256,
        )?;
        check_range(
            "converters_per_device",
            self.converters_per_device.into(),
            1,
            256,
        )?;
        check_range(
            "converter_resolution",
            self.converter_resolution.into(),
            1,
            32,
        )?;
        check_range("bits_per_sample", self.bits_per_sample.into(), 1, 32)?;
        check_range(
            "control_bits_per_sample",
            self.control_bits_per_sample.into(),
            0,
            3,
        )?;
        if let Some(s) = self.samples_per_frame {
            check_range("samples_per_frame", s.into(), 1, 32)?;
        }
        check_range("subclass", self.subclass.into(), 0, 2)?;
        check_range("jesd_version", self.jesd_version.into(), 0, 7)?;

        if !self.lane_ids.is_empty() {
            if self.lane_ids.len() != usize::from(self.lane_count) {
                return Err(ConfigError::LaneIdCount {
                    expected: self.lane_count.into(),
                    found: self.lane_ids.len(),
                });
            }
            for id in &self.lane_ids {
                check_range("lane_id", u32::from(*id), 0, 31)?;
            }
        }
        Ok(())
    }

    /// The lane id carried by logical lane `lane`.
    pub fn lane_id(&self, lane: u8) -> u8 {
        self.lane_ids.get(usize::from(lane)).copied().unwrap_or(lane)
    }

    pub fn octets_per_multiframe(&self) -> u32 {
        u32::from(self.octets_per_frame) * u32::from(self.frames_per_multiframe)
    }
}

/// A link as carried by a bring-up topology: the ILAS-level configuration plus
/// the rates and modes needed to derive its clocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JesdLink {
    pub id: LinkId,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub encoder: Encoder,
    /// Converter sample rate, in Hz.
    pub sample_rate_hz: u64,
    /// Divider between the converter sample rate and the link sample rate.
    #[serde(default = "one")]
    pub sample_rate_div: u32,
    #[serde(default)]
    pub sysref_mode: SysrefMode,
    /// Multiblocks per extended multiblock (E), 64B66B only.
    #[serde(default = "one")]
    pub multiblocks_in_emb: u32,
    #[serde(default)]
    pub config: LinkConfig,
}

fn one() -> u32 {
    1
}

impl JesdLink {
    pub fn new(id: LinkId, direction: Direction, config: LinkConfig) -> Self {
        JesdLink {
            id,
            direction,
            encoder: Encoder::default(),
            sample_rate_hz: 0,
            sample_rate_div: 1,
            sysref_mode: SysrefMode::default(),
            multiblocks_in_emb: 1,
            config,
        }
    }

    /// Validate the link as a whole, including the constraints that depend
    /// on the encoding.
    pub fn validate(&self) -> ConfigResult<()> {
        self.config.validate()?;
        match self.encoder {
            Encoder::Enc8b10b => {
                check_range(
                    "frames_per_multiframe",
                    self.config.frames_per_multiframe.into(),
                    1,
                    32,
                )?;
                if self.config.jesd_version > JESD204_VERSION_B {
                    return Err(ConfigError::InvalidMode(format!(
                        "link {}: 8B10B links must be JESD204B or earlier",
                        self.id
                    )));
                }
            }
            Encoder::Enc64b66b => {
                check_range(
                    "multiblocks_in_emb",
                    self.multiblocks_in_emb,
                    1,
                    32,
                )?;
            }
        }
        Ok(())
    }

    /// Serial bit rate of one lane, in Hz.
    pub fn lane_rate_hz(&self) -> u64 {
        let (coded, payload) = self.encoder.ratio();
        let cfg = &self.config;
        let num = u128::from(cfg.converters_per_device)
            * u128::from(cfg.bits_per_sample)
            * u128::from(coded)
            * u128::from(self.sample_rate_hz);
        let den = u128::from(cfg.lane_count.max(1))
            * u128::from(payload)
            * u128::from(self.sample_rate_div.max(1));
        u64::try_from(num / den).unwrap_or(u64::MAX)
    }

    /// The link layer clock, one word per lane per cycle.
    pub fn link_clock_hz(&self) -> u64 {
        match self.encoder {
            Encoder::Enc8b10b => self.lane_rate_hz() / 40,
            Encoder::Enc64b66b => self.lane_rate_hz() / 66,
        }
    }

    /// The local multiframe clock (8B10B) or local extended multiblock clock
    /// (64B66B) rate, in Hz.
    pub fn lmfc_lemc_rate_hz(&self) -> u64 {
        let lane_rate = self.lane_rate_hz();
        match self.encoder {
            Encoder::Enc8b10b => {
                let octets = u64::from(self.config.octets_per_multiframe());
                lane_rate / (10 * octets.max(1))
            }
            Encoder::Enc64b66b => {
                lane_rate / (66 * 32 * u64::from(self.multiblocks_in_emb.max(1)))
            }
        }
    }

    /// Whether this link needs SYSREF for deterministic latency.
    pub fn uses_sysref(&self) -> bool {
        self.config.subclass == 1
    }
}

/// The set of links a bring-up operation targets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LinkSelect {
    /// Every link in the topology.
    #[default]
    All,
    Only(BTreeSet<LinkId>),
}

impl LinkSelect {
    pub fn only(ids: impl IntoIterator<Item = LinkId>) -> Self {
        LinkSelect::Only(ids.into_iter().collect())
    }

    pub fn contains(&self, id: LinkId) -> bool {
        match self {
            LinkSelect::All => true,
            LinkSelect::Only(ids) => ids.contains(&id),
        }
    }
}
