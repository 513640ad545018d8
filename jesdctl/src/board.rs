// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Board descriptions, and the simulated topology built from them.

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use dal::Delay;
use jesd204::axi::AxiJesd204Rx;
use jesd204::axi::AxiJesd204Tx;
use jesd204::fsm::FsmPolicy;
use jesd204::fsm::JesdDevice;
use jesd204::fsm::Topology;
use jesd204::fsm::TopologyDevice;
use jesd204::link::Direction;
use jesd204::link::Encoder;
use jesd204::status::LinkState;
use jesd204::JesdLink;
use jesd204::LinkId;
use serde::Deserialize;
use sim::ChaosConfig;
use sim::ClockChipMonitor;
use sim::SimAxiJesd204;
use sim::SimClock;
use sim::SimClockChip;
use sim::SimConverter;
use sim::SimSynth;
use slog::Logger;

/// A board: the links it carries and the devices taking part in them, in
/// bring-up order.
#[derive(Debug, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub fsm: FsmPolicy,
    pub links: Vec<JesdLink>,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub links: Vec<LinkId>,
    #[serde(default)]
    pub sysref_provider: bool,
    #[serde(default)]
    pub top_device: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceKind {
    Clock(ClockParams),
    AxiTx(AxiParams),
    AxiRx(AxiParams),
    Converter(ConverterParams),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClockParams {
    pub vco_hz: Option<u64>,
    pub desired_sysref_hz: Option<u64>,
    pub max_sysref_hz: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AxiParams {
    /// Synthesized lane count.  Defaults to the widest link on the core.
    pub lanes: Option<u32>,
    /// Step of the lane clock's output divider.
    pub lane_clock_step_hz: Option<u64>,
    /// Keep the simulated link from progressing past this state.
    pub stall_at: Option<StallState>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StallState {
    Wait,
    Cgs,
    Ilas,
}

impl From<StallState> for LinkState {
    fn from(s: StallState) -> Self {
        match s {
            StallState::Wait => LinkState::Wait,
            StallState::Cgs => LinkState::Cgs,
            StallState::Ilas => LinkState::Ilas,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConverterParams {
    pub device_id: u8,
    pub bank_id: u8,
    /// Overrides the sample rate of every link the converter drives.
    pub sample_rate_hz: Option<u64>,
    pub setup_defers: u32,
}

/// A topology of simulated devices, with handles onto the simulated hardware
/// for inspection after a run.
pub struct Board {
    pub topology: Topology,
    pub cores: Vec<(String, Arc<SimAxiJesd204>)>,
    pub clock_chips: Vec<(String, ClockChipMonitor)>,
}

fn converter(
    log: &Logger,
    dev: &DeviceConfig,
    params: &ConverterParams,
) -> SimConverter {
    let conv = SimConverter::new(log, &dev.name)
        .with_ids(params.device_id, params.bank_id)
        .with_setup_defers(params.setup_defers)
        .with_chaos(dev.chaos.clone());
    match params.sample_rate_hz {
        Some(hz) => conv.with_sample_rate(hz),
        None => conv,
    }
}

/// Read and parse a board description.
pub fn load(path: &Path) -> anyhow::Result<BoardConfig> {
    let txt = std::fs::read_to_string(path)
        .with_context(|| format!("reading board file {}", path.display()))?;
    parse(&txt).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse(txt: &str) -> anyhow::Result<BoardConfig> {
    let config: BoardConfig = toml::from_str(txt)?;
    Ok(config)
}

impl BoardConfig {
    pub fn link(&self, id: LinkId) -> Option<&JesdLink> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Apply the same fault probability to every simulated operation of
    /// every device.
    pub fn set_chaos(&mut self, probability: f64) {
        for dev in &mut self.devices {
            dev.chaos = ChaosConfig::uniform(probability);
        }
    }

    fn device_links(&self, dev: &DeviceConfig) -> anyhow::Result<Vec<&JesdLink>> {
        dev.links
            .iter()
            .map(|id| {
                self.link(*id).ok_or_else(|| {
                    anyhow!("device {} refers to unknown link {id}", dev.name)
                })
            })
            .collect()
    }

    // The simulated register file behind an AXI core.
    fn core(
        &self,
        log: &Logger,
        dev: &DeviceConfig,
        direction: Direction,
        params: &AxiParams,
    ) -> anyhow::Result<Arc<SimAxiJesd204>> {
        let links = self.device_links(dev)?;
        let encoder = links.first().map_or(Encoder::default(), |l| l.encoder);
        let lanes = params.lanes.unwrap_or_else(|| {
            links
                .iter()
                .map(|l| u32::from(l.config.lane_count))
                .max()
                .unwrap_or(1)
        });
        let core = SimAxiJesd204::new(
            log,
            &dev.name,
            direction,
            SimSynth::new(encoder).with_lanes(lanes),
        )
        .with_chaos(dev.chaos.clone());
        if let Some(state) = params.stall_at {
            core.stall_at(state.into());
        }
        if let Some(link) = links.first() {
            core.set_link_clock_hz(link.link_clock_hz());
        }
        Ok(Arc::new(core))
    }

    /// Build the simulated topology described by this board.
    pub fn build(
        &self,
        log: &Logger,
        delay: Box<dyn Delay>,
    ) -> anyhow::Result<Board> {
        // The AXI cores come first, as the clock chips and converters are
        // wired to them.
        let mut wired: Vec<(&DeviceConfig, Arc<SimAxiJesd204>)> = Vec::new();
        for dev in &self.devices {
            let core = match &dev.kind {
                DeviceKind::AxiTx(p) => self.core(log, dev, Direction::Tx, p)?,
                DeviceKind::AxiRx(p) => self.core(log, dev, Direction::Rx, p)?,
                _ => continue,
            };
            wired.push((dev, core));
        }
        let core_of = |dev: &DeviceConfig| {
            wired
                .iter()
                .find(|(owner, _)| owner.name == dev.name)
                .map(|(_, core)| core.clone())
                .ok_or_else(|| anyhow!("no simulated core for {}", dev.name))
        };

        let mut devices = Vec::new();
        let mut clock_chips = Vec::new();
        for dev in &self.devices {
            let device: Box<dyn JesdDevice> = match &dev.kind {
                DeviceKind::Clock(p) => {
                    let mut chip = SimClockChip::new(log, &dev.name)
                        .with_chaos(dev.chaos.clone());
                    if let Some(hz) = p.vco_hz {
                        chip = chip.with_vco(hz);
                    }
                    if let Some(hz) = p.desired_sysref_hz {
                        chip = chip.with_desired_sysref(hz);
                    }
                    if let Some(hz) = p.max_sysref_hz {
                        chip = chip.with_max_sysref(hz);
                    }
                    for (owner, core) in &wired {
                        if owner.links.iter().any(|id| dev.links.contains(id)) {
                            chip = chip.with_sink(core.clone());
                        }
                    }
                    clock_chips.push((dev.name.clone(), chip.monitor()));
                    Box::new(chip)
                }
                DeviceKind::AxiTx(p) => {
                    let core = core_of(dev)?;
                    let (lane, device) = self.clocks(log, dev, p);
                    Box::new(
                        AxiJesd204Tx::new(log, &dev.name, core)
                            .with_context(|| format!("probing {}", dev.name))?
                            .with_lane_clock(Box::new(lane))
                            .with_device_clock(Box::new(device)),
                    )
                }
                DeviceKind::AxiRx(p) => {
                    let core = core_of(dev)?;
                    let (lane, device) = self.clocks(log, dev, p);
                    Box::new(
                        AxiJesd204Rx::new(log, &dev.name, core)
                            .with_context(|| format!("probing {}", dev.name))?
                            .with_lane_clock(Box::new(lane))
                            .with_device_clock(Box::new(device)),
                    )
                }
                DeviceKind::Converter(p) => {
                    let mut conv = converter(log, dev, p);
                    for id in &dev.links {
                        let peer = wired.iter().find(|(owner, core)| {
                            core.direction() == Direction::Rx
                                && owner.links.contains(id)
                        });
                        if let Some((_, core)) = peer {
                            conv = conv.with_peer(*id, core.clone());
                        }
                    }
                    Box::new(conv)
                }
            };

            let mut entry = TopologyDevice::new(device, dev.links.clone());
            if dev.top_device {
                entry = entry.top_device();
            }
            if dev.sysref_provider {
                entry = entry.sysref_provider();
            }
            for dep in &dev.depends_on {
                entry = entry.depends_on(dep.clone());
            }
            devices.push(entry);
        }

        let topology =
            Topology::new(log.clone(), self.links.clone(), devices, delay)
                .context("building topology")?
                .with_policy(self.fsm);
        let cores = wired
            .into_iter()
            .map(|(dev, core)| (dev.name.clone(), core))
            .collect();
        Ok(Board {
            topology,
            cores,
            clock_chips,
        })
    }

    /// The links as the top device leaves them after `link_init`, which is
    /// what the link controllers program during bring-up.
    pub fn initialized_links(
        &self,
        log: &Logger,
    ) -> anyhow::Result<Vec<JesdLink>> {
        let mut links = self.links.clone();
        for dev in self.devices.iter().filter(|dev| dev.top_device) {
            let DeviceKind::Converter(p) = &dev.kind else {
                continue;
            };
            let mut conv = converter(log, dev, p);
            let owned = links.iter_mut().filter(|l| dev.links.contains(&l.id));
            for link in owned {
                conv.link_init(link).with_context(|| {
                    format!("initializing link {} on {}", link.id, dev.name)
                })?;
            }
        }
        Ok(links)
    }

    fn clocks(
        &self,
        log: &Logger,
        dev: &DeviceConfig,
        params: &AxiParams,
    ) -> (SimClock, SimClock) {
        let mut lane = SimClock::new(log, format!("{}-lane", dev.name))
            .with_chaos(dev.chaos.clone());
        if let Some(step) = params.lane_clock_step_hz {
            lane = lane.with_step(step);
        }
        let device = SimClock::new(log, format!("{}-device", dev.name))
            .with_chaos(dev.chaos.clone());
        (lane, device)
    }
}
