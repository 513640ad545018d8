// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Rendering of board descriptions and bring-up results.

use std::io::Write;

use colored::*;
use jesd204::fsm::Stage;
use jesd204::ilas::IlasFields;
use jesd204::link::Direction;
use jesd204::status::LinkStatus;
use jesd204::JesdLink;
use jesd204::LinkId;
use jesd204::LinkSelect;
use serde::Serialize;
use sim::SysrefPlan;
use strum::IntoEnumIterator;
use tabwriter::TabWriter;

use crate::board::Board;
use crate::board::BoardConfig;

fn mhz(hz: u64) -> String {
    format!("{:.3} MHz", hz as f64 / 1e6)
}

fn gbps(hz: u64) -> String {
    format!("{:.4} Gbps", hz as f64 / 1e9)
}

/// Print the four ILAS configuration words sent on every lane of the
/// selected links.  `links` should already carry whatever the top device
/// fills in during `link_init`.
pub fn ilas(
    w: impl Write,
    links: &[JesdLink],
    link: Option<LinkId>,
) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(w);
    let links = links.iter().filter(|l| link.map_or(true, |id| l.id == id));
    for (i, link) in links.enumerate() {
        if i > 0 {
            writeln!(tw)?;
        }
        writeln!(tw, "link {} ({})", link.id, link.direction)?;
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            "Lane".underline(),
            "LID".underline(),
            "Word0".underline(),
            "Word1".underline(),
            "Word2".underline(),
            "Word3".underline(),
            "FCHK".underline(),
        )?;
        for lane in 0..link.config.lane_count {
            let lane_id = link.config.lane_id(lane);
            let fields = IlasFields::from_config(&link.config, lane_id);
            let words = fields.encode();
            writeln!(
                tw,
                "{lane}\t{lane_id}\t{:#010x}\t{:#010x}\t{:#010x}\t{:#010x}\t{:#04x}",
                words[0], words[1], words[2], words[3], fields.fchk,
            )?;
        }
    }
    tw.flush()?;
    Ok(())
}

/// Check every link of a board, and print the rates it derives.
pub fn rates(w: impl Write, board: &BoardConfig) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(w);
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "Link".underline(),
        "Dir".underline(),
        "Encoder".underline(),
        "Lanes".underline(),
        "Lane Rate".underline(),
        "Link Clock".underline(),
        "LMFC/LEMC".underline(),
        "Config".underline(),
    )?;
    for link in &board.links {
        let valid = match link.validate() {
            Ok(()) => "ok".green(),
            Err(e) => e.to_string().red(),
        };
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            link.id,
            link.direction,
            link.encoder,
            link.config.lane_count,
            gbps(link.lane_rate_hz()),
            mhz(link.link_clock_hz()),
            mhz(link.lmfc_lemc_rate_hz()),
            valid,
        )?;
    }
    tw.flush()?;
    Ok(())
}

/// One device's view of one link after a bring-up.
#[derive(Clone, Debug, Serialize)]
pub struct LinkReport {
    pub link: LinkId,
    pub direction: Direction,
    pub lane_rate_hz: u64,
    pub device: String,
    pub status: LinkStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub callbacks: u32,
    pub defers: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct SysrefReport {
    pub device: String,
    pub plan: SysrefPlan,
    pub pulses: u32,
}

/// Register-level activity seen by one simulated link layer core.
#[derive(Clone, Debug, Serialize)]
pub struct CoreReport {
    pub device: String,
    pub enabled: bool,
    pub status_reads: u32,
    pub sysref_pulses: u32,
}

/// Everything `jesdctl bringup` reports.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub links: Vec<LinkReport>,
    pub cores: Vec<CoreReport>,
    pub sysref: Vec<SysrefReport>,
    pub stages: Vec<StageReport>,
    pub status_polls: u32,
    pub sysref_strobes: u32,
    pub failures: u32,
    pub error: Option<String>,
}

impl Report {
    /// Gather the state of the selected links, along with the orchestrator's
    /// counters, after a run that ended with `error`.
    pub fn collect(
        board: &mut Board,
        select: &LinkSelect,
        error: Option<String>,
    ) -> anyhow::Result<Self> {
        let targets: Vec<JesdLink> = board
            .topology
            .links()
            .filter(|l| select.contains(l.id))
            .cloned()
            .collect();
        let mut links = Vec::new();
        for link in targets {
            for (device, status) in board.topology.link_status(link.id)? {
                links.push(LinkReport {
                    link: link.id,
                    direction: link.direction,
                    lane_rate_hz: link.lane_rate_hz(),
                    device,
                    status,
                });
            }
        }

        let cores = board
            .cores
            .iter()
            .map(|(device, core)| CoreReport {
                device: device.clone(),
                enabled: core.is_enabled(),
                status_reads: core.status_reads(),
                sysref_pulses: core.sysref_pulses(),
            })
            .collect();

        let sysref = board
            .clock_chips
            .iter()
            .map(|(device, monitor)| SysrefReport {
                device: device.clone(),
                plan: monitor.plan(),
                pulses: monitor.pulses(),
            })
            .collect();

        let stats = board.topology.stats();
        let stages = Stage::iter()
            .map(|stage| StageReport {
                stage: stage.into(),
                callbacks: stats.callbacks(stage),
                defers: stats.defers(stage),
            })
            .collect();

        Ok(Report {
            links,
            cores,
            sysref,
            stages,
            status_polls: stats.status_polls,
            sysref_strobes: stats.sysref_strobes,
            failures: stats.failures,
            error,
        })
    }

    pub fn write(&self, w: impl Write) -> anyhow::Result<()> {
        let mut tw = TabWriter::new(w);
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            "Link".underline(),
            "Device".underline(),
            "Lane Rate".underline(),
            "State".underline(),
            "SYNC~".underline(),
            "SYSREF".underline(),
            "PLL".underline(),
        )?;
        for r in &self.links {
            let state = if r.status.is_running() {
                r.status.state.to_string().green()
            } else {
                r.status.state.to_string().red()
            };
            writeln!(
                tw,
                "{} ({})\t{}\t{}\t{}\t{}\t{}\t{}",
                r.link,
                r.direction,
                r.device,
                gbps(r.lane_rate_hz),
                state,
                r.status.sync,
                if r.status.sysref_captured {
                    "captured"
                } else {
                    "-"
                },
                if r.status.pll_locked { "locked" } else { "unlocked" },
            )?;
        }

        writeln!(tw)?;
        writeln!(
            tw,
            "{}\t{}\t{}\t{}",
            "Core".underline(),
            "Enabled".underline(),
            "Status Reads".underline(),
            "SYSREF Pulses".underline(),
        )?;
        for c in &self.cores {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                c.device, c.enabled, c.status_reads, c.sysref_pulses
            )?;
        }

        if !self.sysref.is_empty() {
            writeln!(tw)?;
            writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                "Provider".underline(),
                "SYSREF".underline(),
                "Timer".underline(),
                "Pulses".underline(),
            )?;
            for s in &self.sysref {
                writeln!(
                    tw,
                    "{}\t{}\t{}\t{}",
                    s.device,
                    mhz(s.plan.sysref_hz),
                    s.plan.timer_div,
                    s.pulses
                )?;
            }
        }

        writeln!(tw)?;
        writeln!(
            tw,
            "{}\t{}\t{}",
            "Stage".underline(),
            "Callbacks".underline(),
            "Defers".underline(),
        )?;
        for s in self.stages.iter().filter(|s| s.callbacks > 0) {
            writeln!(tw, "{}\t{}\t{}", s.stage, s.callbacks, s.defers)?;
        }
        writeln!(tw)?;
        writeln!(
            tw,
            "status polls: {}, SYSREF strobes: {}, failures: {}",
            self.status_polls, self.sysref_strobes, self.failures
        )?;
        if let Some(e) = &self.error {
            writeln!(tw, "{} {e}", "error:".red())?;
        }
        tw.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::parse;
    use crate::board::tests::logger;
    use crate::board::tests::DAQ2;
    use sim::SimDelay;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        colored::control::set_override(false);
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_ilas_table() {
        let board = parse(DAQ2).unwrap();
        let links = board.initialized_links(&logger()).unwrap();
        let out = render(|w| ilas(w, &links, Some(1)));
        assert!(out.starts_with("link 1 (rx)"));
        assert!(!out.contains("link 0"));
        // A header plus one row per lane.
        assert_eq!(out.lines().count(), 6);

        let fchk = IlasFields::from_config(&links[1].config, 3).fchk;
        let last = out.lines().last().unwrap();
        assert!(last.ends_with(&format!("{fchk:#04x}")), "{last}");
    }

    #[test]
    fn test_ilas_uses_converter_ids() {
        let board = parse(DAQ2).unwrap();
        let links = board.initialized_links(&logger()).unwrap();
        let out = render(|w| ilas(w, &links, Some(0)));

        // The converter's DID of 1 lands in word0 bits 15:8.
        let lane0 = out.lines().nth(2).unwrap();
        let cells: Vec<&str> = lane0.split_whitespace().collect();
        assert_eq!(cells[2], "0x00000100", "{lane0}");

        let mut cfg = board.link(0).unwrap().config.clone();
        cfg.device_id = 1;
        let fchk = IlasFields::from_config(&cfg, 0).fchk;
        assert_eq!(cells[6], format!("{fchk:#04x}"));
        assert_ne!(
            fchk,
            IlasFields::from_config(&board.link(0).unwrap().config, 0).fchk
        );
    }

    #[test]
    fn test_rates_table() {
        let board = parse(DAQ2).unwrap();
        let out = render(|w| rates(w, &board));
        assert_eq!(out.lines().count(), 3);
        // 1 GSPS, two 16-bit converters over four lanes.
        assert!(out.contains("10.0000 Gbps"));
        assert!(out.contains("250.000 MHz"));
        assert!(out.contains("31.250 MHz"));
    }

    #[test]
    fn test_report() {
        let board = parse(DAQ2).unwrap();
        let mut board = board
            .build(&logger(), Box::new(SimDelay::new()))
            .unwrap();
        board.topology.start(&LinkSelect::All).unwrap();
        let report =
            Report::collect(&mut board, &LinkSelect::All, None).unwrap();

        assert_eq!(report.links.len(), 2);
        assert!(report.links.iter().all(|r| r.status.is_running()));
        assert_eq!(report.cores.len(), 2);
        assert!(report.cores.iter().all(|c| c.enabled && c.sysref_pulses == 1));
        assert_eq!(report.sysref.len(), 1);
        assert_eq!(report.sysref[0].pulses, 1);
        assert_eq!(report.sysref_strobes, 1);
        let running = report
            .stages
            .iter()
            .find(|s| s.stage == "LINK_RUNNING")
            .unwrap();
        assert!(running.callbacks > 0);

        let out = render(|w| report.write(w));
        assert!(out.contains("axi-tx"));
        assert!(out.contains("DATA"));
        assert!(!out.contains("error:"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["links"][0]["link"], 0);
        assert_eq!(json["error"], serde_json::Value::Null);
    }
}
