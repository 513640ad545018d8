// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The bring-up orchestrator.
//!
//! A [`Topology`] is walked through the [`Stage`]s breadth first: every
//! device finishes a stage for every target link before any device starts the
//! next stage.  Devices are visited in registration order.  A device may defer
//! a stage, in which case it is called again once the rest of the devices
//! have had their turn.  The first error aborts the run.

use std::collections::BTreeSet;

use dal::Delay;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use strum::IntoEnumIterator;

use crate::link::JesdLink;
use crate::link::LinkId;
use crate::link::LinkSelect;
use crate::link::SysrefMode;
use crate::status::LinkStatus;
use crate::FsmError;
use crate::FsmResult;

mod device;
mod policy;
mod stage;
mod stats;
mod topology;

pub use device::JesdDevice;
pub use device::StageResult;
pub use policy::FsmPolicy;
pub use policy::RetryPolicy;
pub use stage::Reason;
pub use stage::Stage;
pub use stage::StateChange;
pub use stats::FsmStats;
pub use topology::Topology;
pub use topology::TopologyDevice;
pub use topology::MAX_LINKS;

/// One callback's worth of work within a stage.
#[derive(Clone, Debug)]
enum Unit {
    Link { dev: usize, link: LinkId },
    Device { dev: usize, links: Vec<LinkId> },
}

impl Unit {
    fn dev(&self) -> usize {
        match self {
            Unit::Link { dev, .. } | Unit::Device { dev, .. } => *dev,
        }
    }

    fn link(&self) -> Option<LinkId> {
        match self {
            Unit::Link { link, .. } => Some(*link),
            Unit::Device { .. } => None,
        }
    }
}

impl Topology {
    /// Bring up the selected links.  On success every target link has
    /// reported `DATA` and the devices' `post_running` hooks have run.
    pub fn start(&mut self, select: &LinkSelect) -> FsmResult<()> {
        let targets = self.resolve(select)?;
        self.stats.runs += 1;
        info!(self.log, "starting link bring-up"; "links" => ?targets);

        let result = self
            .init_links(&targets)
            .and_then(|_| self.run_stages(&targets));
        match &result {
            Ok(()) => info!(self.log, "links running"; "links" => ?targets),
            Err(e) => {
                self.stats.failures += 1;
                error!(self.log, "link bring-up failed";
                    "stage" => ?self.cursor.map(|s| s.to_string()),
                    "error" => %e);
                if self.policy.disable_on_failure {
                    self.rollback(&targets);
                }
            }
        }
        result
    }

    /// Disable the selected links by running `LINK_ENABLE` with
    /// [`Reason::Uninit`] on every participating device, in reverse
    /// registration order.  Every device is visited even if one fails; the
    /// first error is returned.
    pub fn stop(&mut self, select: &LinkSelect) -> FsmResult<()> {
        let targets = self.resolve(select)?;
        info!(self.log, "stopping links"; "links" => ?targets);
        let mut units = self.units(Stage::LinkEnable, &targets);
        units.reverse();
        self.run_units(Stage::LinkEnable, Reason::Uninit, units, false)
    }

    /// Ask every device on `link` that can observe its state for a status.
    pub fn link_status(
        &mut self,
        link: LinkId,
    ) -> FsmResult<Vec<(String, LinkStatus)>> {
        let Topology { devices, links, .. } = self;
        let jesd = links.get(&link).ok_or(FsmError::UnknownLink(link))?;
        let mut out = Vec::new();
        for entry in devices.iter_mut() {
            if !entry.link_ids().contains(&link) {
                continue;
            }
            let name = entry.name().to_string();
            let status = entry.device.link_status(jesd).map_err(|source| {
                FsmError::Callback {
                    device: name.clone(),
                    stage: Stage::LinkRunning,
                    link: Some(link),
                    source,
                }
            })?;
            if let Some(status) = status {
                out.push((name, status));
            }
        }
        Ok(out)
    }

    fn resolve(&self, select: &LinkSelect) -> FsmResult<BTreeSet<LinkId>> {
        match select {
            LinkSelect::All => Ok(self.links.keys().copied().collect()),
            LinkSelect::Only(ids) => {
                if let Some(id) = ids.iter().find(|id| !self.links.contains_key(*id))
                {
                    return Err(FsmError::UnknownLink(*id));
                }
                Ok(ids.clone())
            }
        }
    }

    // Give the top device a chance to fill in the link parameters it owns,
    // then check that every target link is usable.
    fn init_links(&mut self, targets: &BTreeSet<LinkId>) -> FsmResult<()> {
        let Topology {
            devices,
            links,
            log,
            ..
        } = self;
        if let Some(top) = devices.iter_mut().find(|d| d.is_top_device()) {
            let name = top.name().to_string();
            for id in top.targets(targets) {
                let Some(link) = links.get_mut(&id) else {
                    return Err(FsmError::UnknownLink(id));
                };
                debug!(log, "initializing link"; "device" => &name, "link" => id);
                top.device.link_init(link).map_err(|source| {
                    FsmError::LinkInit {
                        device: name.clone(),
                        link: id,
                        source,
                    }
                })?;
                link.id = id;
            }
        }

        for id in targets {
            if let Some(link) = links.get(id) {
                link.validate().map_err(|source| FsmError::InvalidLink {
                    link: *id,
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn run_stages(&mut self, targets: &BTreeSet<LinkId>) -> FsmResult<()> {
        for stage in Stage::iter() {
            self.cursor = Some(stage);
            debug!(self.log, "entering stage"; "stage" => %stage);
            let units = self.units(stage, targets);
            self.run_units(stage, Reason::Init, units, true)?;
            match stage {
                Stage::ClkSyncStage2 => self.strobe_sysref(targets)?,
                Stage::LinkRunning => self.wait_running(targets)?,
                _ => {}
            }
        }
        self.post_running(targets)
    }

    fn units(&self, stage: Stage, targets: &BTreeSet<LinkId>) -> Vec<Unit> {
        let mut units = Vec::new();
        for (dev, entry) in self.devices.iter().enumerate() {
            let links = entry.targets(targets);
            if links.is_empty() {
                continue;
            }
            if stage.is_per_device() {
                units.push(Unit::Device { dev, links });
            } else {
                units.extend(links.into_iter().map(|link| Unit::Link { dev, link }));
            }
        }
        units
    }

    // Run each unit's callback.  Units that defer are retried in later
    // rounds, up to the defer policy's limit.  With `fail_fast` the first
    // error is returned immediately; otherwise every unit is attempted and
    // the first error is returned at the end.
    fn run_units(
        &mut self,
        stage: Stage,
        reason: Reason,
        units: Vec<Unit>,
        fail_fast: bool,
    ) -> FsmResult<()> {
        let limit = self.policy.defer.attempts.max(1);
        let mut first_err = None;
        let mut pending = units;
        let mut round = 1;

        loop {
            let mut deferred = Vec::new();
            for unit in pending {
                match self.invoke(stage, reason, &unit) {
                    Ok(StateChange::Done) => self.record_done(stage, reason, &unit),
                    Ok(StateChange::Defer) => {
                        self.stats.bump_defer(stage);
                        deferred.push(unit);
                    }
                    Err(e) if fail_fast => return Err(e),
                    Err(e) => {
                        error!(self.log, "callback failed"; "error" => %e);
                        first_err.get_or_insert(e);
                    }
                }
            }

            let Some(stuck) = deferred.first() else {
                break;
            };
            if round >= limit {
                let e = FsmError::DeferTimeout {
                    device: self.devices[stuck.dev()].name().to_string(),
                    stage,
                    link: stuck.link(),
                    attempts: round,
                };
                if fail_fast {
                    return Err(e);
                }
                error!(self.log, "giving up on deferred callback"; "error" => %e);
                first_err.get_or_insert(e);
                break;
            }
            debug!(self.log, "retrying deferred callbacks";
                "stage" => %stage,
                "count" => deferred.len(),
                "round" => round);
            round += 1;
            self.delay.delay_ms(self.policy.defer.interval_ms);
            pending = deferred;
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn invoke(
        &mut self,
        stage: Stage,
        reason: Reason,
        unit: &Unit,
    ) -> FsmResult<StateChange> {
        let Topology {
            devices,
            links,
            log,
            stats,
            ..
        } = self;
        let entry = &mut devices[unit.dev()];
        let name = entry.name().to_string();
        stats.bump_callback(stage);

        let result = match unit {
            Unit::Link { link, .. } => {
                let jesd = links.get(link).ok_or(FsmError::UnknownLink(*link))?;
                debug!(log, "stage callback";
                    "device" => &name,
                    "stage" => %stage,
                    "reason" => %reason,
                    "link" => link);
                device::dispatch_link(entry.device.as_mut(), stage, reason, jesd)
            }
            Unit::Device { links: ids, .. } => {
                let jesds: Vec<&JesdLink> =
                    ids.iter().filter_map(|id| links.get(id)).collect();
                debug!(log, "stage callback";
                    "device" => &name,
                    "stage" => %stage,
                    "reason" => %reason,
                    "links" => ?ids);
                device::dispatch_device(entry.device.as_mut(), stage, reason, &jesds)
            }
        };

        result.map_err(|source| FsmError::Callback {
            device: name,
            stage,
            link: unit.link(),
            source,
        })
    }

    // Track which (device, link) pairs are enabled, so a failed run can undo
    // exactly what it did.
    fn record_done(&mut self, stage: Stage, reason: Reason, unit: &Unit) {
        if stage != Stage::LinkEnable {
            return;
        }
        let Unit::Link { dev, link } = unit else {
            return;
        };
        match reason {
            Reason::Init => {
                self.enabled.insert((*dev, *link), self.stats.runs);
            }
            Reason::Uninit => {
                self.enabled.remove(&(*dev, *link));
            }
        }
    }

    fn strobe_sysref(&mut self, targets: &BTreeSet<LinkId>) -> FsmResult<()> {
        let needed = targets.iter().filter_map(|id| self.links.get(id)).any(|l| {
            l.uses_sysref() && l.sysref_mode == SysrefMode::OneShot
        });
        if !needed {
            return Ok(());
        }
        let Some(provider) =
            self.devices.iter_mut().find(|d| d.is_sysref_provider())
        else {
            warn!(self.log, "no SYSREF provider, skipping strobe");
            return Ok(());
        };

        let name = provider.name().to_string();
        debug!(self.log, "strobing SYSREF"; "device" => &name);
        provider
            .device
            .sysref()
            .map_err(|source| FsmError::Sysref { device: name, source })?;
        self.stats.sysref_strobes += 1;
        self.delay.delay_ms(self.policy.sysref_settle_ms);
        Ok(())
    }

    // Poll every device that can observe a target link until the link
    // reports DATA or the running policy is exhausted.
    fn wait_running(&mut self, targets: &BTreeSet<LinkId>) -> FsmResult<()> {
        let policy = self.policy.running;
        let limit = policy.attempts.max(1);
        let Topology {
            devices,
            links,
            log,
            stats,
            delay,
            ..
        } = self;

        for entry in devices.iter_mut() {
            let name = entry.name().to_string();
            for id in entry.targets(targets) {
                let link = links.get(&id).ok_or(FsmError::UnknownLink(id))?;
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let status =
                        entry.device.link_status(link).map_err(|source| {
                            FsmError::Callback {
                                device: name.clone(),
                                stage: Stage::LinkRunning,
                                link: Some(id),
                                source,
                            }
                        })?;
                    let Some(status) = status else {
                        break;
                    };
                    stats.status_polls += 1;
                    if status.is_running() {
                        debug!(log, "link running";
                            "device" => &name,
                            "link" => id,
                            "polls" => attempt);
                        break;
                    }
                    if attempt >= limit {
                        return Err(FsmError::LinkNotRunning {
                            device: name,
                            link: id,
                            status,
                            attempts: attempt,
                        });
                    }
                    delay.delay_ms(policy.interval_ms);
                }
            }
        }
        Ok(())
    }

    fn post_running(&mut self, targets: &BTreeSet<LinkId>) -> FsmResult<()> {
        let Topology { devices, links, .. } = self;
        for entry in devices.iter_mut() {
            let name = entry.name().to_string();
            for id in entry.targets(targets) {
                let link = links.get(&id).ok_or(FsmError::UnknownLink(id))?;
                entry.device.post_running(link).map_err(|source| {
                    FsmError::Callback {
                        device: name.clone(),
                        stage: Stage::LinkRunning,
                        link: Some(id),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    // Best-effort disable of the pairs this run enabled, newest first.  Pairs
    // left enabled by an earlier run stay as they are.
    fn rollback(&mut self, targets: &BTreeSet<LinkId>) {
        let run = self.stats.runs;
        let units: Vec<Unit> = self
            .enabled
            .iter()
            .rev()
            .filter(|&(&(_, link), &by)| by == run && targets.contains(&link))
            .map(|(&(dev, link), _)| Unit::Link { dev, link })
            .collect();
        if units.is_empty() {
            return;
        }
        warn!(self.log, "disabling links enabled before the failure";
            "count" => units.len());
        if let Err(e) =
            self.run_units(Stage::LinkEnable, Reason::Uninit, units, false)
        {
            error!(self.log, "failed to disable link"; "error" => %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::four_lane_config;
    use crate::link::Direction;
    use crate::status::LinkState;
    use crate::status::SyncStatus;
    use crate::DeviceError;
    use crate::TopologyError;
    use pretty_assertions::assert_eq;
    use slog::Drain;
    use slog::Logger;
    use std::collections::BTreeMap;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn logger() -> Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Logger::root(drain, slog::o!())
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Event {
        Init(String, LinkId),
        Stage(String, Stage, Reason, Vec<LinkId>),
        Sysref(String),
        PostRunning(String, LinkId),
    }

    type Events = Arc<Mutex<Vec<Event>>>;

    /// A device that records every callback and can be told to fail, defer,
    /// or report a sequence of link states.
    struct Recorder {
        name: String,
        events: Events,
        fail_at: Option<Stage>,
        fail_after: u32,
        defers: BTreeMap<Stage, u32>,
        states: Option<VecDeque<LinkState>>,
        device_id: Option<u8>,
    }

    impl Recorder {
        fn new(name: &str, events: &Events) -> Self {
            Recorder {
                name: name.to_string(),
                events: events.clone(),
                fail_at: None,
                fail_after: 0,
                defers: BTreeMap::new(),
                states: None,
                device_id: None,
            }
        }

        fn fail_at(mut self, stage: Stage) -> Self {
            self.fail_at = Some(stage);
            self
        }

        // Succeed `count` times at `stage`, then fail.
        fn fail_after(mut self, stage: Stage, count: u32) -> Self {
            self.fail_at = Some(stage);
            self.fail_after = count;
            self
        }

        fn defer(mut self, stage: Stage, count: u32) -> Self {
            self.defers.insert(stage, count);
            self
        }

        fn states(mut self, states: &[LinkState]) -> Self {
            self.states = Some(states.iter().copied().collect());
            self
        }

        fn device_id(mut self, id: u8) -> Self {
            self.device_id = Some(id);
            self
        }

        fn record(
            &mut self,
            stage: Stage,
            reason: Reason,
            links: &[&JesdLink],
        ) -> StageResult {
            self.events.lock().unwrap().push(Event::Stage(
                self.name.clone(),
                stage,
                reason,
                links.iter().map(|l| l.id).collect(),
            ));
            if self.fail_at == Some(stage) {
                if self.fail_after == 0 {
                    return Err(DeviceError::Failed(format!("{stage} broke")));
                }
                self.fail_after -= 1;
            }
            if let Some(count) = self.defers.get_mut(&stage) {
                if *count > 0 {
                    *count -= 1;
                    return Ok(StateChange::Defer);
                }
            }
            Ok(StateChange::Done)
        }
    }

    impl JesdDevice for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn link_init(&mut self, link: &mut JesdLink) -> Result<(), DeviceError> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Init(self.name.clone(), link.id));
            if let Some(id) = self.device_id {
                link.config.device_id = id;
            }
            Ok(())
        }

        fn link_supported(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::LinkSupported, r, &[l])
        }

        fn link_pre_setup(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::LinkPreSetup, r, &[l])
        }

        fn link_setup(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::LinkSetup, r, &[l])
        }

        fn clks_enable(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::ClocksEnable, r, &[l])
        }

        fn clk_sync_stage1(&mut self, r: Reason, l: &[&JesdLink]) -> StageResult {
            self.record(Stage::ClkSyncStage1, r, l)
        }

        fn clk_sync_stage2(&mut self, r: Reason, l: &[&JesdLink]) -> StageResult {
            self.record(Stage::ClkSyncStage2, r, l)
        }

        fn clk_sync_stage3(&mut self, r: Reason, l: &[&JesdLink]) -> StageResult {
            self.record(Stage::ClkSyncStage3, r, l)
        }

        fn link_enable(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::LinkEnable, r, &[l])
        }

        fn link_running(&mut self, r: Reason, l: &JesdLink) -> StageResult {
            self.record(Stage::LinkRunning, r, &[l])
        }

        fn post_running(&mut self, link: &JesdLink) -> Result<(), DeviceError> {
            self.events
                .lock()
                .unwrap()
                .push(Event::PostRunning(self.name.clone(), link.id));
            Ok(())
        }

        fn link_status(
            &mut self,
            _link: &JesdLink,
        ) -> Result<Option<LinkStatus>, DeviceError> {
            let Some(states) = self.states.as_mut() else {
                return Ok(None);
            };
            let state = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                *states.front().unwrap()
            };
            Ok(Some(LinkStatus {
                enabled: true,
                state,
                sync: SyncStatus::Deasserted,
                sysref_captured: true,
                sysref_error: false,
                pll_locked: true,
            }))
        }

        fn sysref(&mut self) -> Result<(), DeviceError> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Sysref(self.name.clone()));
            Ok(())
        }
    }

    /// Records requested delays without sleeping.
    #[derive(Clone, Default)]
    struct RecordingDelay(Arc<Mutex<Vec<u32>>>);

    impl Delay for RecordingDelay {
        fn delay_us(&self, us: u32) {
            self.0.lock().unwrap().push(us);
        }
    }

    impl RecordingDelay {
        fn total_us(&self) -> u64 {
            self.0.lock().unwrap().iter().map(|us| u64::from(*us)).sum()
        }

        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn link(id: LinkId) -> JesdLink {
        let mut link = JesdLink::new(id, Direction::Tx, four_lane_config());
        link.sample_rate_hz = 245_760_000;
        link
    }

    fn topology(
        links: Vec<JesdLink>,
        devices: Vec<TopologyDevice>,
    ) -> (Topology, RecordingDelay) {
        let delay = RecordingDelay::default();
        let topo =
            Topology::new(logger(), links, devices, Box::new(delay.clone()))
                .unwrap();
        (topo, delay)
    }

    fn stage_events(events: &Events) -> Vec<(String, Stage, Reason)> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Stage(name, stage, reason, _) => {
                    Some((name.clone(), *stage, *reason))
                }
                _ => None,
            })
            .collect()
    }

    // A clock chip, a link controller and a converter on one link.
    fn three_devices(
        clk: Recorder,
        axi: Recorder,
        conv: Recorder,
    ) -> Vec<TopologyDevice> {
        vec![
            TopologyDevice::new(Box::new(clk), [0]).sysref_provider(),
            TopologyDevice::new(Box::new(axi), [0]).depends_on("clk"),
            TopologyDevice::new(Box::new(conv), [0])
                .top_device()
                .depends_on("axi"),
        ]
    }

    #[test]
    fn test_stages_are_breadth_first() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[LinkState::Data]),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();

        let seen = stage_events(&events);
        assert_eq!(seen.len(), 3 * 9);
        // No callback for a stage precedes a callback for an earlier stage.
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
        // Within a stage, devices are visited in registration order.
        for chunk in seen.chunks(3) {
            let names: Vec<&str> = chunk.iter().map(|e| e.0.as_str()).collect();
            assert_eq!(names, ["clk", "axi", "conv"]);
        }
        assert_eq!(topo.current_stage(), Some(Stage::LinkRunning));
        assert_eq!(topo.stats().callbacks(Stage::LinkSetup), 3);
        assert_eq!(topo.stats().runs, 1);
        assert_eq!(topo.stats().failures, 0);
        assert!(topo.is_enabled("axi", 0));
    }

    #[test]
    fn test_per_device_stages_see_all_links() {
        let events = Events::default();
        let devices = vec![
            TopologyDevice::new(Box::new(Recorder::new("clk", &events)), [0, 1])
                .top_device(),
        ];
        let (mut topo, _) = topology(vec![link(0), link(1)], devices);
        topo.start(&LinkSelect::All).unwrap();

        let events = events.lock().unwrap();
        let sync: Vec<&Event> = events
            .iter()
            .filter(|e| {
                matches!(e, Event::Stage(_, Stage::ClkSyncStage1, _, _))
            })
            .collect();
        assert_eq!(sync.len(), 1);
        assert_eq!(
            sync[0],
            &Event::Stage(
                "clk".to_string(),
                Stage::ClkSyncStage1,
                Reason::Init,
                vec![0, 1]
            )
        );
        let setup = events
            .iter()
            .filter(|e| matches!(e, Event::Stage(_, Stage::LinkSetup, _, _)))
            .count();
        assert_eq!(setup, 2);
    }

    #[test]
    fn test_failure_stops_the_run() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).fail_at(Stage::LinkSetup),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);

        match topo.start(&LinkSelect::All) {
            Err(FsmError::Callback {
                device,
                stage,
                link,
                source: DeviceError::Failed(_),
            }) => {
                assert_eq!(device, "axi");
                assert_eq!(stage, Stage::LinkSetup);
                assert_eq!(link, Some(0));
            }
            x => panic!("unexpected result: {x:?}"),
        }

        let seen = stage_events(&events);
        assert!(seen.iter().all(|e| e.1 <= Stage::LinkSetup));
        // The converter never saw the failed stage.
        assert!(!seen.contains(&("conv".to_string(), Stage::LinkSetup, Reason::Init)));
        // Nothing was enabled, so nothing was disabled.
        assert!(seen.iter().all(|e| e.2 == Reason::Init));
        assert_eq!(topo.current_stage(), Some(Stage::LinkSetup));
        assert_eq!(topo.stats().failures, 1);
    }

    #[test]
    fn test_defer_is_retried() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events).defer(Stage::ClocksEnable, 2),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events),
        );
        let (mut topo, delay) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();

        let enable: Vec<String> = stage_events(&events)
            .into_iter()
            .filter(|e| e.1 == Stage::ClocksEnable)
            .map(|e| e.0)
            .collect();
        assert_eq!(enable, ["clk", "axi", "conv", "clk", "clk"]);
        assert_eq!(topo.stats().defers(Stage::ClocksEnable), 2);
        assert_eq!(topo.stats().callbacks(Stage::ClocksEnable), 5);
        // Two retry rounds at 1 ms, plus the SYSREF settle time.
        assert_eq!(delay.total_us(), 2_000 + 2_000);
    }

    #[test]
    fn test_defer_timeout() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).defer(Stage::LinkPreSetup, u32::MAX),
            Recorder::new("conv", &events),
        );
        let (topo, _) = topology(vec![link(0)], devices);
        let mut topo = topo.with_policy(FsmPolicy {
            defer: RetryPolicy::new(3, 1),
            ..Default::default()
        });

        match topo.start(&LinkSelect::All) {
            Err(FsmError::DeferTimeout {
                device,
                stage,
                link,
                attempts,
            }) => {
                assert_eq!(device, "axi");
                assert_eq!(stage, Stage::LinkPreSetup);
                assert_eq!(link, Some(0));
                assert_eq!(attempts, 3);
            }
            x => panic!("unexpected result: {x:?}"),
        }
        assert!(stage_events(&events).iter().all(|e| e.1 <= Stage::LinkPreSetup));
    }

    #[test]
    fn test_link_not_running() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[LinkState::Cgs]),
            Recorder::new("conv", &events),
        );
        let (mut topo, delay) = topology(vec![link(0)], devices);

        match topo.start(&LinkSelect::All) {
            Err(FsmError::LinkNotRunning {
                device,
                link,
                status,
                attempts,
            }) => {
                assert_eq!(device, "axi");
                assert_eq!(link, 0);
                assert_eq!(status.state, LinkState::Cgs);
                assert_eq!(attempts, 20);
            }
            x => panic!("unexpected result: {x:?}"),
        }
        assert_eq!(topo.stats().status_polls, 20);
        // The settle delay after SYSREF, then 19 waits between 20 polls.
        assert_eq!(delay.count(), 1 + 19);
        assert_eq!(delay.total_us(), 2_000 + 19 * 4_000);
        // No post-running hooks on failure.
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::PostRunning(..))));
    }

    #[test]
    fn test_link_running_after_polls() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[
                LinkState::Cgs,
                LinkState::Ilas,
                LinkState::Data,
            ]),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();
        assert_eq!(topo.stats().status_polls, 3);

        let events = events.lock().unwrap();
        let post: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::PostRunning(..)))
            .collect();
        assert_eq!(post.len(), 3);
        // Post-running hooks only run after the last stage.
        let last_stage = events
            .iter()
            .rposition(|e| matches!(e, Event::Stage(..)))
            .unwrap();
        let first_post = events
            .iter()
            .position(|e| matches!(e, Event::PostRunning(..)))
            .unwrap();
        assert!(first_post > last_stage);
    }

    #[test]
    fn test_rollback_disables_enabled_links() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[LinkState::Wait]),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        assert!(matches!(
            topo.start(&LinkSelect::All),
            Err(FsmError::LinkNotRunning { .. })
        ));

        let uninit: Vec<(String, Stage)> = stage_events(&events)
            .into_iter()
            .filter(|e| e.2 == Reason::Uninit)
            .map(|e| (e.0, e.1))
            .collect();
        assert_eq!(
            uninit,
            [
                ("conv".to_string(), Stage::LinkEnable),
                ("axi".to_string(), Stage::LinkEnable),
                ("clk".to_string(), Stage::LinkEnable),
            ]
        );
        assert!(!topo.is_enabled("axi", 0));
    }

    #[test]
    fn test_no_rollback_when_disabled() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[LinkState::Wait]),
            Recorder::new("conv", &events),
        );
        let (topo, _) = topology(vec![link(0)], devices);
        let mut topo = topo.with_policy(FsmPolicy {
            disable_on_failure: false,
            ..Default::default()
        });
        assert!(topo.start(&LinkSelect::All).is_err());
        assert!(stage_events(&events).iter().all(|e| e.2 == Reason::Init));
        assert!(topo.is_enabled("axi", 0));
    }

    #[test]
    fn test_rollback_on_enable_failure() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events).fail_at(Stage::LinkEnable),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        assert!(topo.start(&LinkSelect::All).is_err());

        // clk and axi enabled the link before conv failed.
        let uninit: Vec<String> = stage_events(&events)
            .into_iter()
            .filter(|e| e.2 == Reason::Uninit)
            .map(|e| e.0)
            .collect();
        assert_eq!(uninit, ["axi", "clk"]);
    }

    #[test]
    fn test_rollback_leaves_earlier_runs_alone() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events)
                .states(&[LinkState::Data])
                .fail_after(Stage::LinkSetup, 1),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();
        assert!(topo.is_enabled("axi", 0));
        events.lock().unwrap().clear();

        match topo.start(&LinkSelect::All) {
            Err(FsmError::Callback { device, stage, .. }) => {
                assert_eq!(device, "axi");
                assert_eq!(stage, Stage::LinkSetup);
            }
            x => panic!("unexpected result: {x:?}"),
        }
        // The second run never reached LINK_ENABLE, so it has nothing to
        // undo, and the first run's links stay up.
        assert!(stage_events(&events).iter().all(|e| e.2 == Reason::Init));
        assert!(topo.is_enabled("clk", 0));
        assert!(topo.is_enabled("axi", 0));
        assert!(topo.is_enabled("conv", 0));
        assert_eq!(topo.stats().runs, 2);
        assert_eq!(topo.stats().failures, 1);
    }

    #[test]
    fn test_rollback_after_rerun() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events).fail_after(Stage::LinkEnable, 1),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();
        events.lock().unwrap().clear();

        // A rerun that enables the link again owns it, and undoes it.
        assert!(topo.start(&LinkSelect::All).is_err());
        let uninit: Vec<String> = stage_events(&events)
            .into_iter()
            .filter(|e| e.2 == Reason::Uninit)
            .map(|e| e.0)
            .collect();
        assert_eq!(uninit, ["axi", "clk"]);
        assert!(!topo.is_enabled("axi", 0));
        assert!(!topo.is_enabled("clk", 0));
    }

    #[test]
    fn test_stop_runs_in_reverse() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.stop(&LinkSelect::All).unwrap();

        assert_eq!(
            stage_events(&events),
            [
                ("conv".to_string(), Stage::LinkEnable, Reason::Uninit),
                ("axi".to_string(), Stage::LinkEnable, Reason::Uninit),
                ("clk".to_string(), Stage::LinkEnable, Reason::Uninit),
            ]
        );
    }

    #[test]
    fn test_stop_is_best_effort() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events).fail_at(Stage::LinkEnable),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);

        match topo.stop(&LinkSelect::All) {
            Err(FsmError::Callback { device, .. }) => assert_eq!(device, "conv"),
            x => panic!("unexpected result: {x:?}"),
        }
        assert_eq!(stage_events(&events).len(), 3);
    }

    #[test]
    fn test_sysref_strobe() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();

        let events = events.lock().unwrap();
        let strobe = events
            .iter()
            .position(|e| e == &Event::Sysref("clk".to_string()))
            .unwrap();
        let before = &events[strobe - 1];
        let after = &events[strobe + 1];
        assert!(matches!(before, Event::Stage(n, Stage::ClkSyncStage2, ..) if n == "conv"));
        assert!(matches!(after, Event::Stage(n, Stage::ClkSyncStage3, ..) if n == "clk"));
        assert_eq!(topo.stats().sysref_strobes, 1);
    }

    #[test]
    fn test_no_strobe_without_oneshot_subclass1() {
        for (subclass, mode) in [
            (0, SysrefMode::OneShot),
            (1, SysrefMode::Continuous),
        ] {
            let events = Events::default();
            let devices = three_devices(
                Recorder::new("clk", &events),
                Recorder::new("axi", &events),
                Recorder::new("conv", &events),
            );
            let mut l = link(0);
            l.config.subclass = subclass;
            l.sysref_mode = mode;
            let (mut topo, _) = topology(vec![l], devices);
            topo.start(&LinkSelect::All).unwrap();
            assert!(!events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, Event::Sysref(_))));
            assert_eq!(topo.stats().sysref_strobes, 0);
        }
    }

    #[test]
    fn test_link_init_on_top_device() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events).device_id(5),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        topo.start(&LinkSelect::All).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0], Event::Init("conv".to_string(), 0));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::Init(..)))
                .count(),
            1
        );
        assert_eq!(topo.link(0).unwrap().config.device_id, 5);
    }

    #[test]
    fn test_invalid_link_rejected_before_stages() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events),
            Recorder::new("conv", &events),
        );
        let mut l = link(0);
        l.config.frames_per_multiframe = 64;
        let (mut topo, _) = topology(vec![l], devices);

        match topo.start(&LinkSelect::All) {
            Err(FsmError::InvalidLink { link, .. }) => assert_eq!(link, 0),
            x => panic!("unexpected result: {x:?}"),
        }
        assert!(stage_events(&events).is_empty());
    }

    #[test]
    fn test_target_selection() {
        let events = Events::default();
        let devices = vec![
            TopologyDevice::new(Box::new(Recorder::new("clk", &events)), [0, 1])
                .sysref_provider(),
            TopologyDevice::new(Box::new(Recorder::new("tx", &events)), [0]),
            TopologyDevice::new(Box::new(Recorder::new("rx", &events)), [1]),
            TopologyDevice::new(Box::new(Recorder::new("conv", &events)), [0, 1])
                .top_device(),
        ];
        let (mut topo, _) = topology(vec![link(0), link(1)], devices);
        topo.start(&LinkSelect::only([1])).unwrap();

        let events = events.lock().unwrap();
        for e in events.iter() {
            if let Event::Stage(name, _, _, links) = e {
                assert_ne!(name, "tx");
                assert_eq!(links, &[1]);
            }
        }

        drop(events);
        assert!(matches!(
            topo.start(&LinkSelect::only([7])),
            Err(FsmError::UnknownLink(7))
        ));
    }

    #[test]
    fn test_link_status_query() {
        let events = Events::default();
        let devices = three_devices(
            Recorder::new("clk", &events),
            Recorder::new("axi", &events).states(&[LinkState::Ilas]),
            Recorder::new("conv", &events),
        );
        let (mut topo, _) = topology(vec![link(0)], devices);
        let status = topo.link_status(0).unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].0, "axi");
        assert_eq!(status[0].1.state, LinkState::Ilas);
        assert!(matches!(topo.link_status(3), Err(FsmError::UnknownLink(3))));
    }

    fn new_topology(
        links: Vec<JesdLink>,
        devices: Vec<TopologyDevice>,
    ) -> Result<Topology, TopologyError> {
        Topology::new(logger(), links, devices, Box::new(RecordingDelay::default()))
    }

    fn dev(name: &str, links: &[LinkId]) -> TopologyDevice {
        let events = Events::default();
        TopologyDevice::new(
            Box::new(Recorder::new(name, &events)),
            links.to_vec(),
        )
    }

    #[test]
    fn test_topology_validation() {
        assert_eq!(
            new_topology(vec![link(0)], vec![dev("a", &[0])]).err(),
            Some(TopologyError::NoTopDevice)
        );
        assert_eq!(
            new_topology(
                vec![link(0)],
                vec![dev("a", &[0]).top_device(), dev("b", &[0]).top_device()]
            )
            .err(),
            Some(TopologyError::MultipleTopDevices(vec![
                "a".to_string(),
                "b".to_string()
            ]))
        );
        assert_eq!(
            new_topology(
                vec![link(0)],
                vec![
                    dev("a", &[0]).sysref_provider(),
                    dev("b", &[0]).sysref_provider().top_device()
                ]
            )
            .err(),
            Some(TopologyError::MultipleSysrefProviders(vec![
                "a".to_string(),
                "b".to_string()
            ]))
        );
        assert_eq!(
            new_topology(
                vec![link(0)],
                vec![dev("a", &[0]).top_device(), dev("a", &[0])]
            )
            .err(),
            Some(TopologyError::DuplicateDevice("a".to_string()))
        );
        assert_eq!(
            new_topology(vec![link(0), link(0)], vec![dev("a", &[0]).top_device()])
                .err(),
            Some(TopologyError::DuplicateLink(0))
        );
        assert_eq!(
            new_topology(vec![link(0)], vec![dev("a", &[0, 2]).top_device()])
                .err(),
            Some(TopologyError::UnknownLink {
                device: "a".to_string(),
                link: 2
            })
        );
        assert_eq!(
            new_topology((0..9).map(link).collect(), vec![]).err(),
            Some(TopologyError::TooManyLinks { links: 9, max: 8 })
        );
    }

    #[test]
    fn test_dependency_order() {
        assert_eq!(
            new_topology(
                vec![link(0)],
                vec![
                    dev("conv", &[0]).top_device().depends_on("clk"),
                    dev("clk", &[0])
                ]
            )
            .err(),
            Some(TopologyError::DependencyOrder {
                device: "conv".to_string(),
                dependency: "clk".to_string()
            })
        );
        assert_eq!(
            new_topology(
                vec![link(0)],
                vec![dev("conv", &[0]).top_device().depends_on("pll")]
            )
            .err(),
            Some(TopologyError::UnknownDependency {
                device: "conv".to_string(),
                dependency: "pll".to_string()
            })
        );
        assert!(new_topology(
            vec![link(0)],
            vec![dev("clk", &[0]), dev("conv", &[0]).top_device().depends_on("clk")]
        )
        .is_ok());
    }
}
