// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use dal::Delay;
use slog::debug;
use slog::Logger;

use crate::fsm::FsmPolicy;
use crate::fsm::FsmStats;
use crate::fsm::JesdDevice;
use crate::fsm::Stage;
use crate::link::JesdLink;
use crate::link::LinkId;
use crate::TopologyError;

/// The most links a single topology may carry.
pub const MAX_LINKS: usize = 8;

/// A node in the bring-up graph: a device and the links it takes part in.
pub struct TopologyDevice {
    pub(super) device: Box<dyn JesdDevice>,
    link_ids: Vec<LinkId>,
    is_sysref_provider: bool,
    is_top_device: bool,
    depends_on: Vec<String>,
}

impl TopologyDevice {
    pub fn new(
        device: Box<dyn JesdDevice>,
        link_ids: impl IntoIterator<Item = LinkId>,
    ) -> Self {
        TopologyDevice {
            device,
            link_ids: link_ids.into_iter().collect(),
            is_sysref_provider: false,
            is_top_device: false,
            depends_on: Vec::new(),
        }
    }

    /// Mark this as the device whose links define the topology.
    pub fn top_device(mut self) -> Self {
        self.is_top_device = true;
        self
    }

    /// Mark this as the device that emits SYSREF.
    pub fn sysref_provider(mut self) -> Self {
        self.is_sysref_provider = true;
        self
    }

    /// Declare that `name` must be registered before this device.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn link_ids(&self) -> &[LinkId] {
        &self.link_ids
    }

    pub fn is_top_device(&self) -> bool {
        self.is_top_device
    }

    pub fn is_sysref_provider(&self) -> bool {
        self.is_sysref_provider
    }

    /// The device's links that are in `targets`, in the device's own order.
    pub(super) fn targets(&self, targets: &BTreeSet<LinkId>) -> Vec<LinkId> {
        self.link_ids
            .iter()
            .copied()
            .filter(|id| targets.contains(id))
            .collect()
    }
}

/// A validated set of devices and links, ready for bring-up.  Devices are
/// driven in registration order, which must put every clock source ahead of
/// its consumers.
pub struct Topology {
    pub(super) log: Logger,
    pub(super) devices: Vec<TopologyDevice>,
    pub(super) links: BTreeMap<LinkId, JesdLink>,
    pub(super) policy: FsmPolicy,
    pub(super) delay: Box<dyn Delay>,
    pub(super) stats: FsmStats,
    pub(super) cursor: Option<Stage>,
    /// (device index, link) pairs that completed `LINK_ENABLE`, and the run
    /// that enabled them.
    pub(super) enabled: BTreeMap<(usize, LinkId), u32>,
}

impl Topology {
    pub fn new(
        log: Logger,
        links: Vec<JesdLink>,
        devices: Vec<TopologyDevice>,
        delay: Box<dyn Delay>,
    ) -> Result<Self, TopologyError> {
        let links = validate(&links, &devices)?;
        debug!(log, "topology created";
            "devices" => devices.len(),
            "links" => links.len());
        Ok(Topology {
            log,
            devices,
            links,
            policy: FsmPolicy::default(),
            delay,
            stats: FsmStats::new(),
            cursor: None,
            enabled: BTreeMap::new(),
        })
    }

    pub fn with_policy(mut self, policy: FsmPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &FsmPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &FsmStats {
        &self.stats
    }

    /// The stage most recently entered, if any run has started.
    pub fn current_stage(&self) -> Option<Stage> {
        self.cursor
    }

    pub fn link(&self, id: LinkId) -> Option<&JesdLink> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &JesdLink> {
        self.links.values()
    }

    pub fn devices(&self) -> impl Iterator<Item = &TopologyDevice> {
        self.devices.iter()
    }

    pub fn top_device(&self) -> Option<&TopologyDevice> {
        self.devices.iter().find(|d| d.is_top_device)
    }

    pub fn sysref_provider(&self) -> Option<&TopologyDevice> {
        self.devices.iter().find(|d| d.is_sysref_provider)
    }

    /// Whether `link` has been enabled by `device` and not disabled since.
    pub fn is_enabled(&self, device: &str, link: LinkId) -> bool {
        self.devices
            .iter()
            .position(|d| d.name() == device)
            .is_some_and(|idx| self.enabled.contains_key(&(idx, link)))
    }
}

fn validate(
    links: &[JesdLink],
    devices: &[TopologyDevice],
) -> Result<BTreeMap<LinkId, JesdLink>, TopologyError> {
    if links.len() > MAX_LINKS {
        return Err(TopologyError::TooManyLinks {
            links: links.len(),
            max: MAX_LINKS,
        });
    }
    let mut map = BTreeMap::new();
    for link in links {
        if map.insert(link.id, link.clone()).is_some() {
            return Err(TopologyError::DuplicateLink(link.id));
        }
    }

    let mut seen = BTreeSet::new();
    for dev in devices {
        if !seen.insert(dev.name()) {
            return Err(TopologyError::DuplicateDevice(dev.name().to_string()));
        }
        if let Some(link) = dev.link_ids.iter().find(|id| !map.contains_key(*id))
        {
            return Err(TopologyError::UnknownLink {
                device: dev.name().to_string(),
                link: *link,
            });
        }
    }

    let tops: Vec<String> = devices
        .iter()
        .filter(|d| d.is_top_device)
        .map(|d| d.name().to_string())
        .collect();
    match tops.len() {
        0 => return Err(TopologyError::NoTopDevice),
        1 => {}
        _ => return Err(TopologyError::MultipleTopDevices(tops)),
    }

    let providers: Vec<String> = devices
        .iter()
        .filter(|d| d.is_sysref_provider)
        .map(|d| d.name().to_string())
        .collect();
    if providers.len() > 1 {
        return Err(TopologyError::MultipleSysrefProviders(providers));
    }

    for (idx, dev) in devices.iter().enumerate() {
        for dep in &dev.depends_on {
            match devices.iter().position(|d| d.name() == dep) {
                None => {
                    return Err(TopologyError::UnknownDependency {
                        device: dev.name().to_string(),
                        dependency: dep.clone(),
                    })
                }
                Some(pos) if pos >= idx => {
                    return Err(TopologyError::DependencyOrder {
                        device: dev.name().to_string(),
                        dependency: dep.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    Ok(map)
}
