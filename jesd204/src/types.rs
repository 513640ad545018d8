// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Error types used throughout the crate.

use dal::DalError;
use thiserror::Error;

use crate::fsm::Stage;
use crate::link::LinkId;
use crate::status::LinkStatus;

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ControllerResult<T> = Result<T, ControllerError>;
pub type FsmResult<T> = Result<T, FsmError>;

/// A link configuration that cannot be expressed on the wire or by the
/// controller.  These are always detected before any register is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "octets per multiframe ({octets_per_multiframe}) must be a multiple \
        of {alignment}"
    )]
    InvalidFrameAlignment {
        octets_per_multiframe: u32,
        alignment: u32,
    },
    #[error("link uses {lanes} lanes, controller only has {max}")]
    TooManyLanes { lanes: u32, max: u32 },
    #[error("{field} is {value}, must be in {min}..={max}")]
    FieldRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("lane id table has {found} entries, link has {expected} lanes")]
    LaneIdCount { expected: usize, found: usize },
    #[error("Invalid JESD204 mode: {}", .0)]
    InvalidMode(String),
}

/// Errors raised by the AXI link controllers.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The peripheral at this address is not the expected link controller.
    #[error(
        "Unexpected peripheral identifier {found:#010x} (expected {expected:#010x})"
    )]
    UnexpectedPeripheral { expected: u32, found: u32 },
    #[error("Unsupported peripheral version {major}.{minor}.{patch}")]
    UnsupportedVersion { major: u32, minor: u32, patch: u32 },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The received ILAS on an RX lane disagrees with the configured link.
    #[error("lane {lane} ILAS mismatch in {}", .fields.join(", "))]
    IlasMismatch {
        lane: u32,
        fields: Vec<&'static str>,
    },
    #[error("Device error: {0}")]
    Dal(#[from] DalError),
}

/// The error a device returns from a stage callback.  The orchestrator does
/// not distinguish between kinds: any of these aborts the current bring-up.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("{}", .0)]
    Failed(String),
    #[error("operation not supported: {}", .0)]
    Unsupported(&'static str),
    #[error("{0}")]
    Controller(#[from] ControllerError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Dal(#[from] DalError),
}

/// A set of devices and links that cannot form a valid bring-up topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology has no top device")]
    NoTopDevice,
    #[error("topology has more than one top device: {}", .0.join(", "))]
    MultipleTopDevices(Vec<String>),
    #[error("topology has more than one SYSREF provider: {}", .0.join(", "))]
    MultipleSysrefProviders(Vec<String>),
    #[error("device {0} is registered twice")]
    DuplicateDevice(String),
    #[error("link {0} is defined twice")]
    DuplicateLink(LinkId),
    #[error("device {device} refers to unknown link {link}")]
    UnknownLink { device: String, link: LinkId },
    #[error("device {device} depends on unknown device {dependency}")]
    UnknownDependency { device: String, dependency: String },
    #[error("device {device} is registered before its dependency {dependency}")]
    DependencyOrder { device: String, dependency: String },
    #[error("topology has {links} links, at most {max} are supported")]
    TooManyLinks { links: usize, max: usize },
}

/// Errors returned by the bring-up orchestrator.  Each carries enough context
/// to name the failing device, stage and link.
#[derive(Error, Debug)]
pub enum FsmError {
    #[error("Invalid topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("link {0} is not part of this topology")]
    UnknownLink(LinkId),
    #[error("link {link} has an invalid configuration: {source}")]
    InvalidLink { link: LinkId, source: ConfigError },
    #[error("device {device} failed to initialize link {link}: {source}")]
    LinkInit {
        device: String,
        link: LinkId,
        source: DeviceError,
    },
    #[error(
        "device {device} failed {stage}{}: {source}",
        .link.map(|l| format!(" on link {l}")).unwrap_or_default()
    )]
    Callback {
        device: String,
        stage: Stage,
        link: Option<LinkId>,
        source: DeviceError,
    },
    #[error(
        "device {device} still deferring {stage}{} after {attempts} attempts",
        .link.map(|l| format!(" on link {l}")).unwrap_or_default()
    )]
    DeferTimeout {
        device: String,
        stage: Stage,
        link: Option<LinkId>,
        attempts: u32,
    },
    #[error(
        "link {link} on device {device} not running after {attempts} polls: \
        {status}"
    )]
    LinkNotRunning {
        device: String,
        link: LinkId,
        status: LinkStatus,
        attempts: u32,
    },
    #[error("SYSREF provider {device} failed: {source}")]
    Sysref { device: String, source: DeviceError },
}
