// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use crate::fsm::Reason;
use crate::fsm::Stage;
use crate::fsm::StateChange;
use crate::link::JesdLink;
use crate::status::LinkStatus;
use crate::DeviceError;

/// The result of one stage callback.
pub type StageResult = Result<StateChange, DeviceError>;

/// A device participating in link bring-up.
///
/// Each stage has a callback with a default that does nothing and reports
/// `Done`, so a device only implements the stages it cares about.  Per-link
/// callbacks are invoked once for each target link the device participates
/// in; the clock sync callbacks are invoked once per device with all of its
/// target links.
pub trait JesdDevice {
    fn name(&self) -> &str;

    /// Called on the top device before `LINK_SUPPORTED`, allowing it to fill
    /// in link parameters it owns.  The link is frozen afterwards.
    fn link_init(&mut self, _link: &mut JesdLink) -> Result<(), DeviceError> {
        Ok(())
    }

    fn link_supported(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    fn link_pre_setup(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    fn link_setup(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    fn clks_enable(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    /// Request SYSREF or a continuous-mode reseed and arm the receivers.
    fn clk_sync_stage1(
        &mut self,
        _reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    /// Runs just before the SYSREF strobe.
    fn clk_sync_stage2(
        &mut self,
        _reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    /// Validate phase alignment and disarm.
    fn clk_sync_stage3(
        &mut self,
        _reason: Reason,
        _links: &[&JesdLink],
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    fn link_enable(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    fn link_running(
        &mut self,
        _reason: Reason,
        _link: &JesdLink,
    ) -> StageResult {
        Ok(StateChange::Done)
    }

    /// Called once every target link reports `DATA`.
    fn post_running(&mut self, _link: &JesdLink) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Report the link's status, for devices that can observe it.  During
    /// `LINK_RUNNING` the orchestrator polls this until the link reaches
    /// `DATA`.
    fn link_status(
        &mut self,
        _link: &JesdLink,
    ) -> Result<Option<LinkStatus>, DeviceError> {
        Ok(None)
    }

    /// Emit a SYSREF strobe.  Only called on the topology's SYSREF provider.
    fn sysref(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("sysref"))
    }
}

/// Invoke the per-link callback for `stage`.
pub(crate) fn dispatch_link(
    dev: &mut dyn JesdDevice,
    stage: Stage,
    reason: Reason,
    link: &JesdLink,
) -> StageResult {
    match stage {
        Stage::LinkSupported => dev.link_supported(reason, link),
        Stage::LinkPreSetup => dev.link_pre_setup(reason, link),
        Stage::LinkSetup => dev.link_setup(reason, link),
        Stage::ClocksEnable => dev.clks_enable(reason, link),
        Stage::ClkSyncStage1 => dev.clk_sync_stage1(reason, &[link]),
        Stage::ClkSyncStage2 => dev.clk_sync_stage2(reason, &[link]),
        Stage::ClkSyncStage3 => dev.clk_sync_stage3(reason, &[link]),
        Stage::LinkEnable => dev.link_enable(reason, link),
        Stage::LinkRunning => dev.link_running(reason, link),
    }
}

/// Invoke the per-device callback for `stage`.
pub(crate) fn dispatch_device(
    dev: &mut dyn JesdDevice,
    stage: Stage,
    reason: Reason,
    links: &[&JesdLink],
) -> StageResult {
    match stage {
        Stage::ClkSyncStage1 => dev.clk_sync_stage1(reason, links),
        Stage::ClkSyncStage2 => dev.clk_sync_stage2(reason, links),
        Stage::ClkSyncStage3 => dev.clk_sync_stage3(reason, links),
        Stage::LinkSupported
        | Stage::LinkPreSetup
        | Stage::LinkSetup
        | Stage::ClocksEnable
        | Stage::LinkEnable
        | Stage::LinkRunning => {
            unreachable!("{stage} is dispatched once per link")
        }
    }
}
