// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use dal::RegisterAccess;

use crate::axi::regs;
use crate::axi::AxiJesd204;
use crate::axi::Core;
use crate::ilas::IlasFields;
use crate::link::Direction;
use crate::ControllerResult;

/// Marker for the transmit core.
pub enum Tx {}

impl Core for Tx {
    const MAGIC: u32 = regs::TX_MAGIC;
    const DIRECTION: Direction = Direction::Tx;
    const SENDS_ILAS: bool = true;
}

pub type AxiJesd204Tx<R> = AxiJesd204<Tx, R>;

impl<R: RegisterAccess> AxiJesd204<Tx, R> {
    /// Read back the ILAS programmed for `lane`.
    pub fn programmed_ilas(&self, lane: u32) -> ControllerResult<IlasFields> {
        let mut words = [0u32; 4];
        for (word, value) in (0u32..).zip(words.iter_mut()) {
            *value = self.regs().reg_read(regs::ilas(lane, word))?;
        }
        Ok(IlasFields::decode(&words))
    }
}
