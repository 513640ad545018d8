// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The device abstraction layer.  These are the operations the JESD204 core
//! needs from the platform: memory-mapped register access, blocking delays,
//! and control over the clocks feeding a link.  Transport details (AXI, SPI,
//! I2C) live behind the traits and are of no concern to the core.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A specialized Result type for device operations
pub type DalResult<T> = Result<T, DalError>;

/// Error type conveying additional information about device errors
#[derive(Error, Debug)]
pub enum DalError {
    /// The transport failed while talking to the device.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// An argument passed to the device layer is invalid or inappropriate.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// A clock could not be programmed to the requested rate.
    #[error("Clock {clock} cannot be set to {rate} Hz")]
    ClockRate { clock: String, rate: u64 },
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic device error: {}", .0)]
    Synthetic(String),
    #[error("Device error: {}", .0)]
    Other(String),
}

/// Blocking access to a bank of 32-bit memory-mapped registers.  Addresses
/// are byte offsets from the base of the peripheral.
pub trait RegisterAccess {
    /// Read the register at `addr`.
    fn reg_read(&self, addr: u32) -> DalResult<u32>;

    /// Write `value` to the register at `addr`.
    fn reg_write(&self, addr: u32, value: u32) -> DalResult<()>;

    /// Read-modify-write the bits selected by `mask`.
    fn reg_update(&self, addr: u32, mask: u32, value: u32) -> DalResult<()> {
        let old = self.reg_read(addr)?;
        self.reg_write(addr, (old & !mask) | (value & mask))
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Arc<T> {
    fn reg_read(&self, addr: u32) -> DalResult<u32> {
        (**self).reg_read(addr)
    }

    fn reg_write(&self, addr: u32, value: u32) -> DalResult<()> {
        (**self).reg_write(addr, value)
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn reg_read(&self, addr: u32) -> DalResult<u32> {
        (**self).reg_read(addr)
    }

    fn reg_write(&self, addr: u32, value: u32) -> DalResult<()> {
        (**self).reg_write(addr, value)
    }
}

/// Blocking sleeps on the calling thread.
pub trait Delay {
    fn delay_us(&self, us: u32);

    fn delay_ms(&self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

impl<T: Delay + ?Sized> Delay for Arc<T> {
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// A `Delay` backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_us(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Control over a single clock output, such as the lane clock feeding a
/// transceiver or the device clock feeding a link layer core.
pub trait ClockControl {
    /// A name for the clock, used in diagnostics.
    fn name(&self) -> &str;

    /// Returns the rate the clock is currently running at, in Hz.
    fn get_rate(&self) -> DalResult<u64>;

    /// Returns the closest rate to `hz` the clock is able to produce.
    fn round_rate(&self, hz: u64) -> DalResult<u64> {
        Ok(hz)
    }

    /// Program the clock to run at `hz`.
    fn set_rate(&self, hz: u64) -> DalResult<()>;

    fn enable(&self) -> DalResult<()>;

    fn disable(&self) -> DalResult<()>;
}

impl<T: ClockControl + ?Sized> ClockControl for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_rate(&self) -> DalResult<u64> {
        (**self).get_rate()
    }

    fn round_rate(&self, hz: u64) -> DalResult<u64> {
        (**self).round_rate(hz)
    }

    fn set_rate(&self, hz: u64) -> DalResult<()> {
        (**self).set_rate(hz)
    }

    fn enable(&self) -> DalResult<()> {
        (**self).enable()
    }

    fn disable(&self) -> DalResult<()> {
        (**self).disable()
    }
}

/// Program `clock` to exactly `hz`, failing if the clock can only
/// approximate the rate.
pub fn set_exact_rate<C: ClockControl + ?Sized>(
    clock: &C,
    hz: u64,
) -> DalResult<()> {
    let rounded = clock.round_rate(hz)?;
    if rounded != hz {
        return Err(DalError::ClockRate {
            clock: clock.name().to_string(),
            rate: hz,
        });
    }
    clock.set_rate(hz)
}
