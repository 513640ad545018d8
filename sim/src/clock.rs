// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;
use std::sync::Mutex;

use dal::ClockControl;
use dal::DalError;
use dal::DalResult;
use dal::Delay;
use slog::debug;
use slog::o;
use slog::Logger;

use crate::chaos::unfurl;
use crate::chaos::ChaosConfig;

#[derive(Debug, Default)]
struct ClockState {
    rate: u64,
    enabled: bool,
}

/// A programmable clock output.  Rates are rounded down to a multiple of
/// `step_hz` and must not exceed `max_hz`.
pub struct SimClock {
    log: Logger,
    name: String,
    step_hz: u64,
    max_hz: u64,
    chaos: ChaosConfig,
    state: Mutex<ClockState>,
}

impl SimClock {
    pub fn new(log: &Logger, name: impl Into<String>) -> Self {
        let name = name.into();
        SimClock {
            log: log.new(o!("clock" => name.clone())),
            name,
            step_hz: 1,
            max_hz: u64::MAX,
            chaos: ChaosConfig::default(),
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn with_step(mut self, step_hz: u64) -> Self {
        self.step_hz = step_hz.max(1);
        self
    }

    pub fn with_max(mut self, max_hz: u64) -> Self {
        self.max_hz = max_hz;
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }
}

impl ClockControl for SimClock {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_rate(&self) -> DalResult<u64> {
        Ok(self.state.lock().unwrap().rate)
    }

    fn round_rate(&self, hz: u64) -> DalResult<u64> {
        Ok(hz.min(self.max_hz) / self.step_hz * self.step_hz)
    }

    fn set_rate(&self, hz: u64) -> DalResult<()> {
        unfurl!(self, set_rate);
        if hz > self.max_hz {
            return Err(DalError::ClockRate {
                clock: self.name.clone(),
                rate: hz,
            });
        }
        let rate = self.round_rate(hz)?;
        debug!(self.log, "set rate"; "requested" => hz, "rate" => rate);
        self.state.lock().unwrap().rate = rate;
        Ok(())
    }

    fn enable(&self) -> DalResult<()> {
        self.state.lock().unwrap().enabled = true;
        Ok(())
    }

    fn disable(&self) -> DalResult<()> {
        self.state.lock().unwrap().enabled = false;
        Ok(())
    }
}

/// A `Delay` that records each request instead of sleeping.  Clones share
/// the same record.
#[derive(Clone, Debug, Default)]
pub struct SimDelay {
    delays: Arc<Mutex<Vec<u32>>>,
}

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in microseconds.
    pub fn delays_us(&self) -> Vec<u32> {
        self.delays.lock().unwrap().clone()
    }

    pub fn total_us(&self) -> u64 {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .map(|us| u64::from(*us))
            .sum()
    }
}

impl Delay for SimDelay {
    fn delay_us(&self, us: u32) {
        self.delays.lock().unwrap().push(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Drain;

    fn logger() -> Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Logger::root(drain, slog::o!())
    }

    #[test]
    fn test_clock_rounding() {
        let clk = SimClock::new(&logger(), "lane").with_step(1000);
        assert_eq!(clk.round_rate(10_000_000_500).unwrap(), 10_000_000_000);
        assert!(dal::set_exact_rate(&clk, 10_000_000_500).is_err());
        dal::set_exact_rate(&clk, 10_000_000_000).unwrap();
        assert_eq!(clk.get_rate().unwrap(), 10_000_000_000);
    }

    #[test]
    fn test_clock_max() {
        let clk = SimClock::new(&logger(), "dev").with_max(500_000_000);
        assert!(matches!(
            clk.set_rate(600_000_000),
            Err(DalError::ClockRate { rate: 600_000_000, .. })
        ));
        clk.enable().unwrap();
        assert!(clk.is_enabled());
    }

    #[test]
    fn test_delay_records() {
        let delay = SimDelay::new();
        let shared = delay.clone();
        delay.delay_ms(4);
        delay.delay_us(10);
        assert_eq!(shared.delays_us(), vec![4000, 10]);
        assert_eq!(shared.total_us(), 4010);
    }
}
