// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! SYSREF frequency planning for clock distribution devices.
//!
//! SYSREF must be an integer sub-multiple of every link's LMFC/LEMC rate.  A
//! SYSREF provider folds the rate of each link it serves into a running GCD
//! during `LINK_SUPPORTED`, then picks the SYSREF frequency and pulse timer
//! during `LINK_PRE_SETUP`.

/// The SYSREF timer must not run faster than this.
pub const SYSREF_TIMER_MAX_HZ: u64 = 4_000_000;

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Fold `rate` into the SYSREF plan.
///
/// `dividend` is the running GCD, or the provider's VCO frequency for the
/// first link.  If the GCD of the two is at least `min`, it becomes the new
/// plan.  Otherwise `rate` is accepted only if it divides `dividend` more
/// evenly than its neighbours do, in which case the plan is the smaller of
/// `prev` and `rate`.  Returns `None` if no plan fits.
pub fn lmfc_lemc_validate(
    prev: Option<u64>,
    dividend: u64,
    rate: u64,
    min: u64,
) -> Option<u64> {
    if rate == 0 {
        return None;
    }
    let g = gcd(dividend, rate);
    if g >= min {
        return Some(g);
    }

    let rem = dividend % rate;
    let rem_l = if rate > 1 { dividend % (rate - 1) } else { 0 };
    let rem_u = dividend % (rate + 1);
    if rem_l > rem && rem_u > rem {
        return Some(prev.map_or(rate, |p| p.min(rate)));
    }
    None
}

/// Pick the SYSREF frequency given the planned GCD.  A desired frequency is
/// honored when it divides the GCD; otherwise the GCD is halved until it is
/// no faster than `max`, as long as halving keeps it an integer divisor.
pub fn sysref_frequency(gcd: u64, desired: Option<u64>, max: u64) -> u64 {
    if let Some(desired) = desired {
        if desired != 0 && gcd % desired == 0 {
            return desired;
        }
    }
    let mut freq = gcd;
    while freq > max && (freq >> 1) != 0 && freq % (freq >> 1) == 0 {
        freq >>= 1;
    }
    freq
}

/// The SYSREF pulse timer divider: a sub-multiple of the SYSREF frequency no
/// faster than 4 MHz, expressed as a divider of the provider's VCO.
pub fn sysref_timer(sysref_hz: u64, vco_hz: u64) -> Option<u64> {
    let mut timer = sysref_hz / 2;
    while timer >= SYSREF_TIMER_MAX_HZ {
        timer >>= 1;
    }
    if timer == 0 {
        return None;
    }
    Some(vco_hz / timer)
}
