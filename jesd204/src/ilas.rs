// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Initial Lane Alignment Sequence payloads.
//!
//! Each lane carries four 32-bit configuration words during ILAS.  The layout
//! follows JESD204B section 8.3, with every count field sent zero-based:
//!
//! ```text
//! word0: DID [15:8], BID [27:24]
//! word1: LID [4:0], L-1 [12:8], SCR [15], F-1 [23:16], K-1 [31:24]
//! word2: M-1 [7:0], N-1 [12:8], CS [15:14], N'-1 [20:16], SUBCLASSV [23:21],
//!        S-1 [28:24], JESDV [31:29]
//! word3: HD [7], FCHK [31:24]
//! ```

use crate::link::LinkConfig;

/// The configuration fields carried in one lane's ILAS, as they appear on the
/// wire.  `l`, `f`, `k`, `m`, `n`, `np` and `s` hold the zero-based
/// encodings, so a four-lane link has `l == 3`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IlasFields {
    pub did: u8,
    pub bid: u8,
    pub lid: u8,
    pub l: u8,
    pub scr: bool,
    pub f: u8,
    pub k: u8,
    pub m: u8,
    pub n: u8,
    pub cs: u8,
    pub np: u8,
    pub subclassv: u8,
    pub s: u8,
    pub jesdv: u8,
    pub hd: bool,
    /// The checksum field.  Not included in the checksum itself.
    pub fchk: u8,
}

fn minus_one(v: u32, mask: u32) -> u8 {
    (v.saturating_sub(1) & mask) as u8
}

impl IlasFields {
    /// Build the fields sent on the lane carrying `lane_id`.
    pub fn from_config(cfg: &LinkConfig, lane_id: u8) -> Self {
        let mut fields = IlasFields {
            did: cfg.device_id,
            bid: cfg.bank_id & 0xf,
            lid: lane_id & 0x1f,
            l: minus_one(cfg.lane_count.into(), 0x1f),
            scr: cfg.scrambling_enabled,
            f: minus_one(cfg.octets_per_frame.into(), 0xff),
            k: minus_one(cfg.frames_per_multiframe.into(), 0xff),
            m: minus_one(cfg.converters_per_device.into(), 0xff),
            n: minus_one(cfg.converter_resolution.into(), 0x1f),
            cs: cfg.control_bits_per_sample & 0x3,
            np: minus_one(cfg.bits_per_sample.into(), 0x1f),
            subclassv: cfg.subclass & 0x7,
            s: cfg
                .samples_per_frame
                .map(|s| minus_one(s.into(), 0x1f))
                .unwrap_or(0),
            jesdv: cfg.jesd_version & 0x7,
            hd: cfg.high_density,
            fchk: 0,
        };
        fields.fchk = fields.checksum();
        fields
    }

    /// The additive checksum over every field but FCHK, modulo 256.
    pub fn checksum(&self) -> u8 {
        [
            self.did,
            self.bid,
            self.lid,
            self.l,
            u8::from(self.scr),
            self.f,
            self.k,
            self.m,
            self.cs,
            self.n,
            self.np,
            self.subclassv,
            self.s,
            self.jesdv,
            u8::from(self.hd),
        ]
        .iter()
        .fold(0u8, |sum, field| sum.wrapping_add(*field))
    }

    pub fn encode(&self) -> [u32; 4] {
        let word0 = u32::from(self.did) << 8 | u32::from(self.bid) << 24;
        let word1 = u32::from(self.lid)
            | u32::from(self.l) << 8
            | u32::from(self.scr) << 15
            | u32::from(self.f) << 16
            | u32::from(self.k) << 24;
        let word2 = u32::from(self.m)
            | u32::from(self.n) << 8
            | u32::from(self.cs) << 14
            | u32::from(self.np) << 16
            | u32::from(self.subclassv) << 21
            | u32::from(self.s) << 24
            | u32::from(self.jesdv) << 29;
        let word3 = u32::from(self.hd) << 7 | u32::from(self.fchk) << 24;
        [word0, word1, word2, word3]
    }

    /// Recover the fields from the four ILAS words.  Decoding is total: bits
    /// outside the documented fields are ignored.
    pub fn decode(words: &[u32; 4]) -> Self {
        let [w0, w1, w2, w3] = *words;
        IlasFields {
            did: (w0 >> 8) as u8,
            bid: ((w0 >> 24) & 0xf) as u8,
            lid: (w1 & 0x1f) as u8,
            l: ((w1 >> 8) & 0x1f) as u8,
            scr: (w1 >> 15) & 1 == 1,
            f: (w1 >> 16) as u8,
            k: (w1 >> 24) as u8,
            m: w2 as u8,
            n: ((w2 >> 8) & 0x1f) as u8,
            cs: ((w2 >> 14) & 0x3) as u8,
            np: ((w2 >> 16) & 0x1f) as u8,
            subclassv: ((w2 >> 21) & 0x7) as u8,
            s: ((w2 >> 24) & 0x1f) as u8,
            jesdv: ((w2 >> 29) & 0x7) as u8,
            hd: (w3 >> 7) & 1 == 1,
            fchk: (w3 >> 24) as u8,
        }
    }

    /// Name every field that differs between `self` and `other`.
    pub fn diff(&self, other: &IlasFields) -> Vec<&'static str> {
        let pairs: [(&'static str, u8, u8); 16] = [
            ("DID", self.did, other.did),
            ("BID", self.bid, other.bid),
            ("LID", self.lid, other.lid),
            ("L", self.l, other.l),
            ("SCR", self.scr.into(), other.scr.into()),
            ("F", self.f, other.f),
            ("K", self.k, other.k),
            ("M", self.m, other.m),
            ("N", self.n, other.n),
            ("CS", self.cs, other.cs),
            ("N'", self.np, other.np),
            ("SUBCLASSV", self.subclassv, other.subclassv),
            ("S", self.s, other.s),
            ("JESDV", self.jesdv, other.jesdv),
            ("HD", self.hd.into(), other.hd.into()),
            ("FCHK", self.fchk, other.fchk),
        ];
        pairs
            .iter()
            .filter(|(_, a, b)| a != b)
            .map(|(name, _, _)| *name)
            .collect()
    }
}

/// Compute the four ILAS words for the lane carrying `lane_id`.
pub fn compute_ilas(cfg: &LinkConfig, lane_id: u8) -> [u32; 4] {
    IlasFields::from_config(cfg, lane_id).encode()
}

/// Compute the ILAS checksum for the lane carrying `lane_id`.
pub fn ilas_checksum(cfg: &LinkConfig, lane_id: u8) -> u8 {
    IlasFields::from_config(cfg, lane_id).fchk
}
