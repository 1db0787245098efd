//! Classify raw Mode S frames by downlink format and parity.
//!
//! Only 112-bit DF17 squitters and DF20/21 Comm-B replies survive. A squitter
//! must have a zero parity remainder. A Comm-B reply's remainder is its
//! address, which is only trusted when a clean squitter from the same address
//! was seen recently.

use std::collections::HashMap;

use crate::crc;
use crate::types::{hex_decode, DownlinkFormat, Icao, LONG_FRAME_BYTES};

// ---------------------------------------------------------------------------
// ICAO cache
// ---------------------------------------------------------------------------

/// Time-windowed set of addresses confirmed by clean DF17 frames.
///
/// Line noise turns into random parity-recovered addresses. Checking those
/// against this cache keeps phantom aircraft out of the decoder.
pub struct IcaoCache {
    ttl: f64,
    seen: HashMap<Icao, f64>,
}

impl IcaoCache {
    pub fn new(ttl: f64) -> Self {
        IcaoCache {
            ttl,
            seen: HashMap::new(),
        }
    }

    pub fn register(&mut self, icao: Icao, timestamp: f64) {
        self.seen.insert(icao, timestamp);
    }

    /// True if the address was confirmed within the TTL. Expired entries are
    /// dropped on the way.
    pub fn is_known(&mut self, icao: &Icao, timestamp: f64) -> bool {
        match self.seen.get(icao) {
            Some(&last) if timestamp - last <= self.ttl => true,
            Some(_) => {
                self.seen.remove(icao);
                false
            }
            None => false,
        }
    }

    pub fn prune(&mut self, now: f64) {
        let ttl = self.ttl;
        self.seen.retain(|_, &mut last| now - last <= ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        IcaoCache::new(60.0)
    }
}

// ---------------------------------------------------------------------------
// ModeFrame
// ---------------------------------------------------------------------------

/// An accepted long Mode S frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeFrame {
    pub format: DownlinkFormat,
    pub icao: Icao,
    pub raw: [u8; LONG_FRAME_BYTES],
    /// Capture time, Unix seconds.
    pub timestamp: f64,
    pub signal_level: Option<f64>,
}

impl ModeFrame {
    /// True for DF17 frames, which feed position and velocity decoding.
    pub fn is_squitter(&self) -> bool {
        self.format == DownlinkFormat::ExtendedSquitter
    }

    /// The 56-bit ME field, right-aligned in a u64.
    pub fn me_bits(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[1..8].copy_from_slice(&self.raw[4..11]);
        u64::from_be_bytes(buf)
    }

    /// ADS-B type code (first 5 bits of ME). `None` for Comm-B replies.
    pub fn type_code(&self) -> Option<u8> {
        self.is_squitter().then(|| (self.raw[4] >> 3) & 0x1F)
    }

    /// The 13-bit AC/ID field of a Comm-B reply.
    pub fn field_13(&self) -> u32 {
        ((self.raw[2] as u32 & 0x1F) << 8) | self.raw[3] as u32
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify raw frame bytes.
///
/// Returns `None` for wrong-length frames, unsupported downlink formats,
/// parity failures, and Comm-B replies from unconfirmed addresses. Clean
/// squitters register their address in `cache`.
pub fn classify(
    bytes: &[u8],
    timestamp: f64,
    signal_level: Option<f64>,
    cache: &mut IcaoCache,
) -> Option<ModeFrame> {
    let frame = classify_parity(bytes, timestamp, signal_level)?;
    if frame.is_squitter() {
        cache.register(frame.icao, timestamp);
    } else if !cache.is_known(&frame.icao, timestamp) {
        return None;
    }
    Some(frame)
}

/// Classify a hex-encoded frame. See [`classify`].
pub fn classify_hex(
    hex: &str,
    timestamp: f64,
    signal_level: Option<f64>,
    cache: &mut IcaoCache,
) -> Option<ModeFrame> {
    classify(&hex_decode(hex)?, timestamp, signal_level, cache)
}

/// Parity and format checks only, with no address confirmation.
pub fn classify_parity(
    bytes: &[u8],
    timestamp: f64,
    signal_level: Option<f64>,
) -> Option<ModeFrame> {
    let raw: [u8; LONG_FRAME_BYTES] = bytes.try_into().ok()?;
    let format = DownlinkFormat::from_df((raw[0] >> 3) & 0x1F)?;
    let remainder = crc::crc24(&raw);

    let icao: Icao = if format.is_comm_b() {
        crate::types::icao_from_u32(remainder)
    } else if remainder == 0 {
        [raw[1], raw[2], raw[3]]
    } else {
        return None;
    };

    Some(ModeFrame {
        format,
        icao,
        raw,
        timestamp,
        signal_level,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
