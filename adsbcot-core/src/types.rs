//! Shared types, error enum, and decoded Mode S message types for adsbcot-core.

use thiserror::Error;

/// All errors produced by adsbcot-core.
#[derive(Debug, Error)]
pub enum CotError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("known-craft registry error: {0}")]
    KnownCraft(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CotError>;

// ---------------------------------------------------------------------------
// Downlink formats carried by the gateway
// ---------------------------------------------------------------------------

/// Long (112-bit) Mode S frame length in bytes.
pub const LONG_FRAME_BYTES: usize = 14;

/// Downlink formats the gateway accepts. Everything else is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkFormat {
    /// DF17 extended squitter: position, velocity, identification.
    ExtendedSquitter,
    /// DF20 Comm-B altitude reply.
    CommBAltitude,
    /// DF21 Comm-B identity reply.
    CommBIdentity,
}

impl DownlinkFormat {
    pub fn from_df(df: u8) -> Option<Self> {
        match df {
            17 => Some(DownlinkFormat::ExtendedSquitter),
            20 => Some(DownlinkFormat::CommBAltitude),
            21 => Some(DownlinkFormat::CommBIdentity),
            _ => None,
        }
    }

    pub fn df(&self) -> u8 {
        match self {
            DownlinkFormat::ExtendedSquitter => 17,
            DownlinkFormat::CommBAltitude => 20,
            DownlinkFormat::CommBIdentity => 21,
        }
    }

    /// True for Comm-B replies, whose address is overlaid on the parity field.
    pub fn is_comm_b(&self) -> bool {
        !matches!(self, DownlinkFormat::ExtendedSquitter)
    }
}

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    hex_encode(icao)
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    Some(icao_from_u32(val))
}

/// Convert ICAO bytes to u32 for range checks.
pub fn icao_to_u32(icao: &Icao) -> u32 {
    ((icao[0] as u32) << 16) | ((icao[1] as u32) << 8) | (icao[2] as u32)
}

/// Build ICAO from a 24-bit integer.
pub fn icao_from_u32(val: u32) -> Icao {
    [
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ]
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim().as_bytes();
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2)
        .map(|pair| Some((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
        .collect()
}

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// ADS-B character set for identification messages (6 bits per character).
pub const CALLSIGN_CHARSET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// TC 1-4: identification and emitter category.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationMsg {
    pub icao: Icao,
    pub callsign: String,
    /// Emitter category code such as `A1` or `B2`. `None` when unreported.
    pub category: Option<String>,
    pub timestamp: f64,
}

/// TC 9-18 (barometric) or TC 20-22 (GNSS) airborne position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionMsg {
    pub icao: Icao,
    pub altitude_ft: Option<i32>,
    /// Altitude field carries GNSS height instead of pressure altitude.
    pub gnss_altitude: bool,
    pub cpr_lat: u32,
    pub cpr_lon: u32,
    pub cpr_odd: bool,
    pub timestamp: f64,
}

/// TC 19: airborne velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityMsg {
    pub icao: Icao,
    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    /// GNSS height minus barometric altitude, feet.
    pub gnss_baro_diff_ft: Option<i32>,
    pub timestamp: f64,
}

/// DF20: altitude reply.
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeMsg {
    pub icao: Icao,
    pub altitude_ft: Option<i32>,
    pub timestamp: f64,
}

/// DF21: identity reply (squawk code).
#[derive(Debug, Clone, PartialEq)]
pub struct SquawkMsg {
    pub icao: Icao,
    pub squawk: String,
    pub timestamp: f64,
}

/// Union type for all decoded messages.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMsg {
    Identification(IdentificationMsg),
    Position(PositionMsg),
    Velocity(VelocityMsg),
    Altitude(AltitudeMsg),
    Squawk(SquawkMsg),
}

impl DecodedMsg {
    pub fn icao(&self) -> &Icao {
        match self {
            DecodedMsg::Identification(m) => &m.icao,
            DecodedMsg::Position(m) => &m.icao,
            DecodedMsg::Velocity(m) => &m.icao,
            DecodedMsg::Altitude(m) => &m.icao,
            DecodedMsg::Squawk(m) => &m.icao,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            DecodedMsg::Identification(m) => m.timestamp,
            DecodedMsg::Position(m) => m.timestamp,
            DecodedMsg::Velocity(m) => m.timestamp,
            DecodedMsg::Altitude(m) => m.timestamp,
            DecodedMsg::Squawk(m) => m.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
