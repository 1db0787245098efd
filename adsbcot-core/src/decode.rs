//! Decode classified Mode S frames into typed aircraft messages.
//!
//! - DF17 TC 1-4:   identification (callsign + emitter category)
//! - DF17 TC 9-18:  airborne position, barometric altitude
//! - DF17 TC 19:    airborne velocity, vertical rate, GNSS/baro difference
//! - DF17 TC 20-22: airborne position, GNSS height
//! - DF20:          Comm-B altitude reply
//! - DF21:          Comm-B identity reply (squawk)

use crate::frame::ModeFrame;
use crate::types::*;

const METERS_TO_FEET: f64 = 3.28084;

// ---------------------------------------------------------------------------
// Altitude and identity codes
// ---------------------------------------------------------------------------

/// Decode the 12-bit altitude field of an airborne position squitter.
///
/// Identical to the 13-bit AC field with the M bit removed, so the code is
/// widened and handed to [`decode_ac13`].
pub fn decode_ac12(code: u32) -> Option<i32> {
    decode_ac13(((code & 0x0FC0) << 1) | (code & 0x003F))
}

/// Decode the 13-bit AC field (`C1 A1 C2 A2 C4 A4 M B1 Q B2 D2 B4 D4`).
///
/// Q=1 selects 25-ft increments, Q=0 the 100-ft Gillham code. Metric
/// altitudes (M=1) are not decoded.
pub fn decode_ac13(code: u32) -> Option<i32> {
    if code == 0 || code & 0x0040 != 0 {
        return None;
    }
    if code & 0x0010 != 0 {
        let n = ((code & 0x1F80) >> 2) | ((code & 0x0020) >> 1) | (code & 0x000F);
        return Some(n as i32 * 25 - 1000);
    }
    decode_gillham(code)
}

fn decode_gillham(code: u32) -> Option<i32> {
    let bit = |shift: u32| (code >> shift) & 1 == 1;

    // C1 C2 C4 carry the 100-ft step in a reflected code
    if !(bit(12) || bit(10) || bit(8)) {
        return None;
    }
    let mut hundreds = 0u32;
    for (shift, mask) in [(12, 7), (10, 3), (8, 1)] {
        if bit(shift) {
            hundreds ^= mask;
        }
    }
    if hundreds & 5 == 5 {
        hundreds ^= 2;
    }
    if hundreds > 5 {
        return None;
    }

    // D2 D4 A1 A2 A4 B1 B2 B4 form the 500-ft Gray code, most significant first
    let mut five_hundreds = 0u32;
    for (shift, mask) in [
        (2, 0xFF),
        (0, 0x7F),
        (11, 0x3F),
        (9, 0x1F),
        (7, 0x0F),
        (5, 0x07),
        (3, 0x03),
        (1, 0x01),
    ] {
        if bit(shift) {
            five_hundreds ^= mask;
        }
    }
    if five_hundreds & 1 == 1 {
        hundreds = 6 - hundreds;
    }

    let altitude = (five_hundreds as i32 * 5 + hundreds as i32 - 13) * 100;
    (altitude >= -1200).then_some(altitude)
}

/// Decode the 13-bit identity field into a 4-digit octal squawk.
pub fn decode_squawk(code: u32) -> String {
    let digit = |hi: u32, mid: u32, lo: u32| {
        ((code >> hi) & 1) << 2 | ((code >> mid) & 1) << 1 | ((code >> lo) & 1)
    };
    // Field order: C1 A1 C2 A2 C4 A4 X B1 D1 B2 D2 B4 D4
    let a = digit(7, 9, 11);
    let b = digit(1, 3, 5);
    let c = digit(8, 10, 12);
    let d = digit(0, 2, 4);
    format!("{a}{b}{c}{d}")
}

// ---------------------------------------------------------------------------
// DF17 decoders
// ---------------------------------------------------------------------------

/// Decode TC 1-4: callsign and emitter category.
pub fn decode_identification(frame: &ModeFrame) -> Option<IdentificationMsg> {
    let tc = frame.type_code()?;
    let set = match tc {
        4 => 'A',
        3 => 'B',
        2 => 'C',
        1 => 'D',
        _ => return None,
    };
    let bits = frame.me_bits();
    let ca = ((bits >> 48) & 0x07) as u8;

    let callsign: String = (0..8)
        .map(|i| CALLSIGN_CHARSET[((bits >> (42 - i * 6)) & 0x3F) as usize] as char)
        .collect();

    Some(IdentificationMsg {
        icao: frame.icao,
        callsign,
        category: (ca != 0).then(|| format!("{set}{ca}")),
        timestamp: frame.timestamp,
    })
}

/// Decode TC 9-18 and 20-22: airborne position.
pub fn decode_position(frame: &ModeFrame) -> Option<PositionMsg> {
    let tc = frame.type_code()?;
    let gnss_altitude = match tc {
        9..=18 => false,
        20..=22 => true,
        _ => return None,
    };
    let bits = frame.me_bits();
    let alt_code = ((bits >> 36) & 0x0FFF) as u32;

    let altitude_ft = if gnss_altitude {
        (alt_code != 0).then(|| (alt_code as f64 * METERS_TO_FEET).round() as i32)
    } else {
        decode_ac12(alt_code)
    };

    Some(PositionMsg {
        icao: frame.icao,
        altitude_ft,
        gnss_altitude,
        cpr_odd: (bits >> 34) & 1 == 1,
        cpr_lat: ((bits >> 17) & 0x1FFFF) as u32,
        cpr_lon: (bits & 0x1FFFF) as u32,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 19: airborne velocity.
pub fn decode_velocity(frame: &ModeFrame) -> Option<VelocityMsg> {
    if frame.type_code()? != 19 {
        return None;
    }
    let bits = frame.me_bits();
    let subtype = ((bits >> 48) & 0x07) as u8;

    let (speed_kts, heading_deg) = match subtype {
        1 | 2 => ground_vector(bits, if subtype == 2 { 4.0 } else { 1.0 }),
        3 | 4 => airspeed_vector(bits, if subtype == 4 { 4.0 } else { 1.0 }),
        _ => return None,
    };

    Some(VelocityMsg {
        icao: frame.icao,
        speed_kts,
        heading_deg,
        vertical_rate_fpm: signed_field(bits, 19, 10, 0x1FF, 64),
        gnss_baro_diff_ft: signed_field(bits, 7, 0, 0x7F, 25),
        timestamp: frame.timestamp,
    })
}

/// Sign-magnitude field where a raw value of 0 means "not available" and
/// the magnitude is `(raw - 1) * scale`.
fn signed_field(bits: u64, sign_shift: u32, shift: u32, mask: u64, scale: i32) -> Option<i32> {
    let raw = ((bits >> shift) & mask) as i32;
    if raw == 0 {
        return None;
    }
    let value = (raw - 1) * scale;
    Some(if (bits >> sign_shift) & 1 == 1 { -value } else { value })
}

fn ground_vector(bits: u64, factor: f64) -> (Option<f64>, Option<f64>) {
    let ew = ((bits >> 32) & 0x3FF) as i32;
    let ns = ((bits >> 21) & 0x3FF) as i32;
    if ew == 0 || ns == 0 {
        return (None, None);
    }
    let vx = (ew - 1) as f64 * factor * if (bits >> 42) & 1 == 1 { -1.0 } else { 1.0 };
    let vy = (ns - 1) as f64 * factor * if (bits >> 31) & 1 == 1 { -1.0 } else { 1.0 };
    let speed = vx.hypot(vy);
    let heading = vx.atan2(vy).to_degrees().rem_euclid(360.0);
    (Some(round2(speed)), Some(round2(heading)))
}

fn airspeed_vector(bits: u64, factor: f64) -> (Option<f64>, Option<f64>) {
    let heading = ((bits >> 42) & 1 == 1)
        .then(|| round2(((bits >> 32) & 0x3FF) as f64 * 360.0 / 1024.0));
    let raw = ((bits >> 21) & 0x3FF) as i32;
    let speed = (raw != 0).then(|| (raw - 1) as f64 * factor);
    (speed, heading)
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Decode any accepted frame into the matching message type.
pub fn decode(frame: &ModeFrame) -> Option<DecodedMsg> {
    match frame.format {
        DownlinkFormat::ExtendedSquitter => match frame.type_code()? {
            1..=4 => decode_identification(frame).map(DecodedMsg::Identification),
            9..=18 | 20..=22 => decode_position(frame).map(DecodedMsg::Position),
            19 => decode_velocity(frame).map(DecodedMsg::Velocity),
            _ => None,
        },
        DownlinkFormat::CommBAltitude => Some(DecodedMsg::Altitude(AltitudeMsg {
            icao: frame.icao,
            altitude_ft: decode_ac13(frame.field_13()),
            timestamp: frame.timestamp,
        })),
        DownlinkFormat::CommBIdentity => Some(DecodedMsg::Squawk(SquawkMsg {
            icao: frame.icao,
            squawk: decode_squawk(frame.field_13()),
            timestamp: frame.timestamp,
        })),
    }
}

fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
