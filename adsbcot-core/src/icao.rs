//! ICAO address facts: military allocation and US civil registrations.
//!
//! US civil addresses 0xA00001-0xADF7C7 are a mixed-radix encoding of the
//! N-number, so the tail number can be recovered from the address alone.

use crate::types::{icao_to_u32, Icao};

const US_MILITARY: std::ops::RangeInclusive<u32> = 0xADF7C8..=0xAFFFFF;
const US_CIVIL: std::ops::RangeInclusive<u32> = 0xA00001..=0xADF7C7;

/// Registration letters (I and O are never issued).
const NNUM_LETTERS: &[u8; 24] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Addresses per leading digit (N1xxxx .. N9xxxx).
const FIRST_DIGIT_SPAN: u32 = 101_711;

/// Addresses under each second, third and fourth digit.
const DIGIT_SPANS: [u32; 3] = [10_111, 951, 35];

/// Letter-suffix block after each digit: 24 letters, each alone or with a
/// second letter.
const SUFFIX_SPAN: u32 = 600;

const MILITARY_CALLSIGNS: &[&str] = &[
    "RCH", "REACH", "DUKE", "DOOM", "JAKE", "TOPCAT", "EVAC", "TEAL", "SPAR", "SAM", "EXEC",
    "CRZR", "MOOSE", "CANAF", "ASCOT", "RAFR", "GAF", "CNV", "FAF", "IAM",
];

/// True when the address is in the US military block or the callsign uses a
/// known military prefix.
pub fn is_military(icao: &Icao, callsign: Option<&str>) -> bool {
    if US_MILITARY.contains(&icao_to_u32(icao)) {
        return true;
    }
    callsign
        .map(|cs| cs.trim().to_uppercase())
        .is_some_and(|cs| MILITARY_CALLSIGNS.iter().any(|p| cs.starts_with(p)))
}

/// One or two letter suffix at `index` within a 600-entry suffix block.
fn letter_suffix(index: u32) -> Option<String> {
    let first = *NNUM_LETTERS.get((index / 25) as usize)? as char;
    match index % 25 {
        0 => Some(first.to_string()),
        n => Some(format!("{first}{}", NNUM_LETTERS[(n - 1) as usize] as char)),
    }
}

/// Recover the US N-number from a civil address.
///
/// Returns `None` outside the US civil block.
pub fn icao_to_n_number(icao: &Icao) -> Option<String> {
    let addr = icao_to_u32(icao);
    if !US_CIVIL.contains(&addr) {
        return None;
    }

    let offset = addr - US_CIVIL.start();
    let mut tail = format!("N{}", offset / FIRST_DIGIT_SPAN + 1);
    let mut rem = offset % FIRST_DIGIT_SPAN;

    for span in DIGIT_SPANS {
        if rem == 0 {
            return Some(tail);
        }
        rem -= 1;
        if rem < SUFFIX_SPAN {
            tail.push_str(&letter_suffix(rem)?);
            return Some(tail);
        }
        rem -= SUFFIX_SPAN;
        tail.push_str(&(rem / span).to_string());
        rem %= span;
    }

    if rem == 0 {
        return Some(tail);
    }
    // Fifth position: a single letter, then a single digit
    rem -= 1;
    let letters = NNUM_LETTERS.len() as u32;
    if rem < letters {
        tail.push(NNUM_LETTERS[rem as usize] as char);
    } else {
        tail.push_str(&(rem - letters).to_string());
    }
    Some(tail)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
