//! Compact Position Reporting decode for airborne positions.
//!
//! Global decode needs an even/odd pair no more than 10 s apart. Local decode
//! needs one frame plus a reference position within about 180 NM.

use std::f64::consts::PI;

/// Latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// 2^17: CPR coordinates are 17-bit fractions of a zone.
const CPR_SCALE: f64 = 131_072.0;

/// Maximum age difference of an even/odd pair for global decode (seconds).
pub const MAX_PAIR_AGE: f64 = 10.0;

/// One encoded position report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprFrame {
    pub lat: u32,
    pub lon: u32,
    pub odd: bool,
    pub timestamp: f64,
}

impl CprFrame {
    fn lat_frac(&self) -> f64 {
        self.lat as f64 / CPR_SCALE
    }

    fn lon_frac(&self) -> f64 {
        self.lon as f64 / CPR_SCALE
    }

    fn dlat(&self) -> f64 {
        360.0 / (4.0 * NZ - if self.odd { 1.0 } else { 0.0 })
    }
}

/// Number of longitude zones at a latitude: 59 at the equator, 1 at the poles.
pub fn nl(lat: f64) -> i32 {
    if lat.abs() >= 87.0 {
        return 1;
    }
    let a = 1.0 - (PI / (2.0 * NZ)).cos();
    let b = (lat.abs().to_radians()).cos().powi(2);
    ((2.0 * PI / (1.0 - a / b).acos()).floor() as i32).max(1)
}

/// Euclidean modulo.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Decode a position from an even/odd pair, anchored on the newer frame.
///
/// Fails when the pair is too far apart in time or straddles a longitude
/// zone boundary.
pub fn global_decode(even: &CprFrame, odd: &CprFrame) -> Option<(f64, f64)> {
    if (even.timestamp - odd.timestamp).abs() > MAX_PAIR_AGE {
        return None;
    }

    let j = (59.0 * even.lat_frac() - 60.0 * odd.lat_frac() + 0.5).floor();

    let wrap = |lat: f64| if lat >= 270.0 { lat - 360.0 } else { lat };
    let lat_even = wrap(even.dlat() * (modulo(j, 60.0) + even.lat_frac()));
    let lat_odd = wrap(odd.dlat() * (modulo(j, 59.0) + odd.lat_frac()));

    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let (lat, newest) = if even.timestamp >= odd.timestamp {
        (lat_even, even)
    } else {
        (lat_odd, odd)
    };

    let nl_val = nl(lat);
    let zones = (nl_val - newest.odd as i32).max(1) as f64;
    let m = (even.lon_frac() * (nl_val - 1) as f64 - odd.lon_frac() * nl_val as f64 + 0.5).floor();
    let mut lon = (360.0 / zones) * (modulo(m, zones) + newest.lon_frac());
    if lon >= 180.0 {
        lon -= 360.0;
    }

    Some((round6(lat), round6(lon)))
}

/// Decode a single frame against a nearby reference position.
pub fn local_decode(frame: &CprFrame, ref_lat: f64, ref_lon: f64) -> (f64, f64) {
    let dlat = frame.dlat();
    let j = (ref_lat / dlat).floor()
        + (modulo(ref_lat, dlat) / dlat - frame.lat_frac() + 0.5).floor();
    let mut lat = dlat * (j + frame.lat_frac());
    if lat > 90.0 {
        lat -= 360.0;
    }

    let zones = (nl(lat) - frame.odd as i32).max(1) as f64;
    let dlon = 360.0 / zones;
    let m = (ref_lon / dlon).floor()
        + (modulo(ref_lon, dlon) / dlon - frame.lon_frac() + 0.5).floor();
    let mut lon = dlon * (m + frame.lon_frac());
    if lon >= 180.0 {
        lon -= 360.0;
    }

    (round6(lat), round6(lon))
}

fn round6(val: f64) -> f64 {
    (val * 1_000_000.0).round() / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn even(t: f64) -> CprFrame {
        CprFrame {
            lat: 93000,
            lon: 51372,
            odd: false,
            timestamp: t,
        }
    }

    fn odd(t: f64) -> CprFrame {
        CprFrame {
            lat: 74158,
            lon: 50194,
            odd: true,
            timestamp: t,
        }
    }

    #[test]
    fn test_nl_bounds() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-89.9), 1);
        let mid = nl(52.0);
        assert!(mid > 30 && mid < 40, "NL at 52 deg should be ~36, got {mid}");
    }

    #[test]
    fn test_global_decode_even_newer() {
        let (lat, lon) = global_decode(&even(1.0), &odd(0.0)).unwrap();
        assert!((lat - 52.2572).abs() < 0.01, "lat {lat}");
        assert!((lon - 3.9194).abs() < 0.01, "lon {lon}");
    }

    #[test]
    fn test_global_decode_odd_newer() {
        let (lat, lon) = global_decode(&even(0.0), &odd(1.0)).unwrap();
        assert!((lat - 52.2658).abs() < 0.001, "lat {lat}");
        assert!((lon - 3.9389).abs() < 0.001, "lon {lon}");
    }

    #[test]
    fn test_global_decode_stale_pair() {
        assert!(global_decode(&even(11.0), &odd(0.0)).is_none());
    }

    #[test]
    fn test_local_decode_near_reference() {
        let (lat, lon) = local_decode(&even(0.0), 52.25, 3.92);
        assert!((lat - 52.2572).abs() < 0.01, "lat {lat}");
        assert!((lon - 3.9194).abs() < 0.01, "lon {lon}");
    }

    #[test]
    fn test_modulo_negative() {
        assert!((modulo(-1.0, 60.0) - 59.0).abs() < 1e-10);
    }
}
