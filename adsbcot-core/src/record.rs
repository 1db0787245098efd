//! Canonical aircraft record and normalization of source-specific JSON.
//!
//! dump1090/readsb snapshots, ADS-B Exchange style APIs, and Stratux traffic
//! messages all name the same facts differently. Everything downstream of
//! this module only ever sees [`AircraftRecord`].

use serde_json::{Map, Value};

/// Prefix marking a relayed TIS-B target instead of genuine ADS-B.
pub const TISB_MARKER: char = '~';

/// One normalized observation of one aircraft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftRecord {
    /// Uppercase 24-bit address, possibly prefixed with [`TISB_MARKER`].
    pub icao_hex: Option<String>,
    pub registration: Option<String>,
    pub flight: Option<String>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub craft_type: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Pressure altitude, feet. `None` when unknown or on the ground.
    pub altitude_baro: Option<f64>,
    /// Geometric (GNSS) altitude, feet.
    pub altitude_geom: Option<f64>,
    /// Knots.
    pub ground_speed: Option<f64>,
    /// Degrees true.
    pub track: Option<f64>,
    /// Feet per minute.
    pub vertical_rate: Option<f64>,
    pub signal_level: Option<f64>,
    pub on_ground: Option<bool>,
    pub nac_p: Option<f64>,
    pub nac_v: Option<f64>,
}

impl AircraftRecord {
    pub fn is_tisb(&self) -> bool {
        self.icao_hex
            .as_deref()
            .is_some_and(|hex| hex.starts_with(TISB_MARKER))
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some_and(f64::is_finite) && self.lon.is_some_and(f64::is_finite)
    }

    /// Normalize one loosely-typed feed entry. `None` when it is not an object.
    pub fn from_json(value: &Value) -> Option<AircraftRecord> {
        let obj = value.as_object()?;

        let mut record = AircraftRecord {
            icao_hex: icao_hex(obj),
            registration: text(obj, &["r", "reg", "Reg", "registration"]),
            flight: text(obj, &["flight", "Tail", "callsign"]),
            squawk: squawk(obj),
            category: category(obj),
            craft_type: text(obj, &["t", "craft_type"]),
            ground_speed: number(obj, &["gs", "Speed", "speed"]),
            track: number(obj, &["track", "trk", "Track"]),
            vertical_rate: number(obj, &["baro_rate", "geom_rate", "Vvel"]),
            signal_level: number(obj, &["rssi", "SignalLevel"]),
            on_ground: flag(obj, &["OnGround", "on_ground", "gnd"]),
            nac_p: number(obj, &["nac_p", "NACp"]),
            nac_v: number(obj, &["nac_v", "NACv"]),
            ..AircraftRecord::default()
        };

        if obj.get("Speed_valid").and_then(Value::as_bool) == Some(false) {
            record.ground_speed = None;
        }

        apply_position(obj, &mut record);
        apply_altitude(obj, &mut record);

        if is_tisb_source(obj) {
            if let Some(hex) = record.icao_hex.as_mut() {
                if !hex.starts_with(TISB_MARKER) {
                    hex.insert(0, TISB_MARKER);
                }
            }
        }

        Some(record)
    }
}

// ---------------------------------------------------------------------------
// Document shapes
// ---------------------------------------------------------------------------

/// Aircraft list of a full snapshot document (`aircraft` or `ac` key).
pub fn snapshot_entries(doc: &Value) -> Option<&[Value]> {
    ["aircraft", "ac"]
        .iter()
        .find_map(|key| doc.get(key).and_then(Value::as_array))
        .map(Vec::as_slice)
}

/// Entries of a streamed message: a bare list, a snapshot, or one update.
pub fn message_entries(doc: &Value) -> Vec<&Value> {
    match doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => match snapshot_entries(doc) {
            Some(items) => items.iter().collect(),
            None => vec![doc],
        },
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
}

/// Trimmed non-empty string; numbers are rendered as text.
fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Number, or a string holding one.
fn number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| as_number(obj.get(*key)?))
}

/// Finite values only; `"nan"` and `"inf"` strings count as absent.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn flag(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| obj.get(*key)?.as_bool())
}

fn icao_hex(obj: &Map<String, Value>) -> Option<String> {
    match first(obj, &["hex", "icao", "Icao_addr", "icao_addr"])? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_uppercase())
        }
        Value::Number(n) => n.as_u64().map(|addr| format!("{:06X}", addr & 0xFFFFFF)),
        _ => None,
    }
}

fn squawk(obj: &Map<String, Value>) -> Option<String> {
    match first(obj, &["squawk", "Squawk"])? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        // Stratux reports 0 for "no squawk"
        Value::Number(n) => n.as_u64().filter(|&v| v != 0).map(|v| format!("{v:04}")),
        _ => None,
    }
}

fn category(obj: &Map<String, Value>) -> Option<String> {
    if let Some(cat) = text(obj, &["category", "cat", "Category"]) {
        return Some(cat.to_uppercase());
    }
    // GDL90 emitter category: 1-7 set A, 9-15 set B, 17-23 set C
    let code = obj.get("Emitter_category")?.as_u64()?;
    let (set, n) = match code {
        1..=7 => ('A', code),
        9..=15 => ('B', code - 8),
        17..=23 => ('C', code - 16),
        _ => return None,
    };
    Some(format!("{set}{n}"))
}

fn is_tisb_source(obj: &Map<String, Value>) -> bool {
    let readsb = obj
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.starts_with("tisb"));
    let stratux = obj
        .get("TargetType")
        .and_then(Value::as_u64)
        .is_some_and(|t| t == 3 || t == 4);
    readsb || stratux
}

fn apply_position(obj: &Map<String, Value>, record: &mut AircraftRecord) {
    if obj.get("Position_valid").and_then(Value::as_bool) == Some(false) {
        return;
    }
    (record.lat, record.lon) = coordinates(obj, &["lat", "Lat"], &["lon", "Lon", "Lng", "lng"]);

    if !record.has_position() {
        if let Some(Value::Object(last)) = obj.get("lastPosition") {
            (record.lat, record.lon) = coordinates(last, &["lat"], &["lon"]);
        }
    }
}

/// Latitude and longitude, each dropped when outside its valid range.
fn coordinates(
    obj: &Map<String, Value>,
    lat_keys: &[&str],
    lon_keys: &[&str],
) -> (Option<f64>, Option<f64>) {
    (
        number(obj, lat_keys).filter(|lat| (-90.0..=90.0).contains(lat)),
        number(obj, lon_keys).filter(|lon| (-180.0..=180.0).contains(lon)),
    )
}

fn apply_altitude(obj: &Map<String, Value>, record: &mut AircraftRecord) {
    match obj.get("alt_baro") {
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("ground") => {
            record.on_ground = Some(true);
        }
        Some(value) => record.altitude_baro = as_number(value),
        None => {}
    }
    record.altitude_geom = number(obj, &["alt_geom"]);

    // Stratux: Alt is pressure altitude unless AltIsGNSS is set
    if let Some(alt) = number(obj, &["Alt"]) {
        if obj.get("AltIsGNSS").and_then(Value::as_bool) == Some(true) {
            record.altitude_geom.get_or_insert(alt);
        } else {
            record.altitude_baro.get_or_insert(alt);
            if let Some(diff) = number(obj, &["GnssDiffFromBaroAlt"]) {
                record.altitude_geom.get_or_insert(alt + diff);
            }
        }
    }

    if record.on_ground == Some(true) {
        record.altitude_baro = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
