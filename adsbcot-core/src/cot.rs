//! Cursor-on-Target event synthesis and serialization.
//!
//! `screen` applies the cheap record checks (position, identity, TIS-B
//! policy) so callers can reject before touching any shared state.
//! `synthesize` then builds the full event; it is pure given its inputs and
//! the wall-clock instant it is handed.

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::altitude::AltitudeFields;
use crate::config::{CotConfig, UidKey};
use crate::icao;
use crate::known_craft::KnownCraft;
use crate::record::{AircraftRecord, TISB_MARKER};
use crate::types::icao_from_hex;

/// Wire value meaning "not available". Consumers read 0 as a real zero.
pub const UNKNOWN: f64 = 9_999_999.0;

const FEET_TO_METERS: f64 = 0.3048;
const KNOTS_TO_MPS: f64 = 0.514444;

/// Circular error base added to NACp, airborne and on the ground.
const CE_AIRBORNE: f64 = 56.57;
const CE_GROUND: f64 = 51.56;
/// Linear error base added to NACv.
const LE_BASE: f64 = 12.5;

/// Generic air type for relayed TIS-B targets.
const TISB_COT_TYPE: &str = "a-u-A";
const SURFACE_VEHICLE_COT_TYPE: &str = "a-n-G-E-V-C";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a record produced no event. These are normal outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    NotAnObject,
    UnknownCraft,
    MissingPosition,
    NoIdentity,
    TisbExcluded,
    NonTisbExcluded,
    AboveCeiling,
    BelowFloor,
}

impl Rejection {
    pub const ALL: [Rejection; 8] = [
        Rejection::NotAnObject,
        Rejection::UnknownCraft,
        Rejection::MissingPosition,
        Rejection::NoIdentity,
        Rejection::TisbExcluded,
        Rejection::NonTisbExcluded,
        Rejection::AboveCeiling,
        Rejection::BelowFloor,
    ];

    /// Stable snake_case name for logs and counters.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::NotAnObject => "not_an_object",
            Rejection::UnknownCraft => "unknown_craft",
            Rejection::MissingPosition => "missing_position",
            Rejection::NoIdentity => "no_identity",
            Rejection::TisbExcluded => "tisb_excluded",
            Rejection::NonTisbExcluded => "non_tisb_excluded",
            Rejection::AboveCeiling => "above_ceiling",
            Rejection::BelowFloor => "below_floor",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Event model
// ---------------------------------------------------------------------------

/// Identity fields after trimming and uppercasing. Empty values are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub icao_hex: Option<String>,
    pub registration: Option<String>,
    pub flight: Option<String>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub craft_type: Option<String>,
    pub tisb: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub ce: f64,
    pub le: f64,
    pub hae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    /// Degrees true.
    pub course: f64,
    /// Metres per second.
    pub speed: f64,
    /// Feet per minute.
    pub slope: f64,
}

/// Raw ADS-B fields carried for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdsbExtension {
    pub cot_host_id: String,
    pub icao: Option<String>,
    pub flight: Option<String>,
    pub reg: Option<String>,
    pub squawk: Option<String>,
    pub cat: Option<String>,
    pub craft_type: Option<String>,
    pub alt_baro: Option<f64>,
    pub alt_geom: Option<f64>,
    pub x_alt_geom: Option<f64>,
    pub x_alt_baro_offset: Option<f64>,
    pub signal_level: Option<f64>,
    pub feed_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detail {
    pub callsign: String,
    pub track: Track,
    pub remarks: String,
    pub adsb: AdsbExtension,
    pub signal: Option<f64>,
    pub icon: Option<String>,
}

/// One event, built fresh per accepted observation and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CotEvent {
    pub uid: String,
    pub cot_type: String,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub stale: DateTime<Utc>,
    pub access: String,
    pub point: Point,
    pub detail: Detail,
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty())
}

/// Position, identity and TIS-B checks.
pub fn screen(record: &AircraftRecord, config: &CotConfig) -> Result<Identity, Rejection> {
    if !record.has_position() {
        return Err(Rejection::MissingPosition);
    }

    let identity = Identity {
        icao_hex: clean(record.icao_hex.as_deref()),
        registration: clean(record.registration.as_deref()),
        flight: clean(record.flight.as_deref()),
        squawk: clean(record.squawk.as_deref()),
        category: clean(record.category.as_deref()),
        craft_type: clean(record.craft_type.as_deref()),
        tisb: record.is_tisb(),
    };
    if identity.icao_hex.is_none() && identity.flight.is_none() {
        return Err(Rejection::NoIdentity);
    }

    if identity.tisb && !(config.include_tisb || config.tisb_only) {
        return Err(Rejection::TisbExcluded);
    }
    if config.tisb_only && !identity.tisb {
        return Err(Rejection::NonTisbExcluded);
    }

    Ok(identity)
}

/// Build the event for one record.
pub fn synthesize(
    record: &AircraftRecord,
    config: &CotConfig,
    known: Option<&KnownCraft>,
    altitude: &AltitudeFields,
    now: DateTime<Utc>,
) -> Result<CotEvent, Rejection> {
    let identity = screen(record, config)?;
    let (Some(lat), Some(lon)) = (record.lat, record.lon) else {
        return Err(Rejection::MissingPosition);
    };

    let best_geom = record.altitude_geom.or(altitude.estimated_geom);
    if let Some(alt) = best_geom {
        if config.alt_upper.is_some_and(|upper| alt > upper) {
            return Err(Rejection::AboveCeiling);
        }
        if config.alt_lower.is_some_and(|lower| alt < lower) {
            return Err(Rejection::BelowFloor);
        }
    }

    let uid = event_uid(&identity, config.uid_key).ok_or(Rejection::NoIdentity)?;
    let callsign = known
        .and_then(|k| k.callsign.clone())
        .or_else(|| identity.flight.clone())
        .or_else(|| identity.registration.clone())
        .or_else(|| identity.icao_hex.clone())
        .unwrap_or_default();

    let on_ground = record.on_ground.unwrap_or(false);
    let nac_p = record.nac_p.unwrap_or(0.0);
    let nac_v = record.nac_v.unwrap_or(nac_p);
    let hae = if on_ground {
        UNKNOWN
    } else {
        best_geom
            .or(record.altitude_baro)
            .map_or(UNKNOWN, |ft| ft * FEET_TO_METERS)
    };

    let point = Point {
        lat,
        lon,
        ce: nac_p + if on_ground { CE_GROUND } else { CE_AIRBORNE },
        le: nac_v + LE_BASE,
        hae,
    };

    let track = Track {
        course: record.track.unwrap_or(UNKNOWN),
        speed: record.ground_speed.map_or(UNKNOWN, |kts| kts * KNOTS_TO_MPS),
        slope: record.vertical_rate.unwrap_or(UNKNOWN),
    };

    let adsb = AdsbExtension {
        cot_host_id: config.cot_host_id.clone(),
        icao: identity.icao_hex.clone(),
        flight: identity.flight.clone(),
        reg: identity.registration.clone(),
        squawk: identity.squawk.clone(),
        cat: identity.category.clone(),
        craft_type: identity.craft_type.clone(),
        alt_baro: record.altitude_baro,
        alt_geom: record.altitude_geom,
        x_alt_geom: altitude.estimated_geom,
        x_alt_baro_offset: altitude.baro_offset,
        signal_level: record.signal_level,
        feed_url: config.feed_url.clone(),
    };

    Ok(CotEvent {
        uid,
        cot_type: cot_type(&identity, known),
        time: now,
        start: now,
        stale: now + Duration::seconds(config.stale_secs as i64),
        access: config.cot_access.clone(),
        point,
        detail: Detail {
            callsign,
            track,
            remarks: remarks(&identity, config),
            adsb,
            signal: record.signal_level,
            icon: known.and_then(|k| k.icon.clone()),
        },
    })
}

/// UID by the configured key, falling back to ICAO hex, then flight.
fn event_uid(identity: &Identity, key: UidKey) -> Option<String> {
    let preferred = match key {
        UidKey::Reg => identity.registration.as_ref().map(|r| format!("REG-{r}")),
        UidKey::Flight => identity.flight.as_ref().map(|f| format!("FLIGHT-{f}")),
        UidKey::Icao => None,
    };
    preferred
        .or_else(|| identity.icao_hex.as_ref().map(|h| format!("ICAO-{h}")))
        .or_else(|| identity.flight.as_ref().map(|f| format!("FLIGHT-{f}")))
}

/// Platform suffix for an ADS-B emitter category (or its bare set-A digit).
fn platform_suffix(category: &str) -> Option<&'static str> {
    match category {
        "A1" | "A2" | "A3" | "A4" | "A5" | "A6" | "1" | "2" | "3" | "4" | "5" | "6" => Some("F"),
        "A7" | "7" => Some("H"),
        "B1" | "B4" | "B6" => Some("F"),
        "B2" => Some("L"),
        _ => None,
    }
}

fn cot_type(identity: &Identity, known: Option<&KnownCraft>) -> String {
    if identity.tisb {
        return TISB_COT_TYPE.to_string();
    }
    if let Some(cot) = known.and_then(|k| k.cot.as_deref()) {
        return cot.to_string();
    }

    let category = identity.category.as_deref().unwrap_or("");
    if matches!(category, "C1" | "C2" | "C3") {
        return SURFACE_VEHICLE_COT_TYPE.to_string();
    }

    let military = identity
        .icao_hex
        .as_deref()
        .and_then(|hex| icao_from_hex(hex.trim_start_matches(TISB_MARKER)))
        .is_some_and(|addr| icao::is_military(&addr, identity.flight.as_deref()));
    let mut cot_type = String::from(if military { "a-n-A-M" } else { "a-n-A-C" });
    if let Some(suffix) = platform_suffix(category) {
        cot_type.push('-');
        cot_type.push_str(suffix);
    }
    cot_type
}

fn remarks(identity: &Identity, config: &CotConfig) -> String {
    let fields = [
        identity.flight.clone(),
        identity.registration.clone(),
        identity.squawk.as_ref().map(|s| format!("Squawk: {s}")),
        identity.category.as_ref().map(|c| format!("Cat.: {c}")),
        identity.craft_type.as_ref().map(|t| format!("Type: {t}")),
        identity.icao_hex.clone(),
        config.feed_url.as_ref().map(|u| format!("Feed: {u}")),
        Some(config.cot_host_id.clone()),
    ];
    fields
        .into_iter()
        .flatten()
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Decimal form that always carries a fractional part, e.g. `1143.0`.
fn num(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{s}.0")
    } else {
        s
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Collects `name="value"` pairs, skipping absent values.
struct Attrs(String);

impl Attrs {
    fn new() -> Self {
        Attrs(String::new())
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        let _ = write!(self.0, " {name}=\"{}\"", escape(value));
        self
    }

    fn opt_text(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.text(name, v),
            None => self,
        }
    }

    fn num(self, name: &str, value: f64) -> Self {
        self.text(name, &num(value))
    }

    fn opt_num(self, name: &str, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.num(name, v),
            None => self,
        }
    }
}

impl CotEvent {
    /// XML declaration line followed by the `<event>` document.
    pub fn to_xml(&self) -> String {
        let stamp = |t: &DateTime<Utc>| t.format(TIME_FORMAT).to_string();
        let detail = &self.detail;
        let adsb = &detail.adsb;

        let event = Attrs::new()
            .text("version", "2.0")
            .text("type", &self.cot_type)
            .text("uid", &self.uid)
            .text("how", "m-g")
            .text("time", &stamp(&self.time))
            .text("start", &stamp(&self.start))
            .text("stale", &stamp(&self.stale))
            .text("access", &self.access)
            .text("qos", "1-r-c");
        let point = Attrs::new()
            .num("lat", self.point.lat)
            .num("lon", self.point.lon)
            .num("ce", self.point.ce)
            .num("le", self.point.le)
            .num("hae", self.point.hae);
        let track = Attrs::new()
            .num("course", detail.track.course)
            .num("speed", detail.track.speed)
            .num("slope", detail.track.slope);
        let extension = Attrs::new()
            .text("cot_host_id", &adsb.cot_host_id)
            .opt_text("icao", adsb.icao.as_deref())
            .opt_text("flight", adsb.flight.as_deref())
            .opt_text("reg", adsb.reg.as_deref())
            .opt_text("squawk", adsb.squawk.as_deref())
            .opt_text("cat", adsb.cat.as_deref())
            .opt_text("craft_type", adsb.craft_type.as_deref())
            .opt_num("alt_baro", adsb.alt_baro)
            .opt_num("alt_geom", adsb.alt_geom)
            .opt_num("x_alt_geom", adsb.x_alt_geom)
            .opt_num("x_alt_baro_offset", adsb.x_alt_baro_offset)
            .opt_num("signalLevel", adsb.signal_level)
            .opt_text("feed_url", adsb.feed_url.as_deref());

        let mut xml = String::with_capacity(1024);
        xml.push_str(XML_DECLARATION);
        xml.push('\n');
        let _ = write!(xml, "<event{}>", event.0);
        let _ = write!(xml, "<point{}/>", point.0);
        xml.push_str("<detail>");
        let _ = write!(xml, "<track{}/>", track.0);
        let _ = write!(
            xml,
            "<contact{}/>",
            Attrs::new().text("callsign", &detail.callsign).0
        );
        let _ = write!(xml, "<remarks>{}</remarks>", escape(&detail.remarks));
        let _ = write!(xml, "<__adsb{}/>", extension.0);
        let _ = write!(
            xml,
            "<_radio{}/>",
            Attrs::new().opt_num("signal", detail.signal).0
        );
        if let Some(icon) = &detail.icon {
            let _ = write!(
                xml,
                "<usericon{}/>",
                Attrs::new().text("iconsetpath", icon).0
            );
        }
        xml.push_str("</detail></event>");
        xml
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }

    /// The same event as JSON, for trace logs. Timestamps are RFC 3339.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
