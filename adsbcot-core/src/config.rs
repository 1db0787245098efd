//! Synthesizer configuration, resolved once at startup.

use std::fmt;
use std::str::FromStr;

use crate::types::CotError;

/// Default stale period for emitted events, seconds.
pub const DEFAULT_COT_STALE: u64 = 120;

/// Default `access` attribute on emitted events.
pub const DEFAULT_COT_ACCESS: &str = "Undefined";

/// Which identity field leads the event UID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UidKey {
    #[default]
    Icao,
    Reg,
    Flight,
}

impl FromStr for UidKey {
    type Err = CotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ICAO" | "HEX" => Ok(UidKey::Icao),
            "REG" => Ok(UidKey::Reg),
            "FLIGHT" => Ok(UidKey::Flight),
            other => Err(CotError::Config(format!(
                "UID_KEY must be ICAO, REG or FLIGHT, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for UidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UidKey::Icao => write!(f, "ICAO"),
            UidKey::Reg => write!(f, "REG"),
            UidKey::Flight => write!(f, "FLIGHT"),
        }
    }
}

/// Everything the synthesizer needs to turn a record into an event.
#[derive(Debug, Clone, PartialEq)]
pub struct CotConfig {
    pub stale_secs: u64,
    pub uid_key: UidKey,
    pub include_tisb: bool,
    pub tisb_only: bool,
    pub include_all_craft: bool,
    /// Geometric altitude ceiling, feet.
    pub alt_upper: Option<f64>,
    /// Geometric altitude floor, feet.
    pub alt_lower: Option<f64>,
    pub cot_host_id: String,
    pub cot_access: String,
    /// Source feed, echoed into remarks and the `__adsb` block.
    pub feed_url: Option<String>,
}

impl Default for CotConfig {
    fn default() -> Self {
        CotConfig {
            stale_secs: DEFAULT_COT_STALE,
            uid_key: UidKey::Icao,
            include_tisb: false,
            tisb_only: false,
            include_all_craft: false,
            alt_upper: None,
            alt_lower: None,
            cot_host_id: "adsbcot".into(),
            cot_access: DEFAULT_COT_ACCESS.into(),
            feed_url: None,
        }
    }
}

impl CotConfig {
    /// Same settings, attributed to one feed.
    pub fn for_feed(&self, feed_url: &str) -> CotConfig {
        CotConfig {
            feed_url: Some(feed_url.to_string()),
            ..self.clone()
        }
    }

    /// Reject contradictory altitude bounds.
    pub fn validate(&self) -> Result<(), CotError> {
        if let (Some(lower), Some(upper)) = (self.alt_lower, self.alt_upper) {
            if lower > upper {
                return Err(CotError::Config(format!(
                    "ALT_LOWER ({lower}) is above ALT_UPPER ({upper})"
                )));
            }
        }
        Ok(())
    }
}

/// Altitude bounds use 0 to mean "unset".
pub fn altitude_bound(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_key_parse() {
        assert_eq!("icao".parse::<UidKey>().unwrap(), UidKey::Icao);
        assert_eq!(" REG ".parse::<UidKey>().unwrap(), UidKey::Reg);
        assert_eq!("Flight".parse::<UidKey>().unwrap(), UidKey::Flight);
        assert!("tail".parse::<UidKey>().is_err());
    }

    #[test]
    fn test_for_feed_keeps_settings() {
        let base = CotConfig {
            include_tisb: true,
            ..CotConfig::default()
        };
        let feed = base.for_feed("http://localhost/data/aircraft.json");
        assert!(feed.include_tisb);
        assert_eq!(
            feed.feed_url.as_deref(),
            Some("http://localhost/data/aircraft.json")
        );
        assert_eq!(base.feed_url, None);
    }

    #[test]
    fn test_validate_bounds() {
        let bad = CotConfig {
            alt_lower: Some(10_000.0),
            alt_upper: Some(5_000.0),
            ..CotConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(CotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_altitude_bound_zero_unset() {
        assert_eq!(altitude_bound(0.0), None);
        assert_eq!(altitude_bound(18_000.0), Some(18_000.0));
    }
}
