//! Mode S decoder and the batching adapter in front of it.
//!
//! [`Tracker`] keeps per-aircraft state built from every frame seen so far:
//! identity, CPR buffers, position, velocity, altitude. [`DecoderAdapter`]
//! classifies extracted frames, batches them, and turns the decoder snapshot
//! into [`AircraftRecord`]s once an aircraft is fully resolved.

use std::collections::HashMap;

use crate::cpr::{self, CprFrame};
use crate::decode::decode;
use crate::frame::{classify, IcaoCache, ModeFrame};
use crate::framing::RawFrame;
use crate::icao;
use crate::record::AircraftRecord;
use crate::types::*;

/// Aircraft considered stale after this many seconds of silence.
pub const STALE_TIMEOUT: f64 = 60.0;

/// A Mode S decoder fed in batches.
pub trait ModeSDecoder {
    /// Decode one batch: extended squitters and Comm-B replies, each in
    /// arrival order.
    fn process(&mut self, squitters: &[ModeFrame], comm_b: &[ModeFrame]);

    /// Best current state of every tracked aircraft.
    fn snapshot(&self) -> Vec<AircraftState>;
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Everything known about one aircraft.
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftState {
    pub icao: Icao,
    pub callsign: Option<String>,
    pub category: Option<String>,
    pub squawk: Option<String>,
    pub registration: Option<String>,
    pub is_military: bool,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_baro: Option<i32>,
    /// GNSS height from a TC 20-22 position.
    pub altitude_gnss: Option<i32>,
    pub gnss_baro_diff: Option<i32>,

    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub signal_level: Option<f64>,

    pub cpr_even: Option<CprFrame>,
    pub cpr_odd: Option<CprFrame>,

    pub first_seen: f64,
    pub last_seen: f64,
    pub message_count: u64,
}

impl AircraftState {
    pub fn new(icao: Icao, timestamp: f64) -> Self {
        AircraftState {
            icao,
            callsign: None,
            category: None,
            squawk: None,
            registration: icao::icao_to_n_number(&icao),
            is_military: icao::is_military(&icao, None),
            lat: None,
            lon: None,
            altitude_baro: None,
            altitude_gnss: None,
            gnss_baro_diff: None,
            speed_kts: None,
            heading_deg: None,
            vertical_rate_fpm: None,
            signal_level: None,
            cpr_even: None,
            cpr_odd: None,
            first_seen: timestamp,
            last_seen: timestamp,
            message_count: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn is_stale(&self, now: f64) -> bool {
        now - self.last_seen > STALE_TIMEOUT
    }

    /// Geometric height: reported directly, or baro plus the GNSS difference.
    pub fn altitude_geom(&self) -> Option<i32> {
        self.altitude_gnss.or_else(|| {
            self.altitude_baro
                .zip(self.gnss_baro_diff)
                .map(|(baro, diff)| baro + diff)
        })
    }

    /// Snapshot entry as a record, once position, callsign, altitude and
    /// speed are all resolved.
    pub fn to_record(&self) -> Option<AircraftRecord> {
        let (lat, lon) = self.lat.zip(self.lon)?;
        let callsign = self.callsign.clone()?;
        let altitude_geom = self.altitude_geom();
        self.altitude_baro.or(altitude_geom)?;
        let speed = self.speed_kts?;

        Some(AircraftRecord {
            icao_hex: Some(icao_to_string(&self.icao)),
            registration: self.registration.clone(),
            flight: Some(callsign),
            squawk: self.squawk.clone(),
            category: self.category.clone(),
            craft_type: None,
            lat: Some(lat),
            lon: Some(lon),
            altitude_baro: self.altitude_baro.map(f64::from),
            altitude_geom: altitude_geom.map(f64::from),
            ground_speed: Some(speed),
            track: self.heading_deg,
            vertical_rate: self.vertical_rate_fpm.map(f64::from),
            signal_level: self.signal_level,
            on_ground: None,
            nac_p: None,
            nac_v: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Built-in decoder: per-aircraft state with CPR frame pairing.
#[derive(Default)]
pub struct Tracker {
    aircraft: HashMap<Icao, AircraftState>,
    latest: f64,

    pub total_frames: u64,
    pub valid_frames: u64,
    pub position_decodes: u64,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame. Returns the decoded message, if any.
    pub fn update(&mut self, frame: &ModeFrame) -> Option<DecodedMsg> {
        self.total_frames += 1;
        let msg = decode(frame)?;
        self.valid_frames += 1;

        let icao = *msg.icao();
        let timestamp = msg.timestamp();
        self.latest = self.latest.max(timestamp);

        let ac = self
            .aircraft
            .entry(icao)
            .or_insert_with(|| AircraftState::new(icao, timestamp));
        ac.last_seen = ac.last_seen.max(timestamp);
        ac.message_count += 1;
        if frame.signal_level.is_some() {
            ac.signal_level = frame.signal_level;
        }

        match &msg {
            DecodedMsg::Identification(m) => {
                let cs = m.callsign.trim();
                if !cs.is_empty() {
                    if !ac.is_military {
                        ac.is_military = icao::is_military(&icao, Some(cs));
                    }
                    ac.callsign = Some(cs.to_string());
                }
                if m.category.is_some() {
                    ac.category = m.category.clone();
                }
            }
            DecodedMsg::Position(m) => {
                if let Some(alt) = m.altitude_ft {
                    if m.gnss_altitude {
                        ac.altitude_gnss = Some(alt);
                    } else {
                        ac.altitude_baro = Some(alt);
                    }
                }

                let cpr_frame = CprFrame {
                    lat: m.cpr_lat,
                    lon: m.cpr_lon,
                    odd: m.cpr_odd,
                    timestamp: m.timestamp,
                };
                if m.cpr_odd {
                    ac.cpr_odd = Some(cpr_frame);
                } else {
                    ac.cpr_even = Some(cpr_frame);
                }

                if let Some((lat, lon)) = try_cpr_decode(ac, &cpr_frame) {
                    ac.lat = Some(lat);
                    ac.lon = Some(lon);
                    self.position_decodes += 1;
                }
            }
            DecodedMsg::Velocity(m) => {
                if m.speed_kts.is_some() {
                    ac.speed_kts = m.speed_kts;
                }
                if m.heading_deg.is_some() {
                    ac.heading_deg = m.heading_deg;
                }
                if m.vertical_rate_fpm.is_some() {
                    ac.vertical_rate_fpm = m.vertical_rate_fpm;
                }
                if m.gnss_baro_diff_ft.is_some() {
                    ac.gnss_baro_diff = m.gnss_baro_diff_ft;
                }
            }
            DecodedMsg::Altitude(m) => {
                if m.altitude_ft.is_some() {
                    ac.altitude_baro = m.altitude_ft;
                }
            }
            DecodedMsg::Squawk(m) => {
                ac.squawk = Some(m.squawk.clone());
            }
        }

        Some(msg)
    }

    pub fn get(&self, icao: &Icao) -> Option<&AircraftState> {
        self.aircraft.get(icao)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Remove aircraft silent for longer than [`STALE_TIMEOUT`]. Returns the
    /// count removed.
    pub fn prune_stale(&mut self, now: f64) -> usize {
        let before = self.aircraft.len();
        self.aircraft.retain(|_, ac| !ac.is_stale(now));
        before - self.aircraft.len()
    }
}

impl ModeSDecoder for Tracker {
    fn process(&mut self, squitters: &[ModeFrame], comm_b: &[ModeFrame]) {
        for frame in squitters.iter().chain(comm_b) {
            self.update(frame);
        }
        let removed = self.prune_stale(self.latest);
        if removed > 0 {
            tracing::debug!(removed, tracked = self.aircraft.len(), "pruned stale aircraft");
        }
    }

    fn snapshot(&self) -> Vec<AircraftState> {
        let mut states: Vec<_> = self.aircraft.values().cloned().collect();
        states.sort_by_key(|ac| ac.icao);
        states
    }
}

/// Global decode from a fresh even/odd pair, else local decode of the newest
/// frame against the last known position.
fn try_cpr_decode(ac: &AircraftState, newest: &CprFrame) -> Option<(f64, f64)> {
    if let (Some(even), Some(odd)) = (&ac.cpr_even, &ac.cpr_odd) {
        if let Some(pos) = cpr::global_decode(even, odd) {
            return Some(pos);
        }
    }
    let (ref_lat, ref_lon) = ac.lat.zip(ac.lon)?;
    Some(cpr::local_decode(newest, ref_lat, ref_lon))
}

// ---------------------------------------------------------------------------
// Decoder adapter
// ---------------------------------------------------------------------------

/// Classifies frames into squitter and Comm-B batches and runs a decode pass
/// once more than one squitter is waiting.
pub struct DecoderAdapter<D: ModeSDecoder = Tracker> {
    decoder: D,
    cache: IcaoCache,
    squitters: Vec<ModeFrame>,
    comm_b: Vec<ModeFrame>,
    pub passes: u64,
    pub rejected_frames: u64,
}

impl DecoderAdapter<Tracker> {
    pub fn new() -> Self {
        Self::with_decoder(Tracker::new())
    }
}

impl Default for DecoderAdapter<Tracker> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ModeSDecoder> DecoderAdapter<D> {
    pub fn with_decoder(decoder: D) -> Self {
        DecoderAdapter {
            decoder,
            cache: IcaoCache::default(),
            squitters: Vec::new(),
            comm_b: Vec::new(),
            passes: 0,
            rejected_frames: 0,
        }
    }

    /// Classify one extracted frame captured at `timestamp`. Frames failing
    /// parity, of other formats, or from unconfirmed addresses are dropped
    /// and `false` is returned.
    pub fn accept(&mut self, frame: &RawFrame, timestamp: f64) -> bool {
        match classify(&frame.data, timestamp, frame.signal_level, &mut self.cache) {
            Some(f) if f.is_squitter() => self.squitters.push(f),
            Some(f) => self.comm_b.push(f),
            None => {
                self.rejected_frames += 1;
                return false;
            }
        }
        true
    }

    /// Run a decode pass if more than one squitter is batched. Returns the
    /// resolved records from the snapshot, or `None` when no pass ran.
    pub fn commit(&mut self) -> Option<Vec<AircraftRecord>> {
        if self.squitters.len() <= 1 {
            return None;
        }
        self.decoder.process(&self.squitters, &self.comm_b);
        let latest = self
            .squitters
            .iter()
            .chain(&self.comm_b)
            .map(|f| f.timestamp)
            .fold(f64::NEG_INFINITY, f64::max);
        self.cache.prune(latest);
        self.squitters.clear();
        self.comm_b.clear();
        self.passes += 1;

        Some(
            self.decoder
                .snapshot()
                .iter()
                .filter_map(AircraftState::to_record)
                .collect(),
        )
    }

    /// Frames waiting for the next pass.
    pub fn pending(&self) -> usize {
        self.squitters.len() + self.comm_b.len()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::classify_parity;
    use bytes::Bytes;

    const IDENT: &str = "8DA9EE47213B7CF954C820605AD9";
    const EVEN: &str = "8DA9EE475817C1396C22F4C98C5A";
    const ODD: &str = "8DA9EE475817C4CDCCD08242ABDA";
    const VELOCITY: &str = "8DA9EE4799003E06802403BA26E4";
    const ALT_REPLY: &str = "A00002BC000000000000008793E7";
    const N739UL: Icao = [0xA9, 0xEE, 0x47];

    fn raw(hex: &str) -> RawFrame {
        RawFrame {
            data: Bytes::from(hex_decode(hex).unwrap()),
            signal_level: None,
        }
    }

    fn parsed(hex: &str, t: f64) -> ModeFrame {
        classify_parity(&hex_decode(hex).unwrap(), t, Some(-12.5)).unwrap()
    }

    #[test]
    fn test_tracker_resolves_full_state() {
        let mut tracker = Tracker::new();
        let squitters = vec![
            parsed(IDENT, 0.0),
            parsed(VELOCITY, 0.5),
            parsed(EVEN, 1.0),
            parsed(ODD, 2.0),
        ];
        tracker.process(&squitters, &[]);

        let ac = tracker.get(&N739UL).unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("N739UL"));
        assert_eq!(ac.category.as_deref(), Some("A1"));
        assert_eq!(ac.registration.as_deref(), Some("N739UL"));
        assert!(!ac.is_military);
        assert!((ac.lat.unwrap() - 37.836449).abs() < 1e-5);
        assert!((ac.lon.unwrap() + 122.030281).abs() < 1e-5);
        assert_eq!(ac.altitude_baro, Some(3700));
        assert_eq!(ac.altitude_geom(), Some(3750));
        assert_eq!(ac.vertical_rate_fpm, Some(512));
        assert_eq!(ac.signal_level, Some(-12.5));
        assert_eq!(ac.message_count, 4);
        assert_eq!(tracker.position_decodes, 1);
    }

    #[test]
    fn test_local_decode_after_first_fix() {
        let mut tracker = Tracker::new();
        tracker.update(&parsed(EVEN, 1.0));
        tracker.update(&parsed(ODD, 2.0));
        // far outside the pairing window: only local decode can apply
        tracker.update(&parsed(EVEN, 30.0));
        let ac = tracker.get(&N739UL).unwrap();
        assert!((ac.lat.unwrap() - 37.8365).abs() < 1e-3);
        assert_eq!(tracker.position_decodes, 2);
    }

    #[test]
    fn test_no_position_without_pair() {
        let mut tracker = Tracker::new();
        tracker.update(&parsed(EVEN, 1.0));
        assert!(!tracker.get(&N739UL).unwrap().has_position());
        assert_eq!(tracker.position_decodes, 0);
    }

    #[test]
    fn test_prune_stale() {
        let mut tracker = Tracker::new();
        tracker.update(&parsed(IDENT, 0.0));
        assert_eq!(tracker.prune_stale(30.0), 0);
        assert_eq!(tracker.prune_stale(61.0), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_incomplete_state_has_no_record() {
        let mut ac = AircraftState::new(N739UL, 0.0);
        ac.lat = Some(37.8);
        ac.lon = Some(-122.0);
        ac.altitude_baro = Some(3700);
        ac.speed_kts = Some(80.0);
        assert!(ac.to_record().is_none());

        ac.callsign = Some("N739UL".into());
        let record = ac.to_record().unwrap();
        assert_eq!(record.icao_hex.as_deref(), Some("A9EE47"));
        assert_eq!(record.altitude_geom, None);
    }

    #[test]
    fn test_adapter_batches_and_emits() {
        let mut adapter = DecoderAdapter::new();

        assert!(adapter.accept(&raw(IDENT), 0.0));
        assert_eq!(adapter.commit(), None);
        assert!(adapter.accept(&raw(VELOCITY), 0.5));
        assert_eq!(adapter.commit(), Some(Vec::new()));
        assert_eq!(adapter.pending(), 0);

        assert!(adapter.accept(&raw(EVEN), 1.0));
        assert_eq!(adapter.commit(), None);
        assert!(adapter.accept(&raw(ODD), 2.0));
        let records = adapter.commit().unwrap();
        assert_eq!(records.len(), 1);

        let rec = &records[0];
        assert_eq!(rec.icao_hex.as_deref(), Some("A9EE47"));
        assert_eq!(rec.flight.as_deref(), Some("N739UL"));
        assert_eq!(rec.registration.as_deref(), Some("N739UL"));
        assert_eq!(rec.category.as_deref(), Some("A1"));
        assert_eq!(rec.altitude_baro, Some(3700.0));
        assert_eq!(rec.altitude_geom, Some(3750.0));
        assert!((rec.ground_speed.unwrap() - 79.51).abs() < 0.01);
        assert!((rec.track.unwrap() - 50.10).abs() < 0.01);
        assert_eq!(adapter.passes, 2);
    }

    #[test]
    fn test_adapter_comm_b_needs_confirmed_address() {
        let mut adapter = DecoderAdapter::new();
        assert!(!adapter.accept(&raw(ALT_REPLY), 0.0));
        assert_eq!(adapter.rejected_frames, 1);

        assert!(adapter.accept(&raw(IDENT), 1.0));
        assert!(adapter.accept(&raw(ALT_REPLY), 1.5));
        assert_eq!(adapter.pending(), 2);

        assert!(adapter.accept(&raw(VELOCITY), 2.0));
        adapter.commit().unwrap();
        let ac = adapter.decoder().get(&N739UL).unwrap();
        assert_eq!(ac.altitude_baro, Some(3700));
    }

    #[test]
    fn test_commit_evicts_expired_addresses() {
        let mut adapter = DecoderAdapter::new();
        adapter.cache.register([0x4B, 0x17, 0xE5], 0.0);
        assert!(adapter.accept(&raw(IDENT), 0.5));
        assert_eq!(adapter.cache.len(), 2);

        assert!(adapter.accept(&raw(EVEN), 100.0));
        assert!(adapter.accept(&raw(ODD), 101.0));
        adapter.commit().unwrap();
        assert_eq!(adapter.cache.len(), 1);
        assert!(adapter.cache.is_known(&N739UL, 101.0));
    }

    #[test]
    fn test_adapter_drops_corrupt_frames() {
        let mut adapter = DecoderAdapter::new();
        let mut bad = hex_decode(IDENT).unwrap();
        bad[6] ^= 0x01;
        let frame = RawFrame {
            data: Bytes::from(bad),
            signal_level: None,
        };
        assert!(!adapter.accept(&frame, 0.0));
        assert_eq!(adapter.pending(), 0);
    }
}
