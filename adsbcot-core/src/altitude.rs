//! Barometric/geometric altitude reconciliation.
//!
//! Many feeds deliver pressure altitude on every update but geometric height
//! only occasionally. The cache remembers the last paired sample per aircraft
//! so a baro-only update can still yield a geometric estimate:
//! `estimate = ref_geom + (baro - ref_baro)`.

use std::collections::HashMap;

/// Reconciled altitude for one record. Both fields are absent when no
/// estimate applies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AltitudeFields {
    /// Estimated geometric altitude, feet.
    pub estimated_geom: Option<f64>,
    /// Barometric drift since the reference sample, feet.
    pub baro_offset: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct PairedSample {
    baro: f64,
    geom: f64,
    seen: f64,
}

/// Last paired altitude sample per ICAO hex.
#[derive(Debug, Default)]
pub struct AltitudeCache {
    /// Entries older than this many seconds are ignored and evicted.
    ttl: Option<f64>,
    samples: HashMap<String, PairedSample>,
}

impl AltitudeCache {
    /// `ttl` of `None` keeps samples for the life of the process.
    pub fn new(ttl: Option<f64>) -> Self {
        AltitudeCache {
            ttl,
            samples: HashMap::new(),
        }
    }

    /// Reconcile one observation taken at `now` (Unix seconds).
    ///
    /// - no baro (unknown or on ground): nothing
    /// - baro and geom: refresh the reference, nothing to estimate
    /// - baro only with a live reference: estimate from the offset
    pub fn reconcile(
        &mut self,
        icao_hex: &str,
        alt_baro: Option<f64>,
        alt_geom: Option<f64>,
        now: f64,
    ) -> AltitudeFields {
        let Some(baro) = alt_baro else {
            return AltitudeFields::default();
        };

        if let Some(geom) = alt_geom {
            self.samples.insert(
                icao_hex.to_string(),
                PairedSample {
                    baro,
                    geom,
                    seen: now,
                },
            );
            return AltitudeFields::default();
        }

        let Some(reference) = self.samples.get(icao_hex).copied() else {
            return AltitudeFields::default();
        };
        if self.is_expired(&reference, now) {
            self.samples.remove(icao_hex);
            return AltitudeFields::default();
        }

        let offset = baro - reference.baro;
        AltitudeFields {
            estimated_geom: Some(reference.geom + offset),
            baro_offset: Some(offset),
        }
    }

    fn is_expired(&self, sample: &PairedSample, now: f64) -> bool {
        self.ttl.is_some_and(|ttl| now - sample.seen > ttl)
    }

    /// Drop expired references. Returns the number removed.
    pub fn prune(&mut self, now: f64) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.samples.len();
        self.samples.retain(|_, s| now - s.seen <= ttl);
        before - self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paired_then_baro_only() {
        let mut cache = AltitudeCache::new(None);
        assert_eq!(
            cache.reconcile("A9EE47", Some(3700.0), Some(3750.0), 0.0),
            AltitudeFields::default()
        );

        let fields = cache.reconcile("A9EE47", Some(3800.0), None, 1.0);
        assert_eq!(fields.baro_offset, Some(100.0));
        assert_eq!(fields.estimated_geom, Some(3850.0));
    }

    #[test]
    fn test_no_reference_no_estimate() {
        let mut cache = AltitudeCache::new(None);
        cache.reconcile("A9EE47", Some(3700.0), Some(3750.0), 0.0);
        let fields = cache.reconcile("AC82EC", Some(3800.0), None, 1.0);
        assert_eq!(fields, AltitudeFields::default());
    }

    #[test]
    fn test_missing_baro_leaves_cache_alone() {
        let mut cache = AltitudeCache::new(None);
        let fields = cache.reconcile("A9EE47", None, Some(3750.0), 0.0);
        assert_eq!(fields, AltitudeFields::default());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reference_refreshed() {
        let mut cache = AltitudeCache::new(None);
        cache.reconcile("A9EE47", Some(3700.0), Some(3750.0), 0.0);
        cache.reconcile("A9EE47", Some(5000.0), Some(5100.0), 1.0);
        let fields = cache.reconcile("A9EE47", Some(4900.0), None, 2.0);
        assert_eq!(fields.estimated_geom, Some(5000.0));
        assert_eq!(fields.baro_offset, Some(-100.0));
    }

    #[test]
    fn test_expired_reference_ignored() {
        let mut cache = AltitudeCache::new(Some(60.0));
        cache.reconcile("A9EE47", Some(3700.0), Some(3750.0), 0.0);
        let fields = cache.reconcile("A9EE47", Some(3800.0), None, 61.0);
        assert_eq!(fields, AltitudeFields::default());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prune() {
        let mut cache = AltitudeCache::new(Some(10.0));
        cache.reconcile("A9EE47", Some(1.0), Some(2.0), 0.0);
        cache.reconcile("AC82EC", Some(1.0), Some(2.0), 5.0);
        assert_eq!(cache.prune(12.0), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(AltitudeCache::new(None).prune(1e9), 0);
    }
}
