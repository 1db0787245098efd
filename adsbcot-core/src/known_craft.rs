//! Known-craft registry: operator-maintained overrides for specific aircraft.
//!
//! Loaded once from a CSV with a header row. Recognized columns (any case,
//! any order): `DOMAIN`, `AGENCY`, `REG`, `CALLSIGN`, `TYPE`, `MODEL`, `HEX`,
//! `COT`, `ICON`. Unknown and blank columns are ignored; a repeated column
//! keeps its first non-empty value.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::cot::Rejection;
use crate::record::{AircraftRecord, TISB_MARKER};
use crate::types::{CotError, Result};

/// One registry row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownCraft {
    pub domain: Option<String>,
    pub agency: Option<String>,
    pub reg: Option<String>,
    pub callsign: Option<String>,
    pub craft_type: Option<String>,
    pub model: Option<String>,
    pub hex: Option<String>,
    /// CoT type override.
    pub cot: Option<String>,
    /// Icon set path.
    pub icon: Option<String>,
}

/// Immutable registry indexed by ICAO hex. Rows without a hex are kept but
/// never match.
#[derive(Debug, Default)]
pub struct KnownCraftRegistry {
    entries: Vec<KnownCraft>,
    by_hex: HashMap<String, usize>,
}

fn normalize_key(s: &str) -> String {
    s.trim().trim_start_matches(TISB_MARKER).to_uppercase()
}

impl KnownCraftRegistry {
    pub fn from_entries(entries: Vec<KnownCraft>) -> Self {
        let mut by_hex = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(hex) = &entry.hex {
                by_hex.entry(normalize_key(hex)).or_insert(idx);
            }
        }
        KnownCraftRegistry { entries, by_hex }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let registry = Self::parse(&text)?;
        info!(
            path = %path.display(),
            entries = registry.len(),
            indexed = registry.by_hex.len(),
            "loaded known craft"
        );
        Ok(registry)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| CotError::KnownCraft("missing header row".into()))?;
        let columns: Vec<String> = split_csv_line(header)
            .iter()
            .map(|c| c.trim().to_uppercase())
            .collect();
        if !columns.iter().any(|c| c == "HEX") {
            return Err(CotError::KnownCraft("header needs a HEX column".into()));
        }

        let entries = lines
            .map(|line| {
                let mut entry = KnownCraft::default();
                for (column, value) in columns.iter().zip(split_csv_line(line)) {
                    let slot = match column.as_str() {
                        "DOMAIN" => &mut entry.domain,
                        "AGENCY" => &mut entry.agency,
                        "REG" => &mut entry.reg,
                        "CALLSIGN" => &mut entry.callsign,
                        "TYPE" => &mut entry.craft_type,
                        "MODEL" => &mut entry.model,
                        "HEX" => &mut entry.hex,
                        "COT" => &mut entry.cot,
                        "ICON" => &mut entry.icon,
                        _ => continue,
                    };
                    let value = value.trim();
                    if slot.is_none() && !value.is_empty() {
                        *slot = Some(value.to_string());
                    }
                }
                entry
            })
            .collect();

        Ok(Self::from_entries(entries))
    }

    /// Exact, case-insensitive match on the ICAO hex. The TIS-B marker is
    /// ignored.
    pub fn lookup(&self, icao_hex: &str) -> Option<&KnownCraft> {
        self.by_hex
            .get(&normalize_key(icao_hex))
            .map(|&idx| &self.entries[idx])
    }

    /// The entry for a record's ICAO hex. Registration and flight are never
    /// consulted.
    pub fn resolve(&self, record: &AircraftRecord) -> Option<&KnownCraft> {
        record.icao_hex.as_deref().and_then(|hex| self.lookup(hex))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Apply the allow-list policy.
///
/// Without a registry every record passes with no override. With one, an
/// unmatched record is rejected unless `include_all_craft` is set.
pub fn admit<'a>(
    registry: Option<&'a KnownCraftRegistry>,
    record: &AircraftRecord,
    include_all_craft: bool,
) -> std::result::Result<Option<&'a KnownCraft>, Rejection> {
    let Some(registry) = registry else {
        return Ok(None);
    };
    match registry.resolve(record) {
        Some(entry) => Ok(Some(entry)),
        None if include_all_craft => Ok(None),
        None => Err(Rejection::UnknownCraft),
    }
}

/// Split one CSV line, honoring double-quoted fields and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
