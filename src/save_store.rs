// =============================================================================
// SaveStore — opaque-code -> snapshot document, with named preset slots (C9)
// =============================================================================
//
// Reference implementation: a single map guarded by one mutex (spec.md §5
// "or a single map mutex for the in-process reference"). The snapshot body
// is a closed schema (`Snapshot`) rather than a free-form object — unknown
// fields are rejected on load (spec.md §9 Design Note, "Dynamic-typed
// snapshots").
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SaveError;
use crate::mode::ModeState;
use crate::portfolio::{Portfolio, Trade};
use crate::price_engine::PriceState;
use crate::session::Config;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 9;
const MAX_CREATE_ATTEMPTS: usize = 100;

/// Closed structural schema for a persisted Session snapshot (spec.md §4.7,
/// §6 "Snapshot format"). Unknown fields fail to deserialize by design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub config: Config,
    pub portfolio: Portfolio,
    pub price_states: BTreeMap<String, PriceState>,
    pub simulated_date: NaiveDate,
    pub trades: Vec<Trade>,
    pub mode_state: ModeState,
    pub start_time: DateTime<Utc>,
    pub initial_capital: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetSlot {
    pub snapshot: Snapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetMeta {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveRecord {
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_preset: Option<String>,
    pub presets: Vec<PresetMeta>,
}

#[derive(Debug, Clone)]
struct SaveEntry {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    active_preset: Option<String>,
    presets: BTreeMap<String, PresetSlot>,
}

pub struct SaveStore {
    entries: Mutex<std::collections::HashMap<String, SaveEntry>>,
}

impl SaveStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Generate a fresh, unused 9-char `[A-Z0-9]` code.
    pub fn create_code<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String, SaveError> {
        let mut entries = self.entries.lock();
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let candidate = random_code(rng);
            if !entries.contains_key(&candidate) {
                let now = Utc::now();
                entries.insert(
                    candidate.clone(),
                    SaveEntry {
                        created_at: now,
                        updated_at: now,
                        active_preset: None,
                        presets: BTreeMap::new(),
                    },
                );
                return Ok(candidate);
            }
        }
        Err(SaveError::CollisionExhausted)
    }

    pub fn put(
        &self,
        code: &str,
        preset_name: &str,
        snapshot: Snapshot,
    ) -> Result<(), SaveError> {
        let code = normalize(code);
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&code).ok_or_else(|| SaveError::UnknownCode(code.clone()))?;
        let now = Utc::now();
        let slot = entry
            .presets
            .entry(preset_name.to_string())
            .or_insert_with(|| PresetSlot {
                snapshot: snapshot.clone(),
                created_at: now,
                updated_at: now,
            });
        slot.snapshot = snapshot;
        slot.updated_at = now;
        entry.active_preset = Some(preset_name.to_string());
        entry.updated_at = now;
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<SaveRecord, SaveError> {
        let code = normalize(code);
        let entries = self.entries.lock();
        let entry = entries.get(&code).ok_or_else(|| SaveError::UnknownCode(code.clone()))?;
        Ok(SaveRecord {
            code: code.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            active_preset: entry.active_preset.clone(),
            presets: entry
                .presets
                .iter()
                .map(|(name, slot)| PresetMeta {
                    name: name.clone(),
                    created_at: slot.created_at,
                    updated_at: slot.updated_at,
                })
                .collect(),
        })
    }

    pub fn get_preset(&self, code: &str, preset_name: &str) -> Result<Snapshot, SaveError> {
        let code = normalize(code);
        let entries = self.entries.lock();
        let entry = entries.get(&code).ok_or_else(|| SaveError::UnknownCode(code.clone()))?;
        entry
            .presets
            .get(preset_name)
            .map(|slot| slot.snapshot.clone())
            .ok_or_else(|| SaveError::UnknownPreset {
                code: code.clone(),
                preset: preset_name.to_string(),
            })
    }

    /// Remove a preset; if it was active, the new active preset is the
    /// lexicographically smallest of those remaining, or `None`
    /// (spec.md §4.7).
    pub fn delete_preset(&self, code: &str, preset_name: &str) -> Result<(), SaveError> {
        let code = normalize(code);
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&code).ok_or_else(|| SaveError::UnknownCode(code.clone()))?;
        if entry.presets.remove(preset_name).is_none() {
            return Err(SaveError::UnknownPreset {
                code: code.clone(),
                preset: preset_name.to_string(),
            });
        }
        if entry.active_preset.as_deref() == Some(preset_name) {
            entry.active_preset = entry.presets.keys().next().cloned();
        }
        entry.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for SaveStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(code: &str) -> String {
    code.to_ascii_uppercase()
}

fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::mode::Mode;
    use crate::portfolio::Portfolio;
    use crate::price_engine::{Difficulty, RiskLevel};
    use std::collections::BTreeMap as Map;

    fn sample_snapshot() -> Snapshot {
        let cfg = Config::new(25_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Classic, 0, true);
        let mut price_states = Map::new();
        for inst in catalog::CATALOG.iter().take(3) {
            price_states.insert(inst.symbol.clone(), PriceState::new(inst.base_price));
        }
        Snapshot {
            config: cfg.clone(),
            portfolio: Portfolio::new(cfg.starting_capital),
            price_states,
            simulated_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            trades: Vec::new(),
            mode_state: ModeState::Classic,
            start_time: Utc::now(),
            initial_capital: cfg.starting_capital,
        }
    }

    #[test]
    fn create_put_get_round_trips() {
        let store = SaveStore::new();
        let mut rng = rand::thread_rng();
        let code = store.create_code(&mut rng).unwrap();
        let snap = sample_snapshot();
        store.put(&code, "slot1", snap.clone()).unwrap();
        let fetched = store.get_preset(&code, "slot1").unwrap();
        assert_eq!(fetched, snap);

        let record = store.get(&code).unwrap();
        assert_eq!(record.active_preset, Some("slot1".to_string()));
        assert_eq!(record.presets.len(), 1);
    }

    #[test]
    fn delete_active_preset_falls_back_lexicographically() {
        let store = SaveStore::new();
        let mut rng = rand::thread_rng();
        let code = store.create_code(&mut rng).unwrap();
        store.put(&code, "zeta", sample_snapshot()).unwrap();
        store.put(&code, "alpha", sample_snapshot()).unwrap();
        assert_eq!(store.get(&code).unwrap().active_preset, Some("alpha".to_string()));

        store.delete_preset(&code, "alpha").unwrap();
        assert_eq!(store.get(&code).unwrap().active_preset, Some("zeta".to_string()));
    }

    #[test]
    fn delete_last_preset_clears_active() {
        let store = SaveStore::new();
        let mut rng = rand::thread_rng();
        let code = store.create_code(&mut rng).unwrap();
        store.put(&code, "only", sample_snapshot()).unwrap();
        store.delete_preset(&code, "only").unwrap();
        assert_eq!(store.get(&code).unwrap().active_preset, None);
    }

    #[test]
    fn delete_preset_is_idempotent() {
        let store = SaveStore::new();
        let mut rng = rand::thread_rng();
        let code = store.create_code(&mut rng).unwrap();
        store.put(&code, "only", sample_snapshot()).unwrap();
        store.delete_preset(&code, "only").unwrap();
        let err = store.delete_preset(&code, "only").unwrap_err();
        assert!(matches!(err, SaveError::UnknownPreset { .. }));
    }

    #[test]
    fn unknown_code_is_not_found() {
        let store = SaveStore::new();
        let err = store.get("ZZZZZZZZZ").unwrap_err();
        assert_eq!(err, SaveError::UnknownCode("ZZZZZZZZZ".to_string()));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let store = SaveStore::new();
        let mut rng = rand::thread_rng();
        let code = store.create_code(&mut rng).unwrap();
        store.put(&code, "slot", sample_snapshot()).unwrap();
        let lower = code.to_ascii_lowercase();
        assert!(store.get(&lower).is_ok());
    }
}
