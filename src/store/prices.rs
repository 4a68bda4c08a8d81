use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{DEFAULT_MEMORY_GB, DEFAULT_STORAGE_GB, SpecKey, processor_for};
use crate::clock::now_rfc3339;
use crate::error::{PersistenceError, RejectReason};
use crate::estimate::{MarketEstimate, buyout_price};

use super::{read_json, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    // fewer samples than this are kept but flagged as fallback
    pub min_samples: usize,
    pub min_median: u64,
    pub margin: u64,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_median: 10_000,
            margin: 12_000,
        }
    }
}

// -------------------------
// Records
// -------------------------

/// `min_price` is the trimmed market floor and `max_price` the trimmed ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStatRecord {
    pub model_name: String,
    pub processor: String,
    pub ram: u32,
    pub ssd: u32,
    pub min_price: u64,
    pub max_price: u64,
    pub median_price: u64,
    pub buyout_price: u64,
    pub samples_count: usize,
    pub updated_at: String,
    #[serde(default)]
    pub fallback: bool,
}

impl PriceStatRecord {
    pub fn key(&self) -> SpecKey {
        SpecKey::new(self.model_name.clone(), self.ram, self.ssd)
    }

    /// Equal in everything but `updated_at`.
    pub fn same_stats(&self, other: &PriceStatRecord) -> bool {
        let mut other = other.clone();
        other.updated_at.clone_from(&self.updated_at);
        *self == other
    }

    pub fn from_estimate(
        key: &SpecKey,
        processor: &str,
        est: &MarketEstimate,
        updated_at: &str,
        policy: &MergePolicy,
    ) -> Self {
        Self {
            model_name: key.model_name.clone(),
            processor: processor.to_string(),
            ram: key.memory_gb,
            ssd: key.storage_gb,
            min_price: est.floor,
            max_price: est.ceiling,
            median_price: est.median,
            buyout_price: est.buyout,
            samples_count: est.samples,
            updated_at: updated_at.to_string(),
            fallback: est.samples < policy.min_samples,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialPriceStat {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub ram: Option<u32>,
    #[serde(default)]
    pub ssd: Option<u32>,
    #[serde(default)]
    pub min_price: Option<u64>,
    #[serde(default)]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub median_price: Option<u64>,
    #[serde(default)]
    pub buyout_price: Option<u64>,
    #[serde(default)]
    pub samples_count: Option<usize>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PartialPriceStat {
    pub fn repair(self, policy: &MergePolicy, now: &str) -> Result<PriceStatRecord, RejectReason> {
        let model_name = self
            .model_name
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or(RejectReason::MissingModel)?;
        let median = self.median_price.ok_or(RejectReason::MissingMedian)?;
        if median < policy.min_median {
            return Err(RejectReason::MedianTooLow {
                median,
                floor: policy.min_median,
            });
        }

        let min_price = self.min_price.unwrap_or(median * 85 / 100).min(median);
        let max_price = self.max_price.unwrap_or(median * 115 / 100).max(median);
        let samples_count = self.samples_count.unwrap_or(0);

        Ok(PriceStatRecord {
            processor: self
                .processor
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| processor_for(&model_name)),
            model_name,
            ram: self.ram.unwrap_or(DEFAULT_MEMORY_GB),
            ssd: self.ssd.unwrap_or(DEFAULT_STORAGE_GB),
            min_price,
            max_price,
            median_price: median,
            buyout_price: self
                .buyout_price
                .unwrap_or_else(|| buyout_price(min_price, policy.margin)),
            samples_count,
            updated_at: self
                .updated_at
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| now.to_string()),
            fallback: samples_count < policy.min_samples,
        })
    }
}

impl From<PriceStatRecord> for PartialPriceStat {
    fn from(r: PriceStatRecord) -> Self {
        Self {
            model_name: Some(r.model_name),
            processor: Some(r.processor),
            ram: Some(r.ram),
            ssd: Some(r.ssd),
            min_price: Some(r.min_price),
            max_price: Some(r.max_price),
            median_price: Some(r.median_price),
            buyout_price: Some(r.buyout_price),
            samples_count: Some(r.samples_count),
            updated_at: Some(r.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

#[derive(Serialize)]
struct PriceFileOut<'a> {
    updated_at: String,
    stats: Vec<&'a PriceStatRecord>,
}

#[derive(Deserialize)]
struct PriceFileIn {
    #[serde(default)]
    stats: Vec<PartialPriceStat>,
}

// -------------------------
// Database
// -------------------------

#[derive(Debug, Clone)]
pub struct PriceDatabase {
    records: BTreeMap<SpecKey, PriceStatRecord>,
    policy: MergePolicy,
    dirty: bool,
}

impl PriceDatabase {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            records: BTreeMap::new(),
            policy,
            dirty: false,
        }
    }

    /// A missing file is an empty database; duplicate keys keep the last entry.
    pub fn load(path: &Path, policy: MergePolicy) -> Result<Self, PersistenceError> {
        let mut db = Self::new(policy);
        let Some(file) = read_json::<PriceFileIn>(path)? else {
            debug!("[prices] {} not found, starting empty", path.display());
            return Ok(db);
        };
        let now = now_rfc3339();
        for raw in file.stats {
            match raw.repair(&policy, &now) {
                Ok(rec) => {
                    db.records.insert(rec.key(), rec);
                }
                Err(reason) => warn!("[prices] dropping stored record: {reason}"),
            }
        }
        Ok(db)
    }

    pub fn upsert(
        &mut self,
        record: impl Into<PartialPriceStat>,
    ) -> Result<UpsertOutcome, RejectReason> {
        let rec = record.into().repair(&self.policy, &now_rfc3339())?;
        let key = rec.key();
        // a fresh timestamp alone does not dirty the file
        let outcome = match self.records.get(&key) {
            Some(existing) if existing.same_stats(&rec) => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        self.records.insert(key, rec);
        self.dirty = true;
        Ok(outcome)
    }

    pub fn get(&self, key: &SpecKey) -> Option<&PriceStatRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &PriceStatRecord> {
        self.records.values()
    }

    pub fn models(&self) -> Vec<String> {
        self.records
            .keys()
            .map(|k| k.model_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Case-insensitive containment either way, ignoring ram and ssd.
    pub fn fuzzy_model(&self, model_name: &str) -> Vec<&PriceStatRecord> {
        let wanted = model_name.to_lowercase();
        self.records
            .values()
            .filter(|r| {
                let have = r.model_name.to_lowercase();
                have.contains(&wanted) || wanted.contains(&have)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        let updated_at = self
            .records
            .values()
            .map(|r| r.updated_at.as_str())
            .max()
            .map(str::to_string)
            .unwrap_or_else(now_rfc3339);
        let out = PriceFileOut {
            updated_at,
            stats: self.records.values().collect(),
        };
        Ok(serde_json::to_string_pretty(&out)?)
    }

    pub fn save(&mut self, path: &Path) -> Result<(), PersistenceError> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())?;
        self.dirty = false;
        Ok(())
    }
}
