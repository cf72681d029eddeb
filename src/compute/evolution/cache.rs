//! Fitness cache: memoized evaluation results keyed by parameter vector.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{Metrics, ParamValue, ParamVector};

/// Canonical cache key of a parameter vector.
///
/// The key is the JSON object of the vector with names in sorted order, so
/// identical vectors always produce identical keys regardless of how they
/// were assembled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the canonical key of a parameter vector.
    pub fn from_params(params: &ParamVector) -> Self {
        let normalized: ParamVector = params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    // -0.0 and 0.0 must collide.
                    ParamValue::Number(v) if *v == 0.0 => ParamValue::Number(0.0),
                    other => other.clone(),
                };
                (name.clone(), value)
            })
            .collect();
        // A map of strings to numbers/strings always serializes.
        Self(serde_json::to_string(&normalized).unwrap_or_default())
    }

    /// Recover the parameter vector from the key.
    pub fn parse(&self) -> Result<ParamVector, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A memoized evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Signed fitness of the primary objective; negative infinity when invalid.
    #[serde(with = "crate::schema::float")]
    pub fitness: f64,
    /// Raw value of the primary objective's metric (zero on failure).
    pub metric_value: f64,
    /// Unit of the primary metric.
    #[serde(default)]
    pub unit: Option<String>,
    /// All raw metrics; absent when the evaluation failed.
    #[serde(default)]
    pub raw_metrics: Option<Metrics>,
}

/// Map from canonical parameter key to evaluation result.
///
/// Entries live for the whole optimization session and are never cleared
/// between generations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FitnessCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl FitnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for a parameter vector.
    pub fn get(&self, params: &ParamVector) -> Option<&CacheEntry> {
        self.entries.get(&CacheKey::from_params(params))
    }

    pub fn get_by_key(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous one for the same vector.
    pub fn insert(&mut self, params: &ParamVector, entry: CacheEntry) {
        self.entries.insert(CacheKey::from_params(params), entry);
    }

    pub fn insert_key(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn contains(&self, params: &ParamVector) -> bool {
        self.entries.contains_key(&CacheKey::from_params(params))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save the cache as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// Load a cache previously written by [`FitnessCache::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl FromIterator<(CacheKey, CacheEntry)> for FitnessCache {
    fn from_iter<T: IntoIterator<Item = (CacheKey, CacheEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
