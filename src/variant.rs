//! Variant dimensions: sets of values per type (locale, browser,
//! connection-type, skin), request-time fallback resolution and
//! combination enumeration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// Separator between hierarchical variant value segments (locale subtags).
const HIERARCHY_SEPARATOR: char = '_';

// ============================================================================
// VariantSet
// ============================================================================

/// The available values for one variation dimension, plus the value used
/// when a request matches none of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSet {
    /// Variant type name, e.g. "locale" or "skin"
    #[serde(rename = "type")]
    pub type_name: String,
    /// Ordered list of available values
    pub values: Vec<String>,
    /// Default value, used when resolution falls through
    #[serde(default)]
    pub default: String,
}

impl VariantSet {
    /// Build a variant set, rejecting a non-empty default that is not a
    /// member of the value list.
    pub fn new(
        type_name: impl Into<String>,
        default: impl Into<String>,
        values: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let type_name = type_name.into();
        let default = default.into();
        if !default.is_empty() && !values.iter().any(|v| v == &default) {
            return Err(ConfigError::InvalidVariantDefault {
                variant_type: type_name,
                default,
            });
        }
        Ok(Self {
            type_name,
            values,
            default,
        })
    }

    /// Pure membership test.
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Merge another set for the same dimension, keeping value order and
    /// this set's default.
    pub fn merge(&mut self, other: &VariantSet) {
        for value in &other.values {
            if !self.contains(value) {
                self.values.push(value.clone());
            }
        }
        if self.default.is_empty() {
            self.default = other.default.clone();
        }
    }
}

// ============================================================================
// Request-time resolution
// ============================================================================

/// How a dimension's raw request value maps onto the declared set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Exact match, then progressively strip trailing `_`-segments
    /// (locale-style: `en_US_POSIX` -> `en_US` -> `en`), then default.
    #[default]
    Hierarchical,
    /// Exact match or default. For flat value spaces (browser,
    /// connection-type) where partial values are meaningless.
    Flat,
}

/// Resolve a requested raw value against a variant set.
///
/// Exact match wins; hierarchical values fall back one stripped segment at
/// a time; anything else lands on the set's default.
pub fn resolve_variant(requested: &str, set: &VariantSet, policy: FallbackPolicy) -> String {
    if set.contains(requested) {
        return requested.to_string();
    }

    if policy == FallbackPolicy::Hierarchical {
        let mut candidate = requested;
        while let Some(idx) = candidate.rfind(HIERARCHY_SEPARATOR) {
            candidate = &candidate[..idx];
            if set.contains(candidate) {
                return candidate.to_string();
            }
        }
    }

    set.default.clone()
}

/// Pick the fallback policy for a dimension name. Locale and skin values
/// are hierarchical; browser and connection-type spaces are flat.
pub fn policy_for(type_name: &str) -> FallbackPolicy {
    match type_name {
        "browser" | "connection-type" => FallbackPolicy::Flat,
        _ => FallbackPolicy::Hierarchical,
    }
}

// ============================================================================
// VariantMap
// ============================================================================

/// One concrete (dimension -> value) assignment. Ordered so its canonical
/// key string is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct VariantMap(BTreeMap<String, String>);

impl VariantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, type_name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(type_name.into(), value.into());
    }

    pub fn get(&self, type_name: &str) -> Option<&str> {
        self.0.get(type_name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Canonical suffix embedded in cache keys and production URLs.
    /// Empty when every dimension sits at its default (or no dimensions).
    ///
    /// `{locale: en_US, skin: dark}` with default locale `en` and default
    /// skin `light` yields `dark_en_US`; all-defaults yields ``.
    pub fn variant_suffix(&self, declared: &BTreeMap<String, VariantSet>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for (type_name, value) in &self.0 {
            let is_default = declared
                .get(type_name)
                .is_some_and(|set| set.default == *value);
            if !is_default && !value.is_empty() {
                parts.push(value);
            }
        }
        parts.join("_")
    }

    /// Stable key for store lookups, including default-valued dimensions.
    pub fn cache_key(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        parts.join("@")
    }
}

impl fmt::Display for VariantMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

impl FromIterator<(String, String)> for VariantMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Combination enumeration
// ============================================================================

/// Cartesian product of every declared dimension's values, one
/// [`VariantMap`] per assignment, in deterministic order. The all-defaults
/// combination is always present, even with no declared dimensions (the
/// empty map).
pub fn combinations(declared: &BTreeMap<String, VariantSet>) -> Vec<VariantMap> {
    let mut combos = vec![VariantMap::new()];

    for (type_name, set) in declared {
        let mut next = Vec::with_capacity(combos.len() * set.values.len().max(1));
        let values: Vec<&str> = if set.values.is_empty() {
            vec![set.default.as_str()]
        } else {
            set.values.iter().map(String::as_str).collect()
        };
        for combo in &combos {
            for value in &values {
                let mut extended = combo.clone();
                extended.insert(type_name.clone(), (*value).to_string());
                next.push(extended);
            }
        }
        combos = next;
    }

    // The all-defaults assignment must always be present, even when a
    // dimension's default sits outside its value list.
    let mut defaults = VariantMap::new();
    for (type_name, set) in declared {
        defaults.insert(type_name.clone(), set.default.clone());
    }
    if !combos.contains(&defaults) {
        combos.insert(0, defaults);
    }

    combos
}

/// Resolve the full requested raw map against the declared dimensions,
/// producing the best-matching concrete combination.
pub fn resolve_all(
    requested: &BTreeMap<String, String>,
    declared: &BTreeMap<String, VariantSet>,
) -> VariantMap {
    let mut resolved = VariantMap::new();
    for (type_name, set) in declared {
        let value = match requested.get(type_name) {
            Some(raw) => resolve_variant(raw, set, policy_for(type_name)),
            None => set.default.clone(),
        };
        resolved.insert(type_name.clone(), value);
    }
    resolved
}
