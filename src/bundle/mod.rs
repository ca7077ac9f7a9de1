//! The bundle data model.
//!
//! Bundles are built once during configuration load, may be rebuilt
//! wholesale on reload, and are read-only while serving.

pub mod registry;

pub use registry::{BundleRegistry, RegistryBuilder};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::variant::{VariantMap, VariantSet, combinations};

// ============================================================================
// ResourceType
// ============================================================================

/// What kind of content a bundle joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Js,
    Css,
    Binary,
}

impl ResourceType {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ResourceType::Js => "js",
            ResourceType::Css => "css",
            ResourceType::Binary => "bin",
        }
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.rsplit('.').next()? {
            "js" => Some(ResourceType::Js),
            "css" => Some(ResourceType::Css),
            _ => None,
        }
    }

    /// Separator inserted between joined members. Script members must end
    /// in a statement terminator so concatenation cannot change evaluation
    /// semantics; stylesheets just need a line break.
    pub fn member_separator(self) -> &'static str {
        match self {
            ResourceType::Js => ";\n",
            ResourceType::Css | ResourceType::Binary => "\n",
        }
    }
}

// ============================================================================
// InclusionPattern
// ============================================================================

/// When a bundle's members appear in debug mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugInclusion {
    /// Served in both debug and production
    #[default]
    Always,
    /// Served only in debug mode
    Only,
    /// Excluded from debug mode
    Never,
}

/// Global flag, inclusion order and debug-mode behavior for one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InclusionPattern {
    /// Global bundles are included on every page, ordered by `order`
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub debug: DebugInclusion,
}

impl InclusionPattern {
    pub fn include_only_on_debug(&self) -> bool {
        self.debug == DebugInclusion::Only
    }

    pub fn exclude_on_debug(&self) -> bool {
        self.debug == DebugInclusion::Never
    }
}

// ============================================================================
// JoinableResourceBundle
// ============================================================================

/// A named, ordered collection of resources served and merged as one
/// logical unit.
#[derive(Debug, Clone)]
pub struct JoinableResourceBundle {
    /// Path-like logical identifier, unique across the registry
    pub id: String,
    /// Display name for logs and diagnostics
    pub name: String,
    pub resource_type: ResourceType,
    pub inclusion: InclusionPattern,
    /// Resolved ordered member paths (production)
    pub items: Vec<String>,
    /// Ordered member paths for debug mode; differs from `items` for
    /// composites and debug-only children
    pub debug_items: Vec<String>,
    /// Non-code license artifacts, concatenated but excluded from
    /// bundling logic
    pub licenses: BTreeSet<String>,
    /// Variant dimensions applicable to this bundle, by type name
    pub variants: BTreeMap<String, VariantSet>,
    /// Descriptor keys for the per-member processor chain
    pub unit_processors: Vec<String>,
    /// Descriptor keys for the per-bundle processor chain
    pub composite_processors: Vec<String>,
    /// Child bundle ids when this is a composite
    pub children: Vec<String>,
}

impl JoinableResourceBundle {
    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    /// Every applicable (dimension -> value) combination, all-defaults
    /// included.
    pub fn variant_combinations(&self) -> Vec<VariantMap> {
        combinations(&self.variants)
    }

    /// Merge a discovered variant dimension into the declared map.
    pub fn merge_variant(&mut self, set: &VariantSet) {
        match self.variants.get_mut(&set.type_name) {
            Some(existing) => existing.merge(set),
            None => {
                self.variants.insert(set.type_name.clone(), set.clone());
            }
        }
    }

    /// True when the path is claimed by this bundle in any role.
    pub fn claims(&self, path: &str) -> bool {
        self.items.iter().any(|p| p == path)
            || self.debug_items.iter().any(|p| p == path)
            || self.licenses.contains(path)
    }
}
