//! Engine configuration: the TOML bundle definition file.
//!
//! ```toml
//! [engine]
//! debug = false
//! charset = "utf-8"
//! hashcode = "digest"
//!
//! [[bundle]]
//! id = "/js/app.js"
//! mappings = ["/js/lib/", "/js/main.js"]
//! order = 1
//! global = true
//! composite-processors = ["jsmin"]
//!
//! [[bundle]]
//! id = "/css/all.css"
//! mappings = ["/css/**"]
//! unit-processors = ["csspathrewriter"]
//! composite-processors = ["cssmin"]
//! [[bundle.variants]]
//! type = "skin"
//! values = ["light", "dark"]
//! default = "light"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bundle::{DebugInclusion, ResourceType};
use crate::error::{ConfigDiagnostics, ConfigError};
use crate::hash::HashcodeGenerator;
use crate::reader::Encoding;
use crate::variant::VariantSet;

// ============================================================================
// Root configuration
// ============================================================================

/// Root configuration structure for the engine definition file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Absolute path to the definition file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Engine-wide settings
    #[serde(default)]
    pub engine: EngineSection,

    /// Declared bundles
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<BundleDefinition>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSection {
    /// Debug mode: serve members individually, unmerged and unhashed
    #[serde(default)]
    pub debug: bool,

    /// Character encoding for reading text resources
    #[serde(default)]
    pub charset: Encoding,

    /// Cache-busting identifier strategy
    #[serde(default)]
    pub hashcode: HashcodeGenerator,

    /// Enabled generator keys
    #[serde(default = "default_generators")]
    pub generators: Vec<String>,

    /// Root scopes scanned for orphan resources, per resource type
    #[serde(default)]
    pub orphan_scopes: Vec<OrphanScope>,

    /// Pre-assemble every (bundle, variant) pair on rebuild
    #[serde(default)]
    pub warm_up: bool,
}

fn default_generators() -> Vec<String> {
    vec![
        "virtual".to_string(),
        "skin".to_string(),
        "msg".to_string(),
        "json".to_string(),
    ]
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            debug: false,
            charset: Encoding::default(),
            hashcode: HashcodeGenerator::default(),
            generators: default_generators(),
            orphan_scopes: Vec::new(),
            warm_up: false,
        }
    }
}

/// One orphan-collection scope: a root directory and the resource type
/// collected beneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrphanScope {
    pub root: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

// ============================================================================
// BundleDefinition
// ============================================================================

/// One `[[bundle]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleDefinition {
    /// Path-like logical identifier, e.g. `/js/app.js`
    pub id: String,

    /// Display name; defaults to the id's file stem
    #[serde(default)]
    pub name: Option<String>,

    /// Ordered mapping strings (see [`crate::mapping::PathMapping`])
    #[serde(default)]
    pub mappings: Vec<String>,

    /// Include on every page
    #[serde(default)]
    pub global: bool,

    /// Inclusion order among global bundles
    #[serde(default)]
    pub order: i32,

    /// Debug-inclusion mode token
    #[serde(default)]
    pub debug: DebugInclusion,

    /// Child bundle ids; non-empty makes this a composite
    #[serde(default)]
    pub children: Vec<String>,

    /// Declared variant dimensions
    #[serde(default)]
    pub variants: Vec<VariantSet>,

    /// Per-member processor chain keys
    #[serde(default)]
    pub unit_processors: Vec<String>,

    /// Per-bundle processor chain keys
    #[serde(default)]
    pub composite_processors: Vec<String>,
}

impl BundleDefinition {
    /// Resource type from the id's extension.
    pub fn resource_type(&self) -> Option<ResourceType> {
        ResourceType::from_path(&self.id)
    }

    /// Display name, defaulting to the id's final segment stem.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.id
                .rsplit('/')
                .next()
                .and_then(|s| s.split('.').next())
                .unwrap_or(&self.id)
                .to_string()
        })
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl EngineConfig {
    /// Load and validate a definition file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let mut config: EngineConfig = toml::from_str(&content)?;
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (hosts embedding their own config source).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole definition, collecting every problem before
    /// failing. Configuration errors abort startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut diags = ConfigDiagnostics::new();
        let mut seen_ids: BTreeSet<&str> = BTreeSet::new();

        for def in &self.bundles {
            let field = format!("bundle.{}", def.id);

            if !def.id.starts_with('/') {
                diags.error_with_hint(
                    format!("{field}.id"),
                    "bundle id must be a rooted path",
                    format!("use `/{}`", def.id),
                );
            }
            if !seen_ids.insert(&def.id) {
                diags.error(format!("{field}.id"), "duplicate bundle id");
            }
            if def.resource_type().is_none() {
                diags.error(
                    format!("{field}.id"),
                    "id extension must be `.js` or `.css`",
                );
            }
            if def.mappings.is_empty() && def.children.is_empty() {
                diags.error_with_hint(
                    format!("{field}.mappings"),
                    "bundle has neither mappings nor children",
                    "declare at least one mapping, or child bundle ids",
                );
            }
            if !def.mappings.is_empty() && !def.children.is_empty() {
                diags.error(
                    format!("{field}.mappings"),
                    "a composite bundle cannot also declare mappings",
                );
            }
            for child in &def.children {
                if child == &def.id {
                    diags.error(format!("{field}.children"), "bundle lists itself as a child");
                } else if !self.bundles.iter().any(|b| &b.id == child) {
                    diags.error(
                        format!("{field}.children"),
                        format!("unknown child bundle `{child}`"),
                    );
                }
            }
            for variant in &def.variants {
                if !variant.default.is_empty() && !variant.contains(&variant.default) {
                    diags.error(
                        format!("{field}.variants.{}", variant.type_name),
                        format!(
                            "default `{}` is not in the value set",
                            variant.default
                        ),
                    );
                }
            }
        }

        diags.into_result()
    }
}

/// Resolve the engine definition file next to a project root.
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    let candidate = root.join("resbundle.toml");
    candidate.exists().then_some(candidate)
}

/// Read a definition file, with context for host-facing error messages.
pub fn read_config(root: &Path) -> Result<EngineConfig> {
    let path = find_config_file(root)
        .with_context(|| format!("no resbundle.toml under `{}`", root.display()))?;
    EngineConfig::load(&path).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [engine]
        debug = false
        charset = "utf-8"
        hashcode = "digest"

        [[bundle]]
        id = "/js/app.js"
        mappings = ["/js/lib/", "/js/main.js"]
        order = 1
        global = true
        composite-processors = ["jsmin"]

        [[bundle]]
        id = "/css/all.css"
        mappings = ["/css/**"]
        unit-processors = ["csspathrewriter"]

        [[bundle.variants]]
        type = "skin"
        values = ["light", "dark"]
        default = "light"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        assert!(!config.engine.debug);
        assert_eq!(config.bundles.len(), 2);

        let app = &config.bundles[0];
        assert_eq!(app.id, "/js/app.js");
        assert_eq!(app.resource_type(), Some(ResourceType::Js));
        assert_eq!(app.mappings, ["/js/lib/", "/js/main.js"]);
        assert!(app.global);
        assert_eq!(app.display_name(), "app");

        let css = &config.bundles[1];
        assert_eq!(css.variants.len(), 1);
        assert_eq!(css.variants[0].type_name, "skin");
        assert_eq!(css.variants[0].default, "light");
    }

    #[test]
    fn test_charset_tokens() {
        let sample = EngineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(sample.engine.charset, Encoding::Utf8);

        let latin = EngineConfig::from_toml(
            r#"
                [engine]
                charset = "iso-8859-1"

                [[bundle]]
                id = "/js/app.js"
                mappings = ["/js/a.js"]
            "#,
        )
        .unwrap();
        assert_eq!(latin.engine.charset, Encoding::Latin1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let toml = r#"
            [[bundle]]
            id = "/js/app.js"
            mappings = ["/js/a.js"]

            [[bundle]]
            id = "/js/app.js"
            mappings = ["/js/b.js"]
        "#;
        let err = EngineConfig::from_toml(toml).unwrap_err();
        assert!(format!("{err}").contains("duplicate bundle id"));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let toml = r#"
            [[bundle]]
            id = "/js/app.js"
        "#;
        assert!(EngineConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_composite_references_validated() {
        let toml = r#"
            [[bundle]]
            id = "/js/all.js"
            children = ["/js/missing.js"]
        "#;
        let err = EngineConfig::from_toml(toml).unwrap_err();
        assert!(format!("{err}").contains("unknown child bundle"));
    }

    #[test]
    fn test_bad_variant_default_rejected() {
        let toml = r#"
            [[bundle]]
            id = "/css/all.css"
            mappings = ["/css/"]

            [[bundle.variants]]
            type = "skin"
            values = ["light"]
            default = "dark"
        "#;
        assert!(EngineConfig::from_toml(toml).is_err());
    }
}
