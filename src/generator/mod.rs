//! Virtual resource generators.
//!
//! A generated path is an identifier not backed by the resource tree:
//! either `scheme:inner/path` (prefix marker) or `inner/path.ext` where
//! `.ext` is a registered suffix marker. The final path segment may carry a
//! `[param]` or `(param)` decoration. The registry recognizes such paths
//! and hands back the producer bound to the scheme.

mod builtin;

pub use builtin::{JsonJsGenerator, MessageBundleGenerator, PathLocator, SkinCssGenerator,
    VirtualLocatorGenerator};

use anyhow::{Result, anyhow};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::reader::{Encoding, ResourceReader};
use crate::variant::{VariantMap, VariantSet};

/// Separator between a prefix scheme and the inner path
pub const PREFIX_SEPARATOR: char = ':';

// ============================================================================
// GeneratedPath
// ============================================================================

/// Which end of the path the scheme marker occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Prefix,
    Suffix,
}

/// A parsed virtual path reference. Derived per lookup, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPath {
    /// Scheme that matched (`msg` for `msg:...`, `json` for `*.json`)
    pub scheme: String,
    pub marker: MarkerKind,
    /// Path with the marker and any parameter decorations stripped
    pub inner: String,
    /// `[param]` decoration; `Some("")` for empty brackets, `None` if absent
    pub bracket_param: Option<String>,
    /// `(param)` decoration; `Some("")` for empty parens, `None` if absent
    pub paren_param: Option<String>,
}

impl GeneratedPath {
    /// Parse a prefix-marked path (`scheme:inner[param]`). `raw` must start
    /// with `scheme` + `:`.
    fn parse_prefix(scheme: &str, raw: &str) -> Self {
        let rest = &raw[scheme.len() + 1..];
        let (inner, bracket, paren) = strip_params(rest);
        Self {
            scheme: scheme.to_string(),
            marker: MarkerKind::Prefix,
            inner,
            bracket_param: bracket,
            paren_param: paren,
        }
    }

    /// Parse a suffix-marked path (`inner.ext[param]`). The extension stays
    /// part of the inner path; only decorations are stripped.
    fn parse_suffix(scheme: &str, raw: &str) -> Self {
        let (inner, bracket, paren) = strip_params(raw);
        Self {
            scheme: scheme.to_string(),
            marker: MarkerKind::Suffix,
            inner,
            bracket_param: bracket,
            paren_param: paren,
        }
    }

    /// Rebuild a resolvable reference from scheme and inner path.
    pub fn serialize(&self) -> String {
        match self.marker {
            MarkerKind::Prefix => format!("{}{}{}", self.scheme, PREFIX_SEPARATOR, self.inner),
            MarkerKind::Suffix => self.inner.clone(),
        }
    }

    /// Whichever parameter is present (bracket wins when both are).
    pub fn parameter(&self) -> Option<&str> {
        self.bracket_param
            .as_deref()
            .or(self.paren_param.as_deref())
    }
}

/// Strip `[param]` / `(param)` decorations from the final path segment.
/// Decorations stack in either order and are peeled off the tail one at a
/// time. Empty decorations yield `Some("")`, distinct from absent (`None`).
fn strip_params(path: &str) -> (String, Option<String>, Option<String>) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let mut inner = path.to_string();
    let mut bracket = None;
    let mut paren = None;

    loop {
        if inner.ends_with(']')
            && let Some(open) = inner[segment_start..].rfind('[').map(|i| i + segment_start)
        {
            bracket = Some(inner[open + 1..inner.len() - 1].to_string());
            inner.truncate(open);
            continue;
        }
        if inner.ends_with(')')
            && let Some(open) = inner[segment_start..].rfind('(').map(|i| i + segment_start)
        {
            paren = Some(inner[open + 1..inner.len() - 1].to_string());
            inner.truncate(open);
            continue;
        }
        break;
    }

    (inner, bracket, paren)
}

// ============================================================================
// ResourceGenerator
// ============================================================================

/// Marker a generator registers under: a literal prefix scheme or a literal
/// file-extension-like suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorMarker {
    /// Matches `scheme:rest`
    Prefix(String),
    /// Matches `*.ext`
    Suffix(String),
}

/// Everything a producer gets for one generation call. Text producers may
/// recursively consult `reader` to read underlying input before
/// transforming it.
pub struct GeneratorContext<'a> {
    pub reference: &'a GeneratedPath,
    /// Resolved variant combination, so locale/skin-aware producers can
    /// select content
    pub variants: &'a VariantMap,
    pub encoding: Encoding,
    pub reader: &'a dyn ResourceReader,
}

/// A dynamic content producer bound to one scheme.
pub trait ResourceGenerator: Send + Sync {
    /// Stable registry key (also the scheme name).
    fn key(&self) -> &'static str;

    /// The marker this generator matches on.
    fn marker(&self) -> GeneratorMarker;

    /// Whether this producer streams raw bytes instead of text.
    fn is_binary(&self) -> bool {
        false
    }

    /// Produce text content for the reference in `ctx`.
    fn generate_text(&self, ctx: &GeneratorContext<'_>) -> Result<String>;

    /// Produce raw bytes. Only meaningful for binary producers.
    fn generate_bytes(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<u8>> {
        Ok(self.generate_text(ctx)?.into_bytes())
    }

    /// Variant dimensions this generator can produce for a resource family
    /// (e.g. one `.properties` file per locale).
    fn available_variants(&self, _inner: &str, _reader: &dyn ResourceReader) -> Vec<VariantSet> {
        Vec::new()
    }

    /// Debug-mode request path for an individual virtual member.
    fn debug_path(&self, reference: &GeneratedPath) -> String {
        format!("/generated/{}/{}", reference.scheme, reference.inner.trim_start_matches('/'))
    }
}

// ============================================================================
// GeneratorRegistry
// ============================================================================

/// Holds the active resolvers. Prefix resolvers are tried before suffix
/// resolvers; within each group resolution order follows scheme name, so
/// lookup is repeatable regardless of registration order.
#[derive(Default)]
pub struct GeneratorRegistry {
    prefix: Vec<(String, Arc<dyn ResourceGenerator>)>,
    suffix: Vec<(String, Arc<dyn ResourceGenerator>)>,
}

/// A successful registry lookup: the producer plus the parsed reference.
pub struct ResolvedGeneratorPath {
    pub generator: Arc<dyn ResourceGenerator>,
    pub reference: GeneratedPath,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, generator: Arc<dyn ResourceGenerator>) {
        match generator.marker() {
            GeneratorMarker::Prefix(scheme) => {
                self.prefix.push((scheme, generator));
                self.prefix.sort_by(|a, b| a.0.cmp(&b.0));
            }
            GeneratorMarker::Suffix(ext) => {
                self.suffix.push((ext, generator));
                self.suffix.sort_by(|a, b| a.0.cmp(&b.0));
            }
        }
    }

    /// True iff some resolver matches the path.
    pub fn is_path_generated(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Find the producer for a virtual path and parse the reference.
    pub fn resolve(&self, path: &str) -> Option<ResolvedGeneratorPath> {
        for (scheme, generator) in &self.prefix {
            if path
                .strip_prefix(scheme.as_str())
                .is_some_and(|rest| rest.starts_with(PREFIX_SEPARATOR))
            {
                return Some(ResolvedGeneratorPath {
                    generator: Arc::clone(generator),
                    reference: GeneratedPath::parse_prefix(scheme, path),
                });
            }
        }
        // Decorations sit after the extension; strip them before matching
        let (undecorated, _, _) = strip_params(path);
        for (ext, generator) in &self.suffix {
            if undecorated
                .rsplit('.')
                .next()
                .is_some_and(|e| e == ext.as_str())
            {
                return Some(ResolvedGeneratorPath {
                    generator: Arc::clone(generator),
                    reference: GeneratedPath::parse_suffix(ext, path),
                });
            }
        }
        None
    }

    /// Generate text for a resolved virtual member.
    pub fn generate(
        &self,
        path: &str,
        variants: &VariantMap,
        encoding: Encoding,
        reader: &dyn ResourceReader,
    ) -> Result<String> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| anyhow!("no generator matches `{path}`"))?;
        let ctx = GeneratorContext {
            reference: &resolved.reference,
            variants,
            encoding,
            reader,
        };
        resolved.generator.generate_text(&ctx)
    }
}

// ============================================================================
// Factory registry
// ============================================================================

/// Factory producing one generator instance.
pub type GeneratorFactory = fn() -> Arc<dyn ResourceGenerator>;

/// Compile-time mapping from stable string keys to generator factories,
/// populated at startup. Unknown keys are a configuration error, never a
/// runtime crash.
pub struct GeneratorFactories {
    factories: FxHashMap<&'static str, GeneratorFactory>,
}

impl GeneratorFactories {
    /// The built-in generator set.
    pub fn defaults() -> Self {
        let mut factories: FxHashMap<&'static str, GeneratorFactory> = FxHashMap::default();
        factories.insert("virtual", || Arc::new(VirtualLocatorGenerator::rooted()));
        factories.insert("skin", || Arc::new(SkinCssGenerator::new()));
        factories.insert("msg", || Arc::new(MessageBundleGenerator::new()));
        factories.insert("json", || Arc::new(JsonJsGenerator));
        Self { factories }
    }

    /// Register a custom factory under a stable key.
    pub fn insert(&mut self, key: &'static str, factory: GeneratorFactory) {
        self.factories.insert(key, factory);
    }

    /// Build a registry from a list of enabled keys.
    pub fn build_registry(&self, keys: &[String]) -> Result<GeneratorRegistry, ConfigError> {
        let mut registry = GeneratorRegistry::new();
        for key in keys {
            let factory = self
                .factories
                .get(key.as_str())
                .ok_or_else(|| ConfigError::UnknownGenerator(key.clone()))?;
            registry.register(factory());
        }
        Ok(registry)
    }
}
