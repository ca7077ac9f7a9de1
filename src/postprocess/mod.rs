//! Ordered content-transformation pipelines.
//!
//! A chain is an explicit ordered list of processors built once at
//! configuration time from named descriptor keys and then iterated; two
//! chain flavors exist per resource type: a unit chain applied to each
//! member's content before concatenation, and a composite chain applied
//! once to the joined bundle content.

mod minify;
mod rewrite;

pub use minify::{CssMinProcessor, JsMinProcessor};
pub use rewrite::{CssUrlRewriter, SkinUrlProcessor, StripCommentsProcessor};

use anyhow::Result;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::variant::{VariantMap, VariantSet};

// ============================================================================
// ProcessorContext
// ============================================================================

/// State threaded through a chain invocation. Carries the most recently
/// added member path so processors can behave conditionally on "what was
/// the last path added".
pub struct ProcessorContext<'a> {
    /// Id of the bundle being assembled
    pub bundle_id: &'a str,
    /// Resolved variant combination for this assembly
    pub variants: &'a VariantMap,
    /// Most recently added member path, if any
    pub last_path: Option<String>,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(bundle_id: &'a str, variants: &'a VariantMap) -> Self {
        Self {
            bundle_id,
            variants,
            last_path: None,
        }
    }
}

// ============================================================================
// PostProcessor
// ============================================================================

/// A named, composable content transform.
pub trait PostProcessor: Send + Sync {
    /// Stable descriptor id this processor registers under.
    fn id(&self) -> &'static str;

    /// Transform content. Errors abort the enclosing bundle assembly.
    fn process(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String>;

    /// Variant discovery mode: dimensions this processor is capable of
    /// producing. Runs once per full rebuild, before any assembly.
    fn declared_variants(&self) -> Vec<VariantSet> {
        Vec::new()
    }
}

// ============================================================================
// ProcessorChain
// ============================================================================

/// An ordered, append-only pipeline of processors. Chain order is
/// insertion order.
#[derive(Default, Clone)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn PostProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Arc<dyn PostProcessor>) {
        self.processors.push(processor);
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    /// Run the chain in transform mode, first to last.
    pub fn apply(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        let mut content = content;
        for processor in &self.processors {
            content = processor.process(ctx, content)?;
        }
        Ok(content)
    }

    /// Run the chain in discovery mode: collect the variant dimensions the
    /// processors can produce, without transforming anything.
    pub fn discover_variants(&self) -> Vec<VariantSet> {
        self.processors
            .iter()
            .flat_map(|p| p.declared_variants())
            .collect()
    }
}

// ============================================================================
// Factory registry
// ============================================================================

/// Factory producing one processor instance.
pub type ProcessorFactory = fn() -> Arc<dyn PostProcessor>;

/// Mapping from stable descriptor keys to processor factories, populated
/// at startup. Unknown keys are a configuration error.
pub struct ProcessorFactories {
    factories: FxHashMap<&'static str, ProcessorFactory>,
}

impl ProcessorFactories {
    /// The built-in processor set.
    pub fn defaults() -> Self {
        let mut factories: FxHashMap<&'static str, ProcessorFactory> = FxHashMap::default();
        factories.insert("jsmin", || Arc::new(JsMinProcessor));
        factories.insert("cssmin", || Arc::new(CssMinProcessor));
        factories.insert("csspathrewriter", || Arc::new(CssUrlRewriter::new()));
        factories.insert("stripcomments", || Arc::new(StripCommentsProcessor::new()));
        factories.insert("skinurl", || Arc::new(SkinUrlProcessor));
        Self { factories }
    }

    /// Register a custom factory under a stable key.
    pub fn insert(&mut self, key: &'static str, factory: ProcessorFactory) {
        self.factories.insert(key, factory);
    }

    /// Build an ordered chain from descriptor keys.
    pub fn build_chain(&self, keys: &[String]) -> Result<ProcessorChain, ConfigError> {
        let mut chain = ProcessorChain::new();
        for key in keys {
            let factory = self
                .factories
                .get(key.as_str())
                .ok_or_else(|| ConfigError::UnknownProcessor(key.clone()))?;
            chain.push(factory());
        }
        Ok(chain)
    }
}
