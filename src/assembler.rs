//! Bundle assembly: joining a bundle's members into one deliverable text
//! for a single variant combination.
//!
//! Assembly is all-or-nothing. Any member read, generation, or processor
//! failure aborts the whole bundle and nothing is cached for it.

use crate::bundle::registry::BundleChains;
use crate::bundle::JoinableResourceBundle;
use crate::debug;
use crate::error::BundlingError;
use crate::generator::GeneratorRegistry;
use crate::hash::HashcodeGenerator;
use crate::postprocess::ProcessorContext;
use crate::reader::{Encoding, ResourceReader};
use crate::variant::VariantMap;

/// Joined content plus its cache-busting identifier.
#[derive(Debug, Clone)]
pub struct AssembledBundle {
    pub content: String,
    pub hash: String,
}

pub struct BundleAssembler<'a> {
    reader: &'a dyn ResourceReader,
    generators: &'a GeneratorRegistry,
    encoding: Encoding,
    hashcode: HashcodeGenerator,
}

impl<'a> BundleAssembler<'a> {
    pub fn new(
        reader: &'a dyn ResourceReader,
        generators: &'a GeneratorRegistry,
        encoding: Encoding,
        hashcode: HashcodeGenerator,
    ) -> Self {
        Self {
            reader,
            generators,
            encoding,
            hashcode,
        }
    }

    /// Assemble one bundle for one resolved variant combination.
    pub fn assemble(
        &self,
        bundle: &JoinableResourceBundle,
        chains: &BundleChains,
        variants: &VariantMap,
    ) -> Result<AssembledBundle, BundlingError> {
        debug!(
            "assemble";
            "`{}` ({} members, variants `{}`)",
            bundle.id,
            bundle.items.len(),
            variants.cache_key()
        );

        let separator = bundle.resource_type.member_separator();
        let mut ctx = ProcessorContext::new(&bundle.id, variants);
        let mut joined = String::new();
        for path in &bundle.items {
            let content = self
                .member_content(path, variants)
                .map_err(|e| BundlingError::new(&bundle.id, path, e))?;
            ctx.last_path = Some(path.clone());
            let content = chains
                .unit
                .apply(&ctx, content)
                .map_err(|e| BundlingError::new(&bundle.id, path, e))?;
            if !joined.is_empty() {
                // Script members already ending in a statement terminator
                // only need the line break
                if joined.trim_end().ends_with(';') {
                    joined.push('\n');
                } else {
                    joined.push_str(separator);
                }
            }
            joined.push_str(&content);
        }
        let processed = chains
            .composite
            .apply(&ctx, joined)
            .map_err(|e| BundlingError::new(&bundle.id, &bundle.id, e))?;

        // License blocks ride ahead of the content, untouched by any chain
        let mut content = String::new();
        for license in &bundle.licenses {
            let text = self
                .reader
                .read_text(license, self.encoding)
                .map_err(|e| BundlingError::new(&bundle.id, license, e))?;
            content.push_str(&text);
            if !text.ends_with('\n') {
                content.push('\n');
            }
        }
        content.push_str(&processed);

        let hash = self.hashcode.hashcode(&content);
        Ok(AssembledBundle { content, hash })
    }

    fn member_content(&self, path: &str, variants: &VariantMap) -> anyhow::Result<String> {
        if self.generators.is_path_generated(path) {
            self.generators
                .generate(path, variants, self.encoding, self.reader)
        } else {
            self.reader.read_text(path, self.encoding)
        }
    }
}
