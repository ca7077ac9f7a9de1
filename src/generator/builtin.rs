//! Built-in resource generators.

use anyhow::{Context, Result, anyhow};
use std::collections::BTreeSet;

use crate::reader::ResourceReader;
use crate::variant::VariantSet;

use super::{GeneratedPath, GeneratorContext, GeneratorMarker, ResourceGenerator};

// ============================================================================
// VirtualLocatorGenerator
// ============================================================================

/// Strategy for turning a virtual inner path into a concrete resource
/// path. One generator type parameterized by its locator covers the whole
/// family of "locate relative to X" schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathLocator {
    /// Inner path is already rooted in the resource tree.
    Root,
    /// Inner path is located under a fixed directory prefix.
    Under(String),
}

impl PathLocator {
    fn locate(&self, inner: &str) -> String {
        let inner = format!("/{}", inner.trim_start_matches('/'));
        match self {
            PathLocator::Root => inner,
            PathLocator::Under(prefix) => {
                format!("/{}{}", prefix.trim_matches('/'), inner)
            }
        }
    }
}

/// `virtual:` generator: serves a concrete resource through the generator
/// protocol, located by an injected [`PathLocator`] strategy.
pub struct VirtualLocatorGenerator {
    locator: PathLocator,
}

impl VirtualLocatorGenerator {
    pub fn new(locator: PathLocator) -> Self {
        Self { locator }
    }

    /// Locator resolving inner paths directly against the tree root.
    pub fn rooted() -> Self {
        Self::new(PathLocator::Root)
    }
}

impl ResourceGenerator for VirtualLocatorGenerator {
    fn key(&self) -> &'static str {
        "virtual"
    }

    fn marker(&self) -> GeneratorMarker {
        GeneratorMarker::Prefix("virtual".to_string())
    }

    fn generate_text(&self, ctx: &GeneratorContext<'_>) -> Result<String> {
        let located = self.locator.locate(&ctx.reference.inner);
        ctx.reader.read_text(&located, ctx.encoding)
    }

    fn generate_bytes(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<u8>> {
        let located = self.locator.locate(&ctx.reference.inner);
        ctx.reader.read_bytes(&located)
    }

    fn debug_path(&self, reference: &GeneratedPath) -> String {
        self.locator.locate(&reference.inner)
    }
}

// ============================================================================
// SkinCssGenerator
// ============================================================================

/// Root directory holding one subdirectory per skin
const SKINS_ROOT: &str = "/skins";

/// `skin:` generator: resolves `skin:theme.css` to
/// `/skins/<current-skin>/theme.css`, advertising the `skin` dimension
/// from the skin directories present in the tree.
pub struct SkinCssGenerator {
    skins_root: String,
}

impl SkinCssGenerator {
    pub fn new() -> Self {
        Self {
            skins_root: SKINS_ROOT.to_string(),
        }
    }

    pub fn with_root(skins_root: impl Into<String>) -> Self {
        Self {
            skins_root: skins_root.into(),
        }
    }

    fn skin_dirs(&self, reader: &dyn ResourceReader) -> Vec<String> {
        reader
            .list_children(&self.skins_root)
            .into_iter()
            .filter(|name| reader.is_directory(&format!("{}/{}", self.skins_root, name)))
            .collect()
    }
}

impl Default for SkinCssGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGenerator for SkinCssGenerator {
    fn key(&self) -> &'static str {
        "skin"
    }

    fn marker(&self) -> GeneratorMarker {
        GeneratorMarker::Prefix("skin".to_string())
    }

    fn generate_text(&self, ctx: &GeneratorContext<'_>) -> Result<String> {
        let skin = ctx
            .variants
            .get("skin")
            .ok_or_else(|| anyhow!("no skin variant resolved for `{}`", ctx.reference.inner))?;
        let path = format!(
            "{}/{}/{}",
            self.skins_root,
            skin,
            ctx.reference.inner.trim_start_matches('/')
        );
        ctx.reader.read_text(&path, ctx.encoding)
    }

    fn available_variants(&self, _inner: &str, reader: &dyn ResourceReader) -> Vec<VariantSet> {
        let skins = self.skin_dirs(reader);
        let Some(default) = skins.first().cloned() else {
            return Vec::new();
        };
        match VariantSet::new("skin", default, skins) {
            Ok(set) => vec![set],
            Err(_) => Vec::new(),
        }
    }
}

// ============================================================================
// MessageBundleGenerator
// ============================================================================

/// Default directory for message property files
const MESSAGES_ROOT: &str = "/i18n";

/// `msg:` generator: compiles `key=value` property files into a script
/// exposing the messages, one file per locale
/// (`app.properties`, `app_fr.properties`, ...). The bracket parameter
/// overrides the script namespace.
pub struct MessageBundleGenerator {
    messages_root: String,
}

impl MessageBundleGenerator {
    pub fn new() -> Self {
        Self {
            messages_root: MESSAGES_ROOT.to_string(),
        }
    }

    fn base_path(&self, inner: &str) -> String {
        if inner.starts_with('/') {
            inner.to_string()
        } else {
            format!("{}/{}", self.messages_root, inner)
        }
    }

    /// Property file path for a locale; empty locale means the default file.
    fn file_for(&self, inner: &str, locale: &str) -> String {
        let base = self.base_path(inner);
        if locale.is_empty() {
            format!("{base}.properties")
        } else {
            format!("{base}_{locale}.properties")
        }
    }
}

impl Default for MessageBundleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a value for inclusion in a double-quoted JS string literal.
fn js_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

impl ResourceGenerator for MessageBundleGenerator {
    fn key(&self) -> &'static str {
        "msg"
    }

    fn marker(&self) -> GeneratorMarker {
        GeneratorMarker::Prefix("msg".to_string())
    }

    fn generate_text(&self, ctx: &GeneratorContext<'_>) -> Result<String> {
        let locale = ctx.variants.get("locale").unwrap_or("");
        let path = self.file_for(&ctx.reference.inner, locale);
        // Fall back to the default property file for the base locale
        let path = if ctx.reader.exists(&path) {
            path
        } else {
            self.file_for(&ctx.reference.inner, "")
        };
        let source = ctx
            .reader
            .read_text(&path, ctx.encoding)
            .with_context(|| format!("message bundle `{}`", ctx.reference.inner))?;

        let namespace = match ctx.reference.parameter() {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => "messages".to_string(),
        };

        let mut script = format!("var {namespace}={namespace}||{{}};\n");
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            script.push_str(&format!(
                "{namespace}[\"{}\"]=\"{}\";\n",
                js_escape(key.trim()),
                js_escape(value.trim())
            ));
        }
        Ok(script)
    }

    fn available_variants(&self, inner: &str, reader: &dyn ResourceReader) -> Vec<VariantSet> {
        let base = self.base_path(inner);
        let (dir, stem) = match base.rfind('/') {
            Some(i) => (&base[..i], &base[i + 1..]),
            None => ("/", base.as_str()),
        };
        let dir = if dir.is_empty() { "/" } else { dir };

        let mut locales: BTreeSet<String> = BTreeSet::new();
        let marker = format!("{stem}_");
        for child in reader.list_children(dir) {
            if let Some(rest) = child.strip_suffix(".properties") {
                if rest == stem {
                    locales.insert(String::new());
                } else if let Some(locale) = rest.strip_prefix(&marker) {
                    locales.insert(locale.to_string());
                }
            }
        }
        if locales.is_empty() {
            return Vec::new();
        }
        locales.insert(String::new());
        match VariantSet::new("locale", "", locales.into_iter().collect::<Vec<_>>()) {
            Ok(set) => vec![set],
            Err(_) => Vec::new(),
        }
    }
}

// ============================================================================
// JsonJsGenerator
// ============================================================================

/// Suffix generator for `*.json`: reads the JSON document through the
/// reader abstraction, validates it and emits a script assigning it to a
/// variable named after the file stem.
pub struct JsonJsGenerator;

impl ResourceGenerator for JsonJsGenerator {
    fn key(&self) -> &'static str {
        "json"
    }

    fn marker(&self) -> GeneratorMarker {
        GeneratorMarker::Suffix("json".to_string())
    }

    fn generate_text(&self, ctx: &GeneratorContext<'_>) -> Result<String> {
        let source = ctx.reader.read_text(&ctx.reference.inner, ctx.encoding)?;
        let value: serde_json::Value = serde_json::from_str(&source)
            .with_context(|| format!("invalid JSON in `{}`", ctx.reference.inner))?;

        let stem = ctx
            .reference
            .inner
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".json"))
            .unwrap_or("data");
        let var_name: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        Ok(format!("var {var_name}={};", serde_json::to_string(&value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Encoding, FsResourceReader};
    use crate::variant::VariantMap;
    use std::fs;
    use tempfile::TempDir;

    fn ctx_parts(raw_scheme: &str, inner: &str) -> GeneratedPath {
        GeneratedPath {
            scheme: raw_scheme.to_string(),
            marker: super::super::MarkerKind::Prefix,
            inner: inner.to_string(),
            bracket_param: None,
            paren_param: None,
        }
    }

    #[test]
    fn test_path_locator_strategies() {
        assert_eq!(PathLocator::Root.locate("js/a.js"), "/js/a.js");
        assert_eq!(
            PathLocator::Under("vendor".to_string()).locate("/js/a.js"),
            "/vendor/js/a.js"
        );
    }

    #[test]
    fn test_skin_generator_reads_variant_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("skins/dark")).unwrap();
        fs::create_dir_all(dir.path().join("skins/light")).unwrap();
        fs::write(dir.path().join("skins/dark/theme.css"), ".a{color:#fff}").unwrap();
        let reader = FsResourceReader::new(dir.path());

        let generator = SkinCssGenerator::new();
        let variants = generator.available_variants("theme.css", &reader);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].type_name, "skin");
        assert_eq!(variants[0].values, vec!["dark", "light"]);
        assert_eq!(variants[0].default, "dark");

        let reference = ctx_parts("skin", "theme.css");
        let mut map = VariantMap::new();
        map.insert("skin", "dark");
        let ctx = GeneratorContext {
            reference: &reference,
            variants: &map,
            encoding: Encoding::Utf8,
            reader: &reader,
        };
        assert_eq!(generator.generate_text(&ctx).unwrap(), ".a{color:#fff}");
    }

    #[test]
    fn test_message_bundle_locale_selection() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("i18n")).unwrap();
        fs::write(dir.path().join("i18n/app.properties"), "greet=Hello\n").unwrap();
        fs::write(dir.path().join("i18n/app_fr.properties"), "greet=Bonjour\n").unwrap();
        let reader = FsResourceReader::new(dir.path());

        let generator = MessageBundleGenerator::new();
        let variants = generator.available_variants("app", &reader);
        assert_eq!(variants.len(), 1);
        assert!(variants[0].contains("fr"));
        assert!(variants[0].contains(""));
        assert_eq!(variants[0].default, "");

        let reference = ctx_parts("msg", "app");
        let mut map = VariantMap::new();
        map.insert("locale", "fr");
        let ctx = GeneratorContext {
            reference: &reference,
            variants: &map,
            encoding: Encoding::Utf8,
            reader: &reader,
        };
        let script = generator.generate_text(&ctx).unwrap();
        assert!(script.contains("messages[\"greet\"]=\"Bonjour\";"));

        // Unmatched locale falls back to the default property file
        let mut map = VariantMap::new();
        map.insert("locale", "de");
        let ctx = GeneratorContext {
            reference: &reference,
            variants: &map,
            encoding: Encoding::Utf8,
            reader: &reader,
        };
        let script = generator.generate_text(&ctx).unwrap();
        assert!(script.contains("Hello"));
    }

    #[test]
    fn test_message_bundle_namespace_param() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("i18n")).unwrap();
        fs::write(dir.path().join("i18n/app.properties"), "k=v\n").unwrap();
        let reader = FsResourceReader::new(dir.path());

        let mut reference = ctx_parts("msg", "app");
        reference.bracket_param = Some("myapp".to_string());
        let ctx = GeneratorContext {
            reference: &reference,
            variants: &VariantMap::new(),
            encoding: Encoding::Utf8,
            reader: &reader,
        };
        let script = MessageBundleGenerator::new().generate_text(&ctx).unwrap();
        assert!(script.starts_with("var myapp=myapp||{};"));
    }

    #[test]
    fn test_json_generator_emits_assignment() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"a": 1}"#).unwrap();
        let reader = FsResourceReader::new(dir.path());

        let mut reference = ctx_parts("json", "/config.json");
        reference.marker = super::super::MarkerKind::Suffix;
        let ctx = GeneratorContext {
            reference: &reference,
            variants: &VariantMap::new(),
            encoding: Encoding::Utf8,
            reader: &reader,
        };
        let script = JsonJsGenerator.generate_text(&ctx).unwrap();
        assert_eq!(script, "var config={\"a\":1};");
    }
}
