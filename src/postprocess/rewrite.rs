//! Rewriting processors: CSS `url()` path adjustment, comment stripping
//! and skin-aware URL substitution.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use crate::variant::VariantSet;

use super::{PostProcessor, ProcessorContext};

/// Matches `url( ... )` occurrences, quoted or bare.
static CSS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\([ \t\r\n]*['"]?([^'")]+)['"]?[ \t\r\n]*\)"#).unwrap());

/// CSS block comments (non-greedy across lines).
static CSS_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// Placeholder replaced with the resolved skin value.
const SKIN_PLACEHOLDER: &str = "{skin}";

// ============================================================================
// CssUrlRewriter
// ============================================================================

/// `csspathrewriter`: a unit processor that rewrites relative `url()`
/// references to root-relative ones. Members merged into a bundle are
/// served from the bundle's hashed URL, so a URL relative to the member's
/// original directory would dangle; anchoring at the root survives any
/// URL prefix the serving layer adds.
pub struct CssUrlRewriter;

impl CssUrlRewriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CssUrlRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `relative` against the directory of `member_path`, folding
/// `.` and `..` segments.
fn absolutize(member_path: &str, relative: &str) -> String {
    if relative.starts_with('/')
        || relative.starts_with("data:")
        || relative.contains("://")
    {
        return relative.to_string();
    }
    let dir = member_path.rsplit_once('/').map_or("", |(d, _)| d);
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

impl PostProcessor for CssUrlRewriter {
    fn id(&self) -> &'static str {
        "csspathrewriter"
    }

    fn process(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        let Some(member_path) = ctx.last_path.clone() else {
            return Ok(content);
        };
        let rewritten = CSS_URL.replace_all(&content, |caps: &regex::Captures<'_>| {
            format!("url(\"{}\")", absolutize(&member_path, &caps[1]))
        });
        Ok(rewritten.into_owned())
    }
}

// ============================================================================
// StripCommentsProcessor
// ============================================================================

/// `stripcomments`: removes CSS block comments before minification or
/// concatenation.
pub struct StripCommentsProcessor;

impl StripCommentsProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StripCommentsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor for StripCommentsProcessor {
    fn id(&self) -> &'static str {
        "stripcomments"
    }

    fn process(&self, _ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        Ok(CSS_COMMENT.replace_all(&content, "").into_owned())
    }
}

// ============================================================================
// SkinUrlProcessor
// ============================================================================

/// `skinurl`: substitutes the `{skin}` placeholder in content with the
/// resolved skin variant. Declares the `skin` dimension in discovery mode
/// so bundles using it are expanded per skin.
pub struct SkinUrlProcessor;

impl PostProcessor for SkinUrlProcessor {
    fn id(&self) -> &'static str {
        "skinurl"
    }

    fn process(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        let Some(skin) = ctx.variants.get("skin") else {
            return Ok(content);
        };
        Ok(content.replace(SKIN_PLACEHOLDER, skin))
    }

    fn declared_variants(&self) -> Vec<VariantSet> {
        // Capability marker; concrete skin values are merged in from the
        // bundle's declared set and generator-advertised dimensions.
        VariantSet::new("skin", "default", vec!["default".to_string()])
            .map(|set| vec![set])
            .unwrap_or_default()
    }
}
