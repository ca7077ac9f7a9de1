//! Minification processors for JS and CSS bundle content.
//!
//! Uses oxc for JavaScript and lightningcss for CSS.

use anyhow::{Result, anyhow};

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

use super::{PostProcessor, ProcessorContext};

/// Minify JavaScript source code.
fn minify_js(source: &str) -> Option<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::mjs();
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return None;
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;
    Some(code)
}

/// Minify CSS source code.
fn minify_css(source: &str) -> Option<String> {
    let stylesheet = StyleSheet::parse(source, ParserOptions::default()).ok()?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .ok()?;
    Some(result.code)
}

/// `jsmin`: JavaScript minification. A member that fails to parse aborts
/// the bundle assembly rather than passing through unminified.
pub struct JsMinProcessor;

impl PostProcessor for JsMinProcessor {
    fn id(&self) -> &'static str {
        "jsmin"
    }

    fn process(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        minify_js(&content).ok_or_else(|| {
            anyhow!(
                "js minification failed in bundle `{}` (last member `{}`)",
                ctx.bundle_id,
                ctx.last_path.as_deref().unwrap_or("<none>")
            )
        })
    }
}

/// `cssmin`: CSS minification.
pub struct CssMinProcessor;

impl PostProcessor for CssMinProcessor {
    fn id(&self) -> &'static str {
        "cssmin"
    }

    fn process(&self, ctx: &ProcessorContext<'_>, content: String) -> Result<String> {
        minify_css(&content).ok_or_else(|| {
            anyhow!(
                "css minification failed in bundle `{}` (last member `{}`)",
                ctx.bundle_id,
                ctx.last_path.as_deref().unwrap_or("<none>")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantMap;

    #[test]
    fn test_jsmin_shrinks_source() {
        let variants = VariantMap::new();
        let ctx = ProcessorContext::new("/js/app.js", &variants);
        let out = JsMinProcessor
            .process(&ctx, "var answer = 40 + 2;\nconsole.log( answer );".to_string())
            .unwrap();
        assert!(out.len() < "var answer = 40 + 2;\nconsole.log( answer );".len());
        assert!(out.contains("console.log"));
    }

    #[test]
    fn test_jsmin_rejects_broken_source() {
        let variants = VariantMap::new();
        let ctx = ProcessorContext::new("/js/app.js", &variants);
        assert!(
            JsMinProcessor
                .process(&ctx, "function {".to_string())
                .is_err()
        );
    }

    #[test]
    fn test_cssmin() {
        let variants = VariantMap::new();
        let ctx = ProcessorContext::new("/css/all.css", &variants);
        let out = CssMinProcessor
            .process(&ctx, "body {\n  color: #ffffff;\n}\n".to_string())
            .unwrap();
        assert!(out.len() < "body {\n  color: #ffffff;\n}\n".len());
        assert!(out.starts_with("body"));
    }
}
