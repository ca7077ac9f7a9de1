//! Error taxonomy for the bundling engine.
//!
//! Three families, matching the phases they come from:
//! - [`ConfigError`]: fatal at configuration-build time, abort startup.
//! - [`ResolutionError`]: per-request, recoverable (maps to a not-found).
//! - [`BundlingError`]: aborts one (bundle, variant) assembly without
//!   touching the cache or other bundles.

use owo_colors::OwoColorize;
use std::fmt;
use std::io;
use thiserror::Error;

// ============================================================================
// ConfigError
// ============================================================================

/// Configuration-build errors. These always abort initialization: a
/// misconfigured bundle set must never silently serve partial content.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate bundle path `{0}`")]
    DuplicateBundlePath(String),

    #[error("circular bundle dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("invalid mapping `{mapping}` for bundle `{bundle}`: {reason}")]
    InvalidMapping {
        bundle: String,
        mapping: String,
        reason: String,
    },

    #[error("resource not found: `{0}`")]
    ResourceNotFound(String),

    #[error("unknown post-processor key `{0}`")]
    UnknownProcessor(String),

    #[error("unknown generator key `{0}`")]
    UnknownGenerator(String),

    #[error("for variant type `{variant_type}`, default `{default}` is not in the value set")]
    InvalidVariantDefault {
        variant_type: String,
        default: String,
    },

    #[error("IO error when reading `{0}`")]
    Io(String, #[source] io::Error),

    #[error("definition file parsing error")]
    Toml(#[from] toml::de::Error),

    // NOTE: No #[from] here - we don't want source() which causes duplicate output
    #[error("{0}")]
    Diagnostics(ConfigDiagnostics),
}

// ============================================================================
// ResolutionError
// ============================================================================

/// Per-request resolution errors (recoverable, surface as a not-found).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no bundle matches requested path `{0}`")]
    NotFound(String),
}

// ============================================================================
// BundlingError
// ============================================================================

/// Assembly failure for one (bundle, variant) pair. Carries the bundle id
/// and the member path that failed so callers can report precisely. Partial
/// output is discarded and never cached.
#[derive(Debug, Error)]
#[error("bundling process failed for bundle `{bundle_id}` at member `{path}`")]
pub struct BundlingError {
    pub bundle_id: String,
    pub path: String,
    #[source]
    pub source: anyhow::Error,
}

impl BundlingError {
    pub fn new(bundle_id: impl Into<String>, path: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            path: path.into(),
            source,
        }
    }

    /// Whether the underlying cause is a transient client-side I/O
    /// condition rather than a genuine bundling failure.
    pub fn is_transient(&self) -> bool {
        self.source
            .downcast_ref::<io::Error>()
            .is_some_and(is_transient_io)
    }
}

/// Classify an I/O error as a transient client-side condition (peer gone
/// mid-response) rather than a genuine bundling failure. Transient errors
/// are logged at low severity, not surfaced as assembly failures.
pub fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
    )
}

// ============================================================================
// ConfigDiagnostic
// ============================================================================

/// A single configuration diagnostic
#[derive(Debug, Clone)]
pub struct ConfigDiagnostic {
    /// Definition field path (e.g., "bundle./js/app.js.mappings")
    pub field: String,
    /// Error description
    pub message: String,
    /// Fix hint (optional)
    pub hint: Option<String>,
}

impl ConfigDiagnostic {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}{}", "[".dimmed(), self.field.cyan(), "]".dimmed())?;
        write!(f, "{} {}", "→".red(), self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  {} {}", "hint:".yellow(), hint)?;
        }
        Ok(())
    }
}

// ============================================================================
// ConfigDiagnostics
// ============================================================================

/// Collects validation problems across the whole definition file so a
/// misconfiguration reports every error at once instead of the first.
#[derive(Debug, Default)]
pub struct ConfigDiagnostics {
    errors: Vec<ConfigDiagnostic>,
}

impl ConfigDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigDiagnostic::new(field, message));
    }

    /// Add an error with a hint.
    pub fn error_with_hint(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.errors
            .push(ConfigDiagnostic::new(field, message).with_hint(hint));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ConfigDiagnostic] {
        &self.errors
    }

    /// Convert to Result (returns Err if there are errors).
    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Diagnostics(self))
        }
    }
}

impl fmt::Display for ConfigDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}\n", "bundle definition validation failed:".red().bold())?;
        for (i, err) in self.errors.iter().enumerate() {
            write!(f, "{err}")?;
            if i + 1 < self.errors.len() {
                writeln!(f, "\n")?;
            }
        }
        if self.errors.len() > 1 {
            write!(
                f,
                "\n\n{} {} {}",
                "found".dimmed(),
                self.errors.len().to_string().red().bold(),
                "errors".dimmed()
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigDiagnostics {}
