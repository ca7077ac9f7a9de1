//! Declared path mappings and their expansion to concrete member lists.
//!
//! A bundle declares mapping strings; the trailing marker picks the kind:
//!
//! | Mapping          | Kind                  |
//! |------------------|-----------------------|
//! | `/js/main.js`    | `Asset`               |
//! | `/js/lib/`       | `Directory`           |
//! | `/js/lib/**`     | `RecursiveDirectory`  |
//!
//! Generated (virtual) paths are always `Asset` mappings and recorded
//! verbatim.

pub mod orphan;
pub mod resolver;

pub use resolver::{PathMappingResolver, ResolvedItems};

/// Marker for recursive directory mappings
const RECURSIVE_SUFFIX: &str = "/**";

// ============================================================================
// Path normalization
// ============================================================================

/// Normalize a path to a single leading `/` and no trailing `/`.
pub fn as_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Strip leading and trailing slashes (bare normal form, used
/// when comparing sort-file lines to directory listings).
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Join a directory path and a child name into a normalized path.
pub fn join_paths(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        as_path(&format!("{dir}/{name}"))
    }
}

// ============================================================================
// PathMapping
// ============================================================================

/// Mapping kind, determined by the raw string's trailing marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathMappingKind {
    Asset,
    Directory,
    RecursiveDirectory,
}

/// One declared mapping entry, immutable once constructed. Equality is by
/// (kind, stored path); the kind suffix is stripped from the stored path.
#[derive(Debug, Clone)]
pub struct PathMapping {
    /// Id of the owning bundle
    pub bundle_id: String,
    /// Mapping path with the kind marker stripped
    pub path: String,
    pub kind: PathMappingKind,
}

impl PathMapping {
    /// Parse a raw mapping string, classifying by its trailing marker.
    pub fn parse(bundle_id: impl Into<String>, raw: &str) -> Self {
        let raw = raw.trim();
        let (path, kind) = if let Some(stripped) = raw.strip_suffix(RECURSIVE_SUFFIX) {
            (as_path(stripped), PathMappingKind::RecursiveDirectory)
        } else if raw.len() > 1 && raw.ends_with('/') {
            (as_path(raw), PathMappingKind::Directory)
        } else {
            // Virtual paths keep their scheme markers verbatim
            let path = if raw.contains(':') {
                raw.to_string()
            } else {
                as_path(raw)
            };
            (path, PathMappingKind::Asset)
        };
        Self {
            bundle_id: bundle_id.into(),
            path,
            kind,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == PathMappingKind::Directory
    }

    pub fn is_recursive(&self) -> bool {
        self.kind == PathMappingKind::RecursiveDirectory
    }
}

impl PartialEq for PathMapping {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.path == other.path
    }
}

impl Eq for PathMapping {}

impl std::hash::Hash for PathMapping {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.path.hash(state);
    }
}
