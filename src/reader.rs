//! External collaborator interfaces: resource reading, bundle persistence
//! and change detection.
//!
//! The engine itself never touches the filesystem directly; everything goes
//! through [`ResourceReader`] so hosts can back resources by a directory
//! tree, an archive, or anything else. [`FsResourceReader`] is the stock
//! directory-tree implementation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

// ============================================================================
// Encoding
// ============================================================================

/// Character encoding used when reading text resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1. Every byte maps to the code point of the same value.
    #[serde(rename = "iso-8859-1", alias = "latin1")]
    Latin1,
}

impl Encoding {
    /// Decode raw bytes to a string according to the encoding.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => {
                String::from_utf8(bytes.to_vec()).map_err(|e| anyhow!("invalid UTF-8: {e}"))
            }
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Read access to the resource tree, keyed by logical `/`-rooted paths.
pub trait ResourceReader: Send + Sync {
    /// Whether a resource or directory exists at this path.
    fn exists(&self, path: &str) -> bool;

    /// Read a text resource with the given encoding.
    fn read_text(&self, path: &str, encoding: Encoding) -> Result<String>;

    /// Read a binary resource.
    fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Immediate child names of a directory (no path prefix), sorted.
    fn list_children(&self, path: &str) -> BTreeSet<String>;

    /// Whether the path denotes a directory.
    fn is_directory(&self, path: &str) -> bool;
}

/// Persistence for assembled bundles, enabling warm starts: the mapping of
/// bundle keys to hashes survives restarts so unchanged content keeps its
/// cache-busting identifier without reassembly.
pub trait BundlePersistence: Send + Sync {
    /// Persist assembled content for a store key.
    fn store(&self, key: &str, content: &str, hash: &str) -> Result<()>;

    /// Read back persisted content for a store key.
    fn read(&self, key: &str) -> Result<Option<PersistedBundle>>;

    /// Whether a previously computed key-to-hash mapping exists at all.
    fn existing_mapping_present(&self) -> bool;
}

/// One persisted (content, hash) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBundle {
    pub content: String,
    pub hash: String,
}

/// Signal from the hosting layer that watched source content changed.
pub trait ChangeDetector: Send + Sync {
    fn has_changed(&self) -> bool;
}

/// Detector that never reports changes. Useful for hosts without watching.
pub struct NoChangeDetector;

impl ChangeDetector for NoChangeDetector {
    fn has_changed(&self) -> bool {
        false
    }
}

// ============================================================================
// Filesystem implementations
// ============================================================================

/// [`ResourceReader`] over a root directory. Logical path `/js/a.js` maps
/// to `<root>/js/a.js`.
pub struct FsResourceReader {
    root: PathBuf,
}

impl FsResourceReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn fs_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl ResourceReader for FsResourceReader {
    fn exists(&self, path: &str) -> bool {
        self.fs_path(path).exists()
    }

    fn read_text(&self, path: &str, encoding: Encoding) -> Result<String> {
        let fs_path = self.fs_path(path);
        let bytes =
            fs::read(&fs_path).with_context(|| format!("reading `{}`", fs_path.display()))?;
        encoding.decode(&bytes)
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let fs_path = self.fs_path(path);
        fs::read(&fs_path).with_context(|| format!("reading `{}`", fs_path.display()))
    }

    fn list_children(&self, path: &str) -> BTreeSet<String> {
        let Ok(entries) = fs::read_dir(self.fs_path(path)) else {
            return BTreeSet::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }

    fn is_directory(&self, path: &str) -> bool {
        self.fs_path(path).is_dir()
    }
}

/// [`BundlePersistence`] writing each bundle next to a JSON key-to-hash
/// mapping file under a working directory.
pub struct FsBundlePersistence {
    work_dir: PathBuf,
}

/// Mapping file name inside the persistence working directory
const MAPPING_FILE: &str = "bundle-hashes.json";

impl FsBundlePersistence {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn mapping_path(&self) -> PathBuf {
        self.work_dir.join(MAPPING_FILE)
    }

    fn content_path(&self, key: &str) -> PathBuf {
        // Store keys are logical paths plus a variant suffix; flatten them
        // into a single file name.
        let flat: String = key
            .chars()
            .map(|c| if c == '/' || c == ':' { '_' } else { c })
            .collect();
        self.work_dir.join(flat)
    }

    fn load_mapping(&self) -> serde_json::Map<String, serde_json::Value> {
        fs::read_to_string(self.mapping_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_mapping(&self, mapping: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        fs::create_dir_all(&self.work_dir)?;
        fs::write(self.mapping_path(), serde_json::to_string_pretty(mapping)?)?;
        Ok(())
    }
}

impl BundlePersistence for FsBundlePersistence {
    fn store(&self, key: &str, content: &str, hash: &str) -> Result<()> {
        fs::create_dir_all(&self.work_dir)?;
        fs::write(self.content_path(key), content)?;
        let mut mapping = self.load_mapping();
        mapping.insert(key.to_string(), serde_json::Value::String(hash.to_string()));
        self.save_mapping(&mapping)
    }

    fn read(&self, key: &str) -> Result<Option<PersistedBundle>> {
        let mapping = self.load_mapping();
        let Some(hash) = mapping.get(key).and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        let path = self.content_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading persisted bundle `{}`", path.display()))?;
        Ok(Some(PersistedBundle {
            content,
            hash: hash.to_string(),
        }))
    }

    fn existing_mapping_present(&self) -> bool {
        self.mapping_path().exists()
    }
}

/// List every persisted key (used by warm start to repopulate the store).
impl FsBundlePersistence {
    pub fn persisted_keys(&self) -> Vec<String> {
        self.load_mapping().keys().cloned().collect()
    }
}
