//! Orphan resource collection: everything under a root scope that no
//! declared bundle claims becomes an implicit single-resource bundle.

use rustc_hash::FxHashSet;

use crate::error::ConfigError;
use crate::log;
use crate::reader::ResourceReader;

use super::join_paths;

/// Reserved metadata directories never scanned for orphans
const RESERVED_DIRS: &[&str] = &["WEB-INF", "META-INF", ".git", ".svn"];

/// Walks all resources under a root and subtracts everything already
/// claimed by declared bundles.
pub struct OrphanResourceMapper<'a> {
    reader: &'a dyn ResourceReader,
    /// Resource-type extension including the dot, e.g. `.js`
    extension: String,
}

impl<'a> OrphanResourceMapper<'a> {
    pub fn new(reader: &'a dyn ResourceReader, extension: &str) -> Self {
        Self {
            reader,
            extension: format!(".{}", extension.trim_start_matches('.')),
        }
    }

    /// Collect unclaimed resource paths under `root`, in deterministic
    /// order. `claimed` holds every path present in some bundle's item
    /// list, debug item list or license set; `bundle_ids` holds the
    /// registered bundle ids for collision detection.
    pub fn collect(
        &self,
        root: &str,
        claimed: &FxHashSet<String>,
        bundle_ids: &FxHashSet<String>,
    ) -> Result<Vec<String>, ConfigError> {
        let mut orphans = Vec::new();
        self.walk(root, claimed, bundle_ids, &mut orphans)?;
        Ok(orphans)
    }

    fn walk(
        &self,
        dir: &str,
        claimed: &FxHashSet<String>,
        bundle_ids: &FxHashSet<String>,
        orphans: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        for name in self.reader.list_children(dir) {
            if name.starts_with('.') || RESERVED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let path = join_paths(dir, &name);
            if self.reader.is_directory(&path) {
                self.walk(&path, claimed, bundle_ids, orphans)?;
                continue;
            }
            if !path.ends_with(&self.extension) || claimed.contains(&path) {
                continue;
            }
            // An orphan whose natural path equals a bundle id would shadow
            // that bundle; refusing is the only safe option.
            if bundle_ids.contains(&path) {
                log!("fatal"; "orphan resource `{path}` collides with a registered bundle id");
                return Err(ConfigError::DuplicateBundlePath(path));
            }
            orphans.push(path);
        }
        Ok(())
    }
}
