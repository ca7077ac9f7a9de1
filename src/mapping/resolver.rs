//! Expansion of declared path mappings into ordered member lists.

use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

use crate::debug;
use crate::error::ConfigError;
use crate::generator::GeneratorRegistry;
use crate::reader::{Encoding, ResourceReader};

use super::{PathMapping, PathMappingKind, as_path, join_paths, normalize};

/// Optional ordering manifest inside a mapped directory
pub const SORT_FILE_NAME: &str = ".sorting";

/// Non-code license artifact, concatenated but excluded from bundling logic
pub const LICENSES_FILE_NAME: &str = ".license";

/// Accumulates resolution output for one bundle: the ordered, deduplicated
/// item list plus any license files encountered.
#[derive(Debug, Default)]
pub struct ResolvedItems {
    items: Vec<String>,
    seen: FxHashSet<String>,
    pub licenses: BTreeSet<String>,
}

impl ResolvedItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path unless it is already present (first occurrence wins).
    fn push(&mut self, path: String) {
        if self.seen.insert(path.clone()) {
            self.items.push(path);
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn into_items(self) -> (Vec<String>, BTreeSet<String>) {
        (self.items, self.licenses)
    }
}

/// Expands one [`PathMapping`] at a time, consulting the generator registry
/// for virtual paths and the resource reader for everything concrete.
pub struct PathMappingResolver<'a> {
    reader: &'a dyn ResourceReader,
    generators: &'a GeneratorRegistry,
    /// Resource-type extension including the dot, e.g. `.js`
    extension: String,
    /// All registered bundle ids, for duplicate-path detection
    bundle_ids: &'a FxHashSet<String>,
}

impl<'a> PathMappingResolver<'a> {
    pub fn new(
        reader: &'a dyn ResourceReader,
        generators: &'a GeneratorRegistry,
        extension: &str,
        bundle_ids: &'a FxHashSet<String>,
    ) -> Self {
        Self {
            reader,
            generators,
            extension: format!(".{}", extension.trim_start_matches('.')),
            bundle_ids,
        }
    }

    /// Expand one mapping into `out`, in resolution order.
    pub fn resolve(&self, mapping: &PathMapping, out: &mut ResolvedItems) -> Result<(), ConfigError> {
        debug!("mapping"; "expanding {:?} `{}`", mapping.kind, mapping.path);
        match mapping.kind {
            PathMappingKind::Asset => self.resolve_asset(mapping, out),
            PathMappingKind::Directory => self.resolve_dir(mapping, &mapping.path, false, out),
            PathMappingKind::RecursiveDirectory => {
                self.resolve_dir(mapping, &mapping.path, true, out)
            }
        }
    }

    fn resolve_asset(&self, mapping: &PathMapping, out: &mut ResolvedItems) -> Result<(), ConfigError> {
        let path = &mapping.path;
        if self.generators.is_path_generated(path) {
            // Virtual: recorded verbatim, existence is the generator's concern
            out.push(path.clone());
            return Ok(());
        }
        if path.ends_with(LICENSES_FILE_NAME) {
            out.licenses.insert(as_path(path));
            return Ok(());
        }
        if !path.ends_with(&self.extension) {
            return Err(ConfigError::InvalidMapping {
                bundle: mapping.bundle_id.clone(),
                mapping: path.clone(),
                reason: format!("expected a `{}` resource, directory or generated path", self.extension),
            });
        }
        if !self.reader.exists(path) {
            return Err(ConfigError::ResourceNotFound(path.clone()));
        }
        self.check_collision(path)?;
        out.push(as_path(path));
        Ok(())
    }

    fn resolve_dir(
        &self,
        mapping: &PathMapping,
        dir: &str,
        recursive: bool,
        out: &mut ResolvedItems,
    ) -> Result<(), ConfigError> {
        let children = self.reader.list_children(dir);

        if children.contains(LICENSES_FILE_NAME) {
            out.licenses.insert(join_paths(dir, LICENSES_FILE_NAME));
        }

        if children.contains(SORT_FILE_NAME) {
            // Ordering-only contract: output is exactly what the manifest
            // names. Leftover discovery belongs to the orphan mapper.
            return self.resolve_sorted(mapping, dir, children, recursive, out);
        }

        let mut subdirs = Vec::new();
        for name in &children {
            let path = join_paths(dir, name);
            if self.reader.is_directory(&path) {
                if recursive {
                    subdirs.push(path);
                }
            } else if self.member_matches(&path) {
                self.check_collision(&path)?;
                out.push(path);
            }
        }
        for subdir in subdirs {
            self.resolve_dir(mapping, &subdir, true, out)?;
        }
        Ok(())
    }

    /// Sort-file algorithm: manifest lines pick and order the directory's
    /// available resources; unknown lines are silently skipped, leftovers
    /// are not appended.
    fn resolve_sorted(
        &self,
        mapping: &PathMapping,
        dir: &str,
        children: BTreeSet<String>,
        recursive: bool,
        out: &mut ResolvedItems,
    ) -> Result<(), ConfigError> {
        let sort_path = join_paths(dir, SORT_FILE_NAME);
        let manifest = self
            .reader
            .read_text(&sort_path, Encoding::Utf8)
            .map_err(|e| {
                ConfigError::Io(sort_path.clone(), std::io::Error::other(e.to_string()))
            })?;

        let mut available: BTreeSet<String> = children;
        for line in manifest.lines() {
            let name = normalize(line.trim());
            if name.is_empty() {
                continue;
            }
            let Some(matched) = available.iter().find(|c| normalize(c) == name).cloned() else {
                // Line names a resource absent from the directory: skip
                continue;
            };
            available.remove(&matched);

            let path = join_paths(dir, &matched);
            if self.reader.is_directory(&path) {
                if recursive {
                    self.resolve_dir(mapping, &path, true, out)?;
                }
            } else if self.member_matches(&path) {
                self.check_collision(&path)?;
                out.push(path);
            }
        }
        Ok(())
    }

    /// A file belongs to the bundle when its extension matches the resource
    /// type, or when it is a virtual-generator match.
    fn member_matches(&self, path: &str) -> bool {
        if path.ends_with(&self.extension) {
            return true;
        }
        self.generators.is_path_generated(path)
    }

    /// A resolved path colliding with a registered bundle id is a fatal
    /// duplicate-path misconfiguration.
    fn check_collision(&self, path: &str) -> Result<(), ConfigError> {
        if self.bundle_ids.contains(path) {
            return Err(ConfigError::DuplicateBundlePath(path.to_string()));
        }
        Ok(())
    }
}
