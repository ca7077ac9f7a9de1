//! Concurrent cache of assembled bundles, keyed by bundle id and variant
//! combination.
//!
//! Misses are coalesced: concurrent requests for the same key block on a
//! per-key gate while exactly one of them assembles. Failures are never
//! cached, so a transient read error does not poison the key.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::assembler::BundleAssembler;
use crate::bundle::registry::BundleChains;
use crate::bundle::JoinableResourceBundle;
use crate::error::BundlingError;
use crate::log;
use crate::reader::BundlePersistence;
use crate::variant::VariantMap;

/// One cached assembly result.
#[derive(Debug)]
pub struct StoreEntry {
    pub content: String,
    pub hash: String,
}

#[derive(Default)]
pub struct BundleStore {
    entries: DashMap<String, Arc<StoreEntry>>,
    // Per-key single-flight gates; an entry exists only while a miss for
    // that key is being filled
    inflight: DashMap<String, Arc<Mutex<()>>>,
    persistence: Option<Arc<dyn BundlePersistence>>,
}

impl BundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(persistence: Arc<dyn BundlePersistence>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::default()
        }
    }

    /// Cache key for a bundle and variant combination.
    pub fn key(bundle_id: &str, variants: &VariantMap) -> String {
        let variant_key = variants.cache_key();
        if variant_key.is_empty() {
            bundle_id.to_string()
        } else {
            format!("{bundle_id}@{variant_key}")
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<StoreEntry>> {
        self.entries.get(key).map(|e| Arc::clone(&e))
    }

    /// Return the cached entry for this bundle and combination, assembling
    /// it first on a miss. Concurrent misses for one key assemble once.
    pub fn get_or_assemble(
        &self,
        assembler: &BundleAssembler<'_>,
        bundle: &JoinableResourceBundle,
        chains: &BundleChains,
        variants: &VariantMap,
    ) -> Result<Arc<StoreEntry>, BundlingError> {
        let key = Self::key(&bundle.id, variants);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(&entry));
        }

        let gate = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock();

        // A concurrent filler may have finished while we waited
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(&entry));
        }

        let assembled = assembler.assemble(bundle, chains, variants)?;
        if let Some(persistence) = &self.persistence
            && let Err(e) = persistence.store(&key, &assembled.content, &assembled.hash)
        {
            log!("warning"; "failed to persist `{key}`: {e:#}");
        }

        let entry = Arc::new(StoreEntry {
            content: assembled.content,
            hash: assembled.hash,
        });
        self.entries.insert(key.clone(), Arc::clone(&entry));
        self.inflight.remove(&key);
        Ok(entry)
    }

    /// Seed a key from persisted content, if any. Returns whether it hit.
    pub fn restore(&self, key: &str) -> bool {
        let Some(persistence) = &self.persistence else {
            return false;
        };
        match persistence.read(key) {
            Ok(Some(persisted)) => {
                self.entries.insert(
                    key.to_string(),
                    Arc::new(StoreEntry {
                        content: persisted.content,
                        hash: persisted.hash,
                    }),
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                log!("warning"; "failed to restore `{key}`: {e:#}");
                false
            }
        }
    }

    /// Discard every cached assembly. Contents are rebuilt lazily on the
    /// next request.
    pub fn reset(&self) {
        self.entries.clear();
        self.inflight.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{InclusionPattern, ResourceType};
    use crate::generator::GeneratorFactories;
    use crate::hash::HashcodeGenerator;
    use crate::reader::{Encoding, FsResourceReader, ResourceReader};
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingReader {
        inner: FsResourceReader,
        reads: AtomicUsize,
    }

    impl CountingReader {
        fn new(root: &std::path::Path) -> Self {
            Self {
                inner: FsResourceReader::new(root),
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl ResourceReader for CountingReader {
        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }

        fn read_text(&self, path: &str, encoding: Encoding) -> anyhow::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_text(path, encoding)
        }

        fn read_bytes(&self, path: &str) -> anyhow::Result<Vec<u8>> {
            self.inner.read_bytes(path)
        }

        fn list_children(&self, path: &str) -> BTreeSet<String> {
            self.inner.list_children(path)
        }

        fn is_directory(&self, path: &str) -> bool {
            self.inner.is_directory(path)
        }
    }

    fn js_bundle(items: &[&str]) -> JoinableResourceBundle {
        JoinableResourceBundle {
            id: "/js/app.js".to_string(),
            name: "app".to_string(),
            resource_type: ResourceType::Js,
            inclusion: InclusionPattern::default(),
            items: items.iter().map(|s| s.to_string()).collect(),
            debug_items: items.iter().map(|s| s.to_string()).collect(),
            licenses: BTreeSet::new(),
            variants: BTreeMap::new(),
            unit_processors: Vec::new(),
            composite_processors: Vec::new(),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_key_includes_variants() {
        let mut variants = VariantMap::new();
        assert_eq!(BundleStore::key("/js/app.js", &variants), "/js/app.js");
        variants.insert("locale", "fr");
        assert_eq!(
            BundleStore::key("/js/app.js", &variants),
            "/js/app.js@locale=fr"
        );
    }

    #[test]
    fn test_concurrent_misses_assemble_once() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/a.js"), "var a;").unwrap();
        fs::write(dir.path().join("js/b.js"), "var b;").unwrap();

        let reader = CountingReader::new(dir.path());
        let generators = GeneratorFactories::defaults()
            .build_registry(&["virtual".to_string()])
            .unwrap();
        let assembler = BundleAssembler::new(
            &reader,
            &generators,
            Encoding::Utf8,
            HashcodeGenerator::Digest,
        );
        let store = BundleStore::new();
        let bundle = js_bundle(&["/js/a.js", "/js/b.js"]);
        let chains = BundleChains::default();
        let variants = VariantMap::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let entry = store
                        .get_or_assemble(&assembler, &bundle, &chains, &variants)
                        .unwrap();
                    assert_eq!(entry.content, "var a;\nvar b;");
                });
            }
        });

        // one read per member, regardless of requester count
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let reader = CountingReader::new(dir.path());
        let generators = GeneratorFactories::defaults()
            .build_registry(&["virtual".to_string()])
            .unwrap();
        let assembler = BundleAssembler::new(
            &reader,
            &generators,
            Encoding::Utf8,
            HashcodeGenerator::Digest,
        );
        let store = BundleStore::new();
        let bundle = js_bundle(&["/js/missing.js"]);
        let chains = BundleChains::default();
        let variants = VariantMap::new();

        assert!(store
            .get_or_assemble(&assembler, &bundle, &chains, &variants)
            .is_err());
        assert!(store.is_empty());

        // The resource appearing later must be picked up on retry
        fs::create_dir_all(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/missing.js"), "var m;").unwrap();
        let entry = store
            .get_or_assemble(&assembler, &bundle, &chains, &variants)
            .unwrap();
        assert_eq!(entry.content, "var m;");
    }

    #[test]
    fn test_reset_clears_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/a.js"), "var a;").unwrap();

        let reader = CountingReader::new(dir.path());
        let generators = GeneratorFactories::defaults()
            .build_registry(&["virtual".to_string()])
            .unwrap();
        let assembler = BundleAssembler::new(
            &reader,
            &generators,
            Encoding::Utf8,
            HashcodeGenerator::Digest,
        );
        let store = BundleStore::new();
        let bundle = js_bundle(&["/js/a.js"]);
        let chains = BundleChains::default();
        let variants = VariantMap::new();

        store
            .get_or_assemble(&assembler, &bundle, &chains, &variants)
            .unwrap();
        assert_eq!(store.len(), 1);
        store.reset();
        assert!(store.is_empty());
        store
            .get_or_assemble(&assembler, &bundle, &chains, &variants)
            .unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restore_from_persistence() {
        let dir = TempDir::new().unwrap();
        let persistence = Arc::new(crate::reader::FsBundlePersistence::new(dir.path()));
        persistence
            .store("/js/app.js", "var a;", "abc123")
            .unwrap();

        let store = BundleStore::with_persistence(persistence);
        assert!(store.restore("/js/app.js"));
        let entry = store.get("/js/app.js").unwrap();
        assert_eq!(entry.content, "var a;");
        assert_eq!(entry.hash, "abc123");
        assert!(!store.restore("/js/other.js"));
    }
}
