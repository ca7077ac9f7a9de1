//! Engine facade: snapshot lifecycle, request serving, and warm-up.
//!
//! All serving state lives in an immutable snapshot behind an `ArcSwap`.
//! A rebuild constructs a complete replacement off to the side and swaps
//! it in atomically, so in-flight requests keep the snapshot they started
//! with and never observe a half-built registry.

use arc_swap::ArcSwap;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::assembler::BundleAssembler;
use crate::bundle::registry::{BundleRegistry, RegistryBuilder};
use crate::bundle::{JoinableResourceBundle, ResourceType};
use crate::config::EngineConfig;
use crate::error::{ConfigError, ResolutionError};
use crate::generator::{GeneratorFactories, GeneratorRegistry};
use crate::postprocess::ProcessorFactories;
use crate::reader::{BundlePersistence, ChangeDetector, NoChangeDetector, ResourceReader};
use crate::store::{BundleStore, StoreEntry};
use crate::variant::{self, VariantMap};
use crate::{debug, log};

/// Cache-busting prefix for individual binary resources.
const CACHE_BUSTER_PREFIX: &str = "cb";

/// How a requested bundle should be delivered.
pub enum Serving {
    /// Joined, processed content under a hash-prefixed URL.
    Production {
        url: String,
        entry: Arc<StoreEntry>,
    },
    /// Individual member paths, unmerged and unhashed. Virtual members are
    /// exposed under their producer's debug path.
    Debug { paths: Vec<String> },
}

/// Per-request inputs the host extracts from the HTTP layer.
#[derive(Default)]
pub struct RequestContext {
    /// Overrides the engine-wide debug flag when set
    pub debug: Option<bool>,
    /// Raw requested variant values, e.g. the `Accept-Language` locale
    pub variants: BTreeMap<String, String>,
}

struct Snapshot {
    config: EngineConfig,
    registry: BundleRegistry,
    generators: GeneratorRegistry,
    store: BundleStore,
}

pub struct BundleEngine {
    reader: Arc<dyn ResourceReader>,
    persistence: Option<Arc<dyn BundlePersistence>>,
    detector: Arc<dyn ChangeDetector>,
    snapshot: ArcSwap<Snapshot>,
}

impl BundleEngine {
    pub fn new(config: EngineConfig, reader: Arc<dyn ResourceReader>) -> Result<Self, ConfigError> {
        Self::with_services(config, reader, None, Arc::new(NoChangeDetector))
    }

    pub fn with_services(
        config: EngineConfig,
        reader: Arc<dyn ResourceReader>,
        persistence: Option<Arc<dyn BundlePersistence>>,
        detector: Arc<dyn ChangeDetector>,
    ) -> Result<Self, ConfigError> {
        let snapshot = build_snapshot(config, reader.as_ref(), persistence.clone())?;
        let engine = Self {
            reader,
            persistence,
            detector,
            snapshot: ArcSwap::from_pointee(snapshot),
        };
        engine.warm_up(true);
        Ok(engine)
    }

    /// Rebuild the whole serving snapshot from a fresh configuration and
    /// swap it in. Requests already holding the old snapshot finish on it.
    pub fn rebuild(&self, config: EngineConfig) -> Result<(), ConfigError> {
        log!("rebuild"; "rebuilding bundle registry");
        let snapshot = build_snapshot(config, self.reader.as_ref(), self.persistence.clone())?;
        self.snapshot.store(Arc::new(snapshot));
        // Persisted content predates the rebuild trigger, so every
        // assembly is recomputed instead of restored
        self.warm_up(false);
        Ok(())
    }

    /// Poll the change detector; on a reported change, rebuild on the
    /// current configuration so every cached assembly is recomputed.
    pub fn poll_changes(&self) -> Result<bool, ConfigError> {
        if !self.detector.has_changed() {
            return Ok(false);
        }
        let config = self.snapshot.load().config.clone();
        self.rebuild(config)?;
        Ok(true)
    }

    pub fn is_debug(&self) -> bool {
        self.snapshot.load().config.engine.debug
    }

    /// Serve a bundle by its logical id, or by a hash-prefixed production
    /// URL previously handed out by [`Self::serve`].
    pub fn serve(&self, path: &str, ctx: &RequestContext) -> Result<Serving, ResolutionError> {
        let snapshot = self.snapshot.load();
        let (bundle, suffix) = lookup(&snapshot.registry, path)?;

        let variants = match &suffix {
            // Prefixed URLs carry the variant choice in the prefix itself
            Some(suffix) => variants_for_suffix(bundle, suffix)
                .ok_or_else(|| ResolutionError::NotFound(path.to_string()))?,
            None => variant::resolve_all(&ctx.variants, &bundle.variants),
        };

        let debug_mode = ctx.debug.unwrap_or(snapshot.config.engine.debug);
        if debug_mode && suffix.is_none() {
            return Ok(Serving::Debug {
                paths: self.debug_paths(&snapshot, bundle),
            });
        }

        let assembler = BundleAssembler::new(
            self.reader.as_ref(),
            &snapshot.generators,
            snapshot.config.engine.charset,
            snapshot.config.engine.hashcode,
        );
        let chains = snapshot.registry.chains(&bundle.id);
        let entry = snapshot
            .store
            .get_or_assemble(&assembler, bundle, &chains, &variants)
            .map_err(|e| {
                if e.is_transient() {
                    debug!("assemble"; "transient I/O on `{}` at `{}`: {:#}", e.bundle_id, e.path, e.source);
                } else {
                    log!("error"; "assembling `{}` failed at `{}`: {:#}", e.bundle_id, e.path, e.source);
                }
                ResolutionError::NotFound(path.to_string())
            })?;

        let url = production_url(&bundle.id, &entry.hash, &variants.variant_suffix(&bundle.variants));
        Ok(Serving::Production { url, entry })
    }

    /// Production URLs for every global bundle of a resource type, in
    /// inclusion order. Hosts emit these on each page.
    pub fn global_urls(
        &self,
        resource_type: ResourceType,
        ctx: &RequestContext,
    ) -> Vec<String> {
        let snapshot = self.snapshot.load();
        let mut urls = Vec::new();
        for bundle in snapshot.registry.global_bundles(resource_type) {
            match self.serve(&bundle.id, ctx) {
                Ok(Serving::Production { url, .. }) => urls.push(url),
                Ok(Serving::Debug { paths }) => urls.extend(paths),
                Err(e) => log!("error"; "skipping global bundle `{}`: {e}", bundle.id),
            }
        }
        urls
    }

    /// Cache-busting URL for one binary resource, derived from its bytes.
    pub fn cache_busted_url(&self, path: &str) -> Result<String, ResolutionError> {
        let bytes = self
            .reader
            .read_bytes(path)
            .map_err(|_| ResolutionError::NotFound(path.to_string()))?;
        let digest = blake3::hash(&bytes);
        let short = &hex::encode(digest.as_bytes())[..16];
        Ok(format!("/{CACHE_BUSTER_PREFIX}{short}{path}"))
    }

    fn debug_paths(&self, snapshot: &Snapshot, bundle: &JoinableResourceBundle) -> Vec<String> {
        bundle
            .debug_items
            .iter()
            .map(|item| match snapshot.generators.resolve(item) {
                Some(resolved) => resolved.generator.debug_path(&resolved.reference),
                None => item.clone(),
            })
            .collect()
    }

    /// Eagerly assemble every bundle and combination, in parallel. Runs
    /// only when configured; failures are logged and left for on-demand
    /// retries. Restoring persisted content is limited to cold starts.
    fn warm_up(&self, restore: bool) {
        let snapshot = self.snapshot.load();
        if !snapshot.config.engine.warm_up || snapshot.config.engine.debug {
            return;
        }

        let assembler = BundleAssembler::new(
            self.reader.as_ref(),
            &snapshot.generators,
            snapshot.config.engine.charset,
            snapshot.config.engine.hashcode,
        );

        let mut work: Vec<(&Arc<JoinableResourceBundle>, VariantMap)> = Vec::new();
        for bundle in snapshot.registry.iter() {
            for combo in bundle.variant_combinations() {
                work.push((bundle, combo));
            }
        }

        let restore_possible = restore
            && self
                .persistence
                .as_ref()
                .is_some_and(|p| p.existing_mapping_present());

        work.par_iter().for_each(|(bundle, combo)| {
            let key = BundleStore::key(&bundle.id, combo);
            if restore_possible && snapshot.store.restore(&key) {
                debug!("warmup"; "restored `{key}` from persisted content");
                return;
            }
            let chains = snapshot.registry.chains(&bundle.id);
            if let Err(e) = snapshot
                .store
                .get_or_assemble(&assembler, bundle, &chains, combo)
            {
                log!("warning"; "warm-up of `{}` failed at `{}`: {:#}", e.bundle_id, e.path, e.source);
            }
        });
        debug!("warmup"; "{} assemblies cached", snapshot.store.len());
    }
}

fn build_snapshot(
    config: EngineConfig,
    reader: &dyn ResourceReader,
    persistence: Option<Arc<dyn BundlePersistence>>,
) -> Result<Snapshot, ConfigError> {
    let generators =
        GeneratorFactories::defaults().build_registry(&config.engine.generators)?;
    let processors = ProcessorFactories::defaults();
    let registry = RegistryBuilder::new(&config, reader, &generators, &processors).build()?;
    let store = match persistence {
        Some(persistence) => BundleStore::with_persistence(persistence),
        None => BundleStore::new(),
    };
    Ok(Snapshot {
        config,
        registry,
        generators,
        store,
    })
}

/// Locate the bundle a request path denotes. Exact ids win; otherwise the
/// leading path segment is treated as a `hash` or `hash.suffix` prefix and
/// stripped before retrying.
fn lookup<'a>(
    registry: &'a BundleRegistry,
    path: &str,
) -> Result<(&'a Arc<JoinableResourceBundle>, Option<String>), ResolutionError> {
    if let Some(bundle) = registry.get(path) {
        return Ok((bundle, None));
    }
    if let Some(rest) = path.strip_prefix('/')
        && let Some((prefix, id)) = rest.split_once('/')
        && let Some(bundle) = registry.get(&format!("/{id}"))
    {
        let suffix = prefix.split_once('.').map(|(_, s)| s).unwrap_or("");
        return Ok((bundle, Some(suffix.to_string())));
    }
    Err(ResolutionError::NotFound(path.to_string()))
}

/// Production URL for a bundle: `/{hash}/{id}` or `/{hash}.{suffix}/{id}`
/// when any variant dimension sits off its default.
fn production_url(bundle_id: &str, hash: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("/{hash}{bundle_id}")
    } else {
        format!("/{hash}.{suffix}{bundle_id}")
    }
}

/// Reverse-map a URL variant suffix to the declared combination that
/// produces it.
fn variants_for_suffix(bundle: &JoinableResourceBundle, suffix: &str) -> Option<VariantMap> {
    bundle
        .variant_combinations()
        .into_iter()
        .find(|combo| combo.variant_suffix(&bundle.variants) == suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::FsResourceReader;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("js/lib")).unwrap();
        fs::write(dir.path().join("js/lib/a.js"), "var a = 1").unwrap();
        fs::write(dir.path().join("js/lib/b.js"), "var b = 2").unwrap();
        fs::write(dir.path().join("js/main.js"), "var m = 3").unwrap();
        dir
    }

    fn engine(dir: &TempDir, toml: &str) -> BundleEngine {
        let config = EngineConfig::from_toml(toml).unwrap();
        let reader = Arc::new(FsResourceReader::new(dir.path()));
        BundleEngine::new(config, reader).unwrap()
    }

    const APP_BUNDLE: &str = r#"
        [[bundle]]
        id = "/js/app.js"
        mappings = ["/js/lib/", "/js/main.js"]
    "#;

    #[test]
    fn test_production_serving_end_to_end() {
        let dir = site();
        let engine = engine(&dir, APP_BUNDLE);

        let serving = engine
            .serve("/js/app.js", &RequestContext::default())
            .unwrap();
        let Serving::Production { url, entry } = serving else {
            panic!("expected production serving");
        };
        assert_eq!(entry.content, "var a = 1;\nvar b = 2;\nvar m = 3");
        assert_eq!(url, format!("/{}/js/app.js", entry.hash));

        // The handed-out URL must resolve back to the same content
        let Serving::Production { entry: again, .. } = engine
            .serve(&url, &RequestContext::default())
            .unwrap()
        else {
            panic!("expected production serving");
        };
        assert_eq!(again.content, entry.content);
    }

    #[test]
    fn test_debug_serving_lists_members() {
        let dir = site();
        let engine = engine(
            &dir,
            r#"
                [engine]
                debug = true

                [[bundle]]
                id = "/js/app.js"
                mappings = ["/js/lib/", "/js/main.js"]
            "#,
        );

        let Serving::Debug { paths } = engine
            .serve("/js/app.js", &RequestContext::default())
            .unwrap()
        else {
            panic!("expected debug serving");
        };
        assert_eq!(paths, ["/js/lib/a.js", "/js/lib/b.js", "/js/main.js"]);
    }

    #[test]
    fn test_debug_override_per_request() {
        let dir = site();
        let engine = engine(&dir, APP_BUNDLE);

        let ctx = RequestContext {
            debug: Some(true),
            variants: BTreeMap::new(),
        };
        assert!(matches!(
            engine.serve("/js/app.js", &ctx).unwrap(),
            Serving::Debug { .. }
        ));
    }

    #[test]
    fn test_unknown_path_not_found() {
        let dir = site();
        let engine = engine(&dir, APP_BUNDLE);
        assert!(matches!(
            engine.serve("/js/nope.js", &RequestContext::default()),
            Err(ResolutionError::NotFound(_))
        ));
    }

    #[test]
    fn test_variant_url_carries_suffix() {
        let dir = site();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/a.css"), ".a { color: {skin}; }").unwrap();
        let engine = engine(
            &dir,
            r#"
                [[bundle]]
                id = "/css/all.css"
                mappings = ["/css/"]
                unit-processors = ["skinurl"]

                [[bundle.variants]]
                type = "skin"
                values = ["light", "dark"]
                default = "light"
            "#,
        );

        let ctx = RequestContext {
            debug: None,
            variants: BTreeMap::from([("skin".to_string(), "dark".to_string())]),
        };
        let Serving::Production { url, entry } = engine.serve("/css/all.css", &ctx).unwrap()
        else {
            panic!("expected production serving");
        };
        assert!(entry.content.contains("color: dark"));
        assert!(url.contains(".dark/"), "url was `{url}`");

        // Default skin requests get the unsuffixed URL and distinct content
        let Serving::Production { url: default_url, entry: default_entry } = engine
            .serve("/css/all.css", &RequestContext::default())
            .unwrap()
        else {
            panic!("expected production serving");
        };
        assert!(default_entry.content.contains("color: light"));
        assert!(!default_url.contains(".dark/"));
    }

    #[test]
    fn test_rebuild_swaps_registry() {
        let dir = site();
        let engine = engine(&dir, APP_BUNDLE);
        assert!(engine.serve("/js/app.js", &RequestContext::default()).is_ok());

        let config = EngineConfig::from_toml(
            r#"
                [[bundle]]
                id = "/js/other.js"
                mappings = ["/js/main.js"]
            "#,
        )
        .unwrap();
        engine.rebuild(config).unwrap();

        assert!(engine.serve("/js/app.js", &RequestContext::default()).is_err());
        assert!(engine.serve("/js/other.js", &RequestContext::default()).is_ok());
    }

    #[test]
    fn test_poll_changes_invalidates_cached_assemblies() {
        struct AlwaysChanged;
        impl ChangeDetector for AlwaysChanged {
            fn has_changed(&self) -> bool {
                true
            }
        }

        let dir = site();
        let config = EngineConfig::from_toml(APP_BUNDLE).unwrap();
        let reader = Arc::new(FsResourceReader::new(dir.path()));
        let engine =
            BundleEngine::with_services(config, reader, None, Arc::new(AlwaysChanged)).unwrap();

        let Serving::Production { entry: before, .. } = engine
            .serve("/js/app.js", &RequestContext::default())
            .unwrap()
        else {
            panic!("expected production serving");
        };

        fs::write(dir.path().join("js/main.js"), "var m = 99").unwrap();
        assert!(engine.poll_changes().unwrap());

        let Serving::Production { entry: after, .. } = engine
            .serve("/js/app.js", &RequestContext::default())
            .unwrap()
        else {
            panic!("expected production serving");
        };
        assert!(after.content.contains("var m = 99"));
        assert_ne!(before.hash, after.hash);
    }

    #[test]
    fn test_global_urls_ordered() {
        let dir = site();
        let engine = engine(
            &dir,
            r#"
                [[bundle]]
                id = "/js/second.js"
                mappings = ["/js/main.js"]
                global = true
                order = 2

                [[bundle]]
                id = "/js/first.js"
                mappings = ["/js/lib/"]
                global = true
                order = 1
            "#,
        );

        let urls = engine.global_urls(ResourceType::Js, &RequestContext::default());
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("/js/first.js"));
        assert!(urls[1].ends_with("/js/second.js"));
    }

    #[test]
    fn test_warm_up_persists_assemblies() {
        let dir = site();
        let work = TempDir::new().unwrap();
        let config = EngineConfig::from_toml(
            r#"
                [engine]
                warm-up = true

                [[bundle]]
                id = "/js/app.js"
                mappings = ["/js/lib/", "/js/main.js"]
            "#,
        )
        .unwrap();
        let reader = Arc::new(FsResourceReader::new(dir.path()));
        let persistence = Arc::new(crate::reader::FsBundlePersistence::new(work.path()));
        BundleEngine::with_services(
            config,
            reader,
            Some(persistence.clone()),
            Arc::new(NoChangeDetector),
        )
        .unwrap();

        // Warm-up assembled and persisted the bundle without any request
        assert!(persistence.existing_mapping_present());
        assert_eq!(persistence.persisted_keys(), ["/js/app.js"]);
    }

    #[test]
    fn test_change_rebuild_skips_persisted_restore() {
        struct AlwaysChanged;
        impl ChangeDetector for AlwaysChanged {
            fn has_changed(&self) -> bool {
                true
            }
        }

        const WARM_APP: &str = r#"
            [engine]
            warm-up = true

            [[bundle]]
            id = "/js/app.js"
            mappings = ["/js/main.js"]
        "#;

        let dir = site();
        let work = TempDir::new().unwrap();
        fs::write(dir.path().join("js/main.js"), "var m = 1").unwrap();
        let reader = Arc::new(FsResourceReader::new(dir.path()));
        let persistence = Arc::new(crate::reader::FsBundlePersistence::new(work.path()));
        let engine = BundleEngine::with_services(
            EngineConfig::from_toml(WARM_APP).unwrap(),
            reader,
            Some(persistence),
            Arc::new(AlwaysChanged),
        )
        .unwrap();

        // A detected change on disk must beat the persisted warm-up copy
        fs::write(dir.path().join("js/main.js"), "var m = 2").unwrap();
        assert!(engine.poll_changes().unwrap());

        let Serving::Production { entry, .. } = engine
            .serve("/js/app.js", &RequestContext::default())
            .unwrap()
        else {
            panic!("expected production serving");
        };
        assert_eq!(entry.content, "var m = 2");
    }

    #[test]
    fn test_cache_busted_url() {
        let dir = site();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img/logo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        let engine = engine(&dir, APP_BUNDLE);

        let url = engine.cache_busted_url("/img/logo.png").unwrap();
        assert!(url.starts_with("/cb"));
        assert!(url.ends_with("/img/logo.png"));
        assert_eq!(url, engine.cache_busted_url("/img/logo.png").unwrap());
    }
}
