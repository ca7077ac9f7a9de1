//! Registry construction: expanding definitions into an immutable bundle
//! snapshot.
//!
//! The configuration-build phase exclusively owns construction; serving
//! only reads the result. A reload builds an entirely new registry and the
//! engine swaps it atomically.

use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::debug;
use crate::error::ConfigError;
use crate::generator::GeneratorRegistry;
use crate::mapping::orphan::OrphanResourceMapper;
use crate::mapping::{PathMapping, PathMappingResolver, ResolvedItems};
use crate::postprocess::{ProcessorChain, ProcessorFactories};
use crate::reader::ResourceReader;

use super::{DebugInclusion, InclusionPattern, JoinableResourceBundle, ResourceType};

/// Built processor chains for one bundle.
#[derive(Default, Clone)]
pub struct BundleChains {
    /// Applied to each member's content before concatenation
    pub unit: ProcessorChain,
    /// Applied once to the joined bundle content
    pub composite: ProcessorChain,
}

// ============================================================================
// BundleRegistry
// ============================================================================

/// Immutable snapshot of every declared and implicit bundle.
#[derive(Default)]
pub struct BundleRegistry {
    bundles: Vec<Arc<JoinableResourceBundle>>,
    by_id: BTreeMap<String, Arc<JoinableResourceBundle>>,
    chains: BTreeMap<String, BundleChains>,
}

impl BundleRegistry {
    pub fn get(&self, id: &str) -> Option<&Arc<JoinableResourceBundle>> {
        self.by_id.get(id)
    }

    pub fn chains(&self, id: &str) -> BundleChains {
        self.chains.get(id).cloned().unwrap_or_default()
    }

    /// All bundles in declaration order, implicit orphan bundles last.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<JoinableResourceBundle>> {
        self.bundles.iter()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Global bundles for a resource type, by inclusion order.
    pub fn global_bundles(&self, resource_type: ResourceType) -> Vec<&Arc<JoinableResourceBundle>> {
        let mut globals: Vec<_> = self
            .bundles
            .iter()
            .filter(|b| b.inclusion.global && b.resource_type == resource_type)
            .collect();
        globals.sort_by_key(|b| b.inclusion.order);
        globals
    }
}

// ============================================================================
// RegistryBuilder
// ============================================================================

/// Builds a [`BundleRegistry`] from an [`EngineConfig`].
pub struct RegistryBuilder<'a> {
    config: &'a EngineConfig,
    reader: &'a dyn ResourceReader,
    generators: &'a GeneratorRegistry,
    processors: &'a ProcessorFactories,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(
        config: &'a EngineConfig,
        reader: &'a dyn ResourceReader,
        generators: &'a GeneratorRegistry,
        processors: &'a ProcessorFactories,
    ) -> Self {
        Self {
            config,
            reader,
            generators,
            processors,
        }
    }

    pub fn build(self) -> Result<BundleRegistry, ConfigError> {
        let mut bundle_ids: FxHashSet<String> = FxHashSet::default();
        for def in &self.config.bundles {
            if !bundle_ids.insert(def.id.clone()) {
                return Err(ConfigError::DuplicateBundlePath(def.id.clone()));
            }
        }

        detect_cycles(self.config)?;

        // Expand every non-composite bundle first; composites concatenate
        // their children's resolved lists afterwards.
        let mut built: BTreeMap<String, JoinableResourceBundle> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        for def in &self.config.bundles {
            if def.children.is_empty() {
                built.insert(def.id.clone(), self.build_simple(def, &bundle_ids)?);
            }
            order.push(def.id.clone());
        }
        for def in &self.config.bundles {
            if !def.children.is_empty() {
                let composite = self.build_composite(def, &built)?;
                built.insert(def.id.clone(), composite);
            }
        }

        // Variant discovery pre-pass: runs once per rebuild, before any
        // assembly, so every combination the chain can produce is known.
        let mut chains: BTreeMap<String, BundleChains> = BTreeMap::new();
        for bundle in built.values_mut() {
            let bundle_chains = BundleChains {
                unit: self.processors.build_chain(&bundle.unit_processors)?,
                composite: self.processors.build_chain(&bundle.composite_processors)?,
            };
            for discovered in bundle_chains
                .unit
                .discover_variants()
                .iter()
                .chain(bundle_chains.composite.discover_variants().iter())
            {
                bundle.merge_variant(discovered);
            }
            self.merge_generator_variants(bundle);
            chains.insert(bundle.id.clone(), bundle_chains);
        }

        // Orphan collection consumes the final set of declared item lists
        let orphans = self.collect_orphans(&built, &bundle_ids)?;
        for orphan in orphans {
            order.push(orphan.id.clone());
            chains.insert(orphan.id.clone(), BundleChains::default());
            built.insert(orphan.id.clone(), orphan);
        }

        let mut registry = BundleRegistry::default();
        for id in order {
            let bundle = Arc::new(built[&id].clone());
            registry.by_id.insert(id, Arc::clone(&bundle));
            registry.bundles.push(bundle);
        }
        registry.chains = chains;
        Ok(registry)
    }

    fn build_simple(
        &self,
        def: &crate::config::BundleDefinition,
        bundle_ids: &FxHashSet<String>,
    ) -> Result<JoinableResourceBundle, ConfigError> {
        let resource_type = def.resource_type().ok_or_else(|| {
            ConfigError::InvalidMapping {
                bundle: def.id.clone(),
                mapping: def.id.clone(),
                reason: "bundle id has no recognized resource extension".to_string(),
            }
        })?;

        let resolver = PathMappingResolver::new(
            self.reader,
            self.generators,
            resource_type.extension(),
            bundle_ids,
        );
        let mut resolved = ResolvedItems::new();
        for raw in &def.mappings {
            let mapping = PathMapping::parse(&def.id, raw);
            resolver.resolve(&mapping, &mut resolved)?;
        }
        let (items, licenses) = resolved.into_items();
        debug!("bundle"; "`{}` resolved {} members", def.id, items.len());

        let inclusion = InclusionPattern {
            global: def.global,
            order: def.order,
            debug: def.debug,
        };
        let (prod_items, debug_items) = split_by_inclusion(&items, inclusion.debug);

        let mut variants = BTreeMap::new();
        for set in &def.variants {
            variants.insert(set.type_name.clone(), set.clone());
        }

        Ok(JoinableResourceBundle {
            id: def.id.clone(),
            name: def.display_name(),
            resource_type,
            inclusion,
            items: prod_items,
            debug_items,
            licenses,
            variants,
            unit_processors: def.unit_processors.clone(),
            composite_processors: def.composite_processors.clone(),
            children: Vec::new(),
        })
    }

    /// A composite's effective item list concatenates its children's
    /// lists, honoring each child's own inclusion pattern.
    fn build_composite(
        &self,
        def: &crate::config::BundleDefinition,
        built: &BTreeMap<String, JoinableResourceBundle>,
    ) -> Result<JoinableResourceBundle, ConfigError> {
        let resource_type = def.resource_type().ok_or_else(|| {
            ConfigError::InvalidMapping {
                bundle: def.id.clone(),
                mapping: def.id.clone(),
                reason: "bundle id has no recognized resource extension".to_string(),
            }
        })?;

        let mut items = Vec::new();
        let mut debug_items = Vec::new();
        let mut licenses = std::collections::BTreeSet::new();
        let mut variants: BTreeMap<String, crate::variant::VariantSet> = BTreeMap::new();

        for child_id in &def.children {
            let child = built.get(child_id).ok_or_else(|| {
                // Children that are themselves composites are not supported
                ConfigError::InvalidMapping {
                    bundle: def.id.clone(),
                    mapping: child_id.clone(),
                    reason: "composite children must be simple bundles".to_string(),
                }
            })?;
            if !child.inclusion.include_only_on_debug() {
                items.extend(child.items.iter().cloned());
            }
            if !child.inclusion.exclude_on_debug() {
                debug_items.extend(child.debug_items.iter().cloned());
            }
            licenses.extend(child.licenses.iter().cloned());
            for set in child.variants.values() {
                match variants.get_mut(&set.type_name) {
                    Some(existing) => existing.merge(set),
                    None => {
                        variants.insert(set.type_name.clone(), set.clone());
                    }
                }
            }
        }
        for set in &def.variants {
            match variants.get_mut(&set.type_name) {
                Some(existing) => existing.merge(set),
                None => {
                    variants.insert(set.type_name.clone(), set.clone());
                }
            }
        }

        Ok(JoinableResourceBundle {
            id: def.id.clone(),
            name: def.display_name(),
            resource_type,
            inclusion: InclusionPattern {
                global: def.global,
                order: def.order,
                debug: def.debug,
            },
            items,
            debug_items,
            licenses,
            variants,
            unit_processors: def.unit_processors.clone(),
            composite_processors: def.composite_processors.clone(),
            children: def.children.clone(),
        })
    }

    /// Union of advertised variant dimensions across all generators
    /// reachable from the bundle's members.
    fn merge_generator_variants(&self, bundle: &mut JoinableResourceBundle) {
        let items: Vec<String> = bundle.items.clone();
        for item in items {
            let Some(resolved) = self.generators.resolve(&item) else {
                continue;
            };
            for set in resolved
                .generator
                .available_variants(&resolved.reference.inner, self.reader)
            {
                bundle.merge_variant(&set);
            }
        }
    }

    fn collect_orphans(
        &self,
        built: &BTreeMap<String, JoinableResourceBundle>,
        bundle_ids: &FxHashSet<String>,
    ) -> Result<Vec<JoinableResourceBundle>, ConfigError> {
        let mut orphans = Vec::new();
        for scope in &self.config.engine.orphan_scopes {
            let mut claimed: FxHashSet<String> = FxHashSet::default();
            for bundle in built.values() {
                claimed.extend(bundle.items.iter().cloned());
                claimed.extend(bundle.debug_items.iter().cloned());
                claimed.extend(bundle.licenses.iter().cloned());
            }

            let mapper =
                OrphanResourceMapper::new(self.reader, scope.resource_type.extension());
            for path in mapper.collect(&scope.root, &claimed, bundle_ids)? {
                debug!("orphan"; "implicit bundle for `{path}`");
                orphans.push(JoinableResourceBundle {
                    id: path.clone(),
                    name: path.clone(),
                    resource_type: scope.resource_type,
                    inclusion: InclusionPattern::default(),
                    items: vec![path.clone()],
                    debug_items: vec![path],
                    licenses: std::collections::BTreeSet::new(),
                    variants: BTreeMap::new(),
                    unit_processors: Vec::new(),
                    composite_processors: Vec::new(),
                    children: Vec::new(),
                });
            }
        }
        Ok(orphans)
    }
}

/// Production/debug item split for one bundle's own inclusion mode.
fn split_by_inclusion(items: &[String], debug: DebugInclusion) -> (Vec<String>, Vec<String>) {
    let prod = if debug == DebugInclusion::Only {
        Vec::new()
    } else {
        items.to_vec()
    };
    let dbg = if debug == DebugInclusion::Never {
        Vec::new()
    } else {
        items.to_vec()
    };
    (prod, dbg)
}

/// DFS over composite parent->child edges with an explicit visiting set;
/// a back edge reports the cycle's member ids in discovery order.
fn detect_cycles(config: &EngineConfig) -> Result<(), ConfigError> {
    #[derive(PartialEq, Clone, Copy)]
    enum State {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        config: &EngineConfig,
        states: &mut BTreeMap<String, State>,
        path: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        match states.get(id) {
            Some(State::Done) => return Ok(()),
            Some(State::Visiting) => {
                let start = path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(id.to_string());
                return Err(ConfigError::CircularDependency(cycle));
            }
            None => {}
        }
        states.insert(id.to_string(), State::Visiting);
        path.push(id.to_string());
        if let Some(def) = config.bundles.iter().find(|b| b.id == id) {
            for child in &def.children {
                visit(child, config, states, path)?;
            }
        }
        path.pop();
        states.insert(id.to_string(), State::Done);
        Ok(())
    }

    let mut states = BTreeMap::new();
    let mut path = Vec::new();
    for def in &config.bundles {
        visit(&def.id, config, &mut states, &mut path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::generator::GeneratorFactories;
    use crate::reader::FsResourceReader;
    use std::fs;
    use tempfile::TempDir;

    fn build(dir: &TempDir, toml: &str) -> Result<BundleRegistry, ConfigError> {
        let config = EngineConfig::from_toml(toml)?;
        let reader = FsResourceReader::new(dir.path());
        let generators = GeneratorFactories::defaults()
            .build_registry(&config.engine.generators)
            .unwrap();
        let processors = ProcessorFactories::defaults();
        RegistryBuilder::new(&config, &reader, &generators, &processors).build()
    }

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("js/lib")).unwrap();
        fs::write(dir.path().join("js/lib/a.js"), "var a;").unwrap();
        fs::write(dir.path().join("js/lib/b.js"), "var b;").unwrap();
        fs::write(dir.path().join("js/main.js"), "var m;").unwrap();
        dir
    }

    #[test]
    fn test_build_simple_registry() {
        let dir = site();
        let registry = build(
            &dir,
            r#"
                [[bundle]]
                id = "/js/app.js"
                mappings = ["/js/lib/", "/js/main.js"]
            "#,
        )
        .unwrap();

        let bundle = registry.get("/js/app.js").unwrap();
        assert_eq!(
            bundle.items,
            ["/js/lib/a.js", "/js/lib/b.js", "/js/main.js"]
        );
        assert_eq!(bundle.items, bundle.debug_items);
    }

    #[test]
    fn test_duplicate_id_raises_duplicate_path() {
        let dir = site();
        let config = EngineConfig {
            bundles: vec![
                crate::config::BundleDefinition {
                    id: "/js/app.js".to_string(),
                    name: None,
                    mappings: vec!["/js/main.js".to_string()],
                    global: false,
                    order: 0,
                    debug: DebugInclusion::Always,
                    children: Vec::new(),
                    variants: Vec::new(),
                    unit_processors: Vec::new(),
                    composite_processors: Vec::new(),
                },
                crate::config::BundleDefinition {
                    id: "/js/app.js".to_string(),
                    name: None,
                    mappings: vec!["/js/main.js".to_string()],
                    global: false,
                    order: 0,
                    debug: DebugInclusion::Always,
                    children: Vec::new(),
                    variants: Vec::new(),
                    unit_processors: Vec::new(),
                    composite_processors: Vec::new(),
                },
            ],
            ..EngineConfig::default()
        };
        let reader = FsResourceReader::new(dir.path());
        let generators = GeneratorFactories::defaults()
            .build_registry(&["virtual".to_string()])
            .unwrap();
        let processors = ProcessorFactories::defaults();
        let err = RegistryBuilder::new(&config, &reader, &generators, &processors)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::DuplicateBundlePath(p) if p == "/js/app.js"));
    }

    #[test]
    fn test_composite_concatenates_children() {
        let dir = site();
        let registry = build(
            &dir,
            r#"
                [[bundle]]
                id = "/js/all.js"
                children = ["/js/libs.js", "/js/dev.js"]

                [[bundle]]
                id = "/js/libs.js"
                mappings = ["/js/lib/"]

                [[bundle]]
                id = "/js/dev.js"
                mappings = ["/js/main.js"]
                debug = "only"
            "#,
        )
        .unwrap();

        let all = registry.get("/js/all.js").unwrap();
        assert!(all.is_composite());
        // debug-only child excluded from production items
        assert_eq!(all.items, ["/js/lib/a.js", "/js/lib/b.js"]);
        // but present in the debug list
        assert_eq!(
            all.debug_items,
            ["/js/lib/a.js", "/js/lib/b.js", "/js/main.js"]
        );
    }

    #[test]
    fn test_cycle_detection() {
        let dir = site();
        let err = build(
            &dir,
            r#"
                [[bundle]]
                id = "/js/a.js"
                children = ["/js/b.js"]

                [[bundle]]
                id = "/js/b.js"
                children = ["/js/a.js"]
            "#,
        )
        .err()
        .unwrap();
        match err {
            ConfigError::CircularDependency(cycle) => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_orphan_scope_creates_implicit_bundles() {
        let dir = site();
        fs::write(dir.path().join("js/stray.js"), "var s;").unwrap();
        let registry = build(
            &dir,
            r#"
                [engine]
                orphan-scopes = [{ root = "/js", type = "js" }]

                [[bundle]]
                id = "/js/app.js"
                mappings = ["/js/lib/", "/js/main.js"]
            "#,
        )
        .unwrap();

        let orphan = registry.get("/js/stray.js").expect("orphan bundle");
        assert_eq!(orphan.items, ["/js/stray.js"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_chain_discovery_extends_variants() {
        let dir = site();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/a.css"), ".a{}").unwrap();
        let registry = build(
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
        )
        .unwrap();

        let bundle = registry.get("/css/all.css").unwrap();
        let skins = &bundle.variants["skin"];
        // declared values kept, discovery-capability value merged in
        assert!(skins.contains("light"));
        assert!(skins.contains("dark"));
        assert!(skins.contains("default"));
        assert_eq!(skins.default, "light");
    }
}
