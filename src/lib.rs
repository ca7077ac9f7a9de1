//! resbundle - a variant-aware resource bundling engine.
//!
//! Declared bundles map logical, `/`-rooted paths onto sets of member
//! resources (concrete files or generator-produced virtual paths). The
//! engine resolves those mappings once per configuration build, joins and
//! post-processes each bundle per variant combination on demand, caches
//! the results under content-derived hashes, and serves either the joined
//! production form or the individual members in debug mode.
//!
//! ```no_run
//! use std::sync::Arc;
//! use resbundle::{BundleEngine, EngineConfig, FsResourceReader, RequestContext};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EngineConfig::load("resbundle.toml".as_ref())?;
//! let reader = Arc::new(FsResourceReader::new("webroot"));
//! let engine = BundleEngine::new(config, reader)?;
//! let serving = engine.serve("/js/app.js", &RequestContext::default())?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod hash;
pub mod logger;
pub mod mapping;
pub mod postprocess;
pub mod reader;
pub mod store;
pub mod variant;

pub use assembler::{AssembledBundle, BundleAssembler};
pub use bundle::{
    BundleRegistry, DebugInclusion, InclusionPattern, JoinableResourceBundle, RegistryBuilder,
    ResourceType,
};
pub use config::EngineConfig;
pub use engine::{BundleEngine, RequestContext, Serving};
pub use error::{BundlingError, ConfigError, ResolutionError};
pub use generator::{GeneratorRegistry, ResourceGenerator};
pub use hash::HashcodeGenerator;
pub use reader::{
    BundlePersistence, ChangeDetector, Encoding, FsBundlePersistence, FsResourceReader,
    NoChangeDetector, ResourceReader,
};
pub use store::{BundleStore, StoreEntry};
pub use variant::{VariantMap, VariantSet};
