//! Runtime ES-module loader.
//!
//! Given an entry file reference, `esimport` discovers the transitive import
//! graph, rewrites each file's import/export declarations into calls against
//! a shared registry object (`ei`), concatenates the rewritten files in
//! dependency order, and hands the assembled program to a host for
//! execution. It emulates a module system on hosts that cannot resolve
//! static modules themselves.
//!
//! The pipeline: [`Importer`] drives the build; [`loader::Loader`] fetches
//! with promise memoization, a versioned persistent cache, and background
//! refresh; [`importer::rewrite`] does the declaration rewriting;
//! [`registry::Assembler`] accumulates the final program.

pub mod config;
pub mod host;
pub mod importer;
pub mod loader;
pub mod pipeline;
pub mod registry;

pub use config::{EntryDirective, ImporterConfig, ModuleConfig};
pub use host::{ScriptHost, SinkHost};
pub use importer::{
    Binding, ImportError, ImportErrorKind, ImportNode, ImportResult, Importer, ResolveContext,
};
pub use loader::{
    CacheEntry, CacheStore, DefaultTransport, FetchedText, JsonFileStore, KvStore, Loader,
    MemoryStore, Store, Transport,
};
pub use pipeline::{NoopPrePass, PrePass};
pub use registry::{Assembler, ModuleRegistry, REGISTRY_PRELUDE};

use std::sync::Arc;

/// Builds the graph behind `entry` with a default session and returns the
/// assembled program.
pub async fn assemble(entry: &str) -> ImportResult<String> {
    let importer = Arc::new(Importer::new(ImporterConfig::default()));
    importer.run(entry).await
}

/// Blocking wrapper around [`assemble`] for callers without a runtime.
pub fn assemble_sync(entry: &str) -> ImportResult<String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| ImportError::io(entry, e.to_string()))?;
    runtime.block_on(assemble(entry))
}
