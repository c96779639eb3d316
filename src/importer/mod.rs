//! Graph building.
//!
//! The [`Importer`] drives one build session: load a file, run the pre-pass,
//! rewrite it, then build every discovered child concurrently and register
//! the file only after all of them finished. Registration order is therefore
//! a post-order traversal of the graph, which is what lets a file's body
//! look up its imports at execution time.

pub mod diagnostics;
pub mod node;
pub mod resolver;
pub mod rewrite;

pub use diagnostics::{ImportError, ImportErrorKind, ImportResult};
pub use node::{Binding, ImportNode};
pub use resolver::ResolveContext;
pub use rewrite::Rewritten;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinSet;

use crate::config::ImporterConfig;
use crate::loader::{CacheStore, DefaultTransport, Loader, Store, Transport};
use crate::pipeline::{NoopPrePass, PrePass};
use crate::registry::Assembler;

pub struct Importer {
    config: Arc<ImporterConfig>,
    loader: Arc<Loader>,
    pre_pass: Arc<dyn PrePass>,
    assembler: Mutex<Assembler>,
    /// The built graph, retained for the life of the session.
    root: Mutex<Option<ImportNode>>,
}

impl Importer {
    pub fn new(config: ImporterConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(DefaultTransport::new()),
            Store::in_memory(),
            Arc::new(NoopPrePass),
        )
    }

    pub fn with_transport(config: ImporterConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(config, transport, Store::in_memory(), Arc::new(NoopPrePass))
    }

    pub fn with_parts(
        config: ImporterConfig,
        transport: Arc<dyn Transport>,
        store: Store,
        pre_pass: Arc<dyn PrePass>,
    ) -> Self {
        let config = Arc::new(config);
        let loader = Arc::new(Loader::new(
            Arc::clone(&config),
            transport,
            CacheStore::new(store),
        ));
        Self {
            config,
            loader,
            pre_pass,
            assembler: Mutex::new(Assembler::new()),
            root: Mutex::new(None),
        }
    }

    /// Builds the whole graph behind `entry` and returns the assembled
    /// program. The graph itself stays on the session for introspection.
    pub async fn run(self: &Arc<Self>, entry: &str) -> ImportResult<String> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(ImportError::resolution(entry, "empty entry reference"));
        }

        let (domain, entry_ref) = resolver::split_entry(entry);
        let ctx = Arc::new(ResolveContext::from_config(&self.config).with_domain(domain));
        let root_path = resolver::resolve(&entry_ref, "/", &ctx);

        let start = Instant::now();
        let root = self
            .build(ImportNode::entry(root_path), ctx, Arc::new(Vec::new()))
            .await?;
        let program = self.assembler.lock().unwrap().final_script();

        if self.config.debug {
            if let Ok(map) = serde_json::to_string_pretty(&root.dependency_map()) {
                eprintln!("{}", map);
            }
            eprintln!(
                "esimport: assembled {} file(s) in {:?}",
                self.assembler.lock().unwrap().len(),
                start.elapsed()
            );
        }

        *self.root.lock().unwrap() = Some(root);
        Ok(program)
    }

    /// `None` before the first successful [`run`](Self::run).
    pub fn dependency_map(&self) -> Option<serde_json::Value> {
        self.root.lock().unwrap().as_ref().map(ImportNode::dependency_map)
    }

    /// Joins every background cache refresh spawned by this session.
    pub async fn await_refreshes(&self) {
        self.loader.await_refreshes().await;
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    fn build(
        self: &Arc<Self>,
        node: ImportNode,
        ctx: Arc<ResolveContext>,
        chain: Arc<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = ImportResult<ImportNode>> + Send + 'static>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            let mut node = node;
            if node.loaded {
                return Ok(node);
            }
            if chain.contains(&node.canonical_path) {
                let mut cycle = (*chain).clone();
                cycle.push(node.canonical_path.clone());
                return Err(ImportError::cycle(cycle));
            }

            let raw = this
                .loader
                .load(&node.canonical_path)
                .await
                .map_err(|e| e.with_dependency_chain((*chain).clone()))?;
            let converted = this.pre_pass.convert(&node.canonical_path, &raw);
            let rewritten = rewrite::rewrite(&node.canonical_path, &converted, &ctx)?;
            node.script = Some(rewritten.text);

            let mut child_chain = (*chain).clone();
            child_chain.push(node.canonical_path.clone());
            let child_chain = Arc::new(child_chain);

            // Fan out over the children, then join. Results come back in
            // completion order; the index restores discovery order. A
            // sibling failure drops the set, which aborts the rest.
            let child_count = rewritten.imports.len();
            let mut set = JoinSet::new();
            for (index, child) in rewritten.imports.into_iter().enumerate() {
                let importer = Arc::clone(&this);
                let ctx = Arc::clone(&ctx);
                let chain = Arc::clone(&child_chain);
                set.spawn(async move { (index, importer.build(child, ctx, chain).await) });
            }

            let mut built: Vec<Option<ImportNode>> = Vec::with_capacity(child_count);
            built.resize_with(child_count, || None);
            while let Some(joined) = set.join_next().await {
                let (index, result) = joined.map_err(|e| {
                    ImportError::io(&node.canonical_path, format!("dependency task failed: {}", e))
                })?;
                match result {
                    Ok(child) => built[index] = Some(child),
                    Err(err) => return Err(err),
                }
            }
            node.dependencies = built.into_iter().flatten().collect();

            let unit = node.wrapped_script().ok_or_else(|| {
                ImportError::rewrite(&node.canonical_path, "rewrite produced no script")
            })?;
            this.assembler
                .lock()
                .unwrap()
                .append(&node.canonical_path, &unit);
            node.loaded = true;
            Ok(node)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::loader::{FetchFuture, FetchedText};

    struct MapTransport {
        files: HashMap<String, String>,
        fetches: AtomicUsize,
    }

    impl MapTransport {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(path, text)| (path.to_string(), text.to_string()))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for MapTransport {
        fn get<'a>(&'a self, target: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                match self.files.get(target) {
                    Some(body) => Ok(FetchedText {
                        body: body.clone(),
                        resolved_url: target.to_string(),
                    }),
                    None => Err(ImportError::fetch_failed(target, "HTTP 404 Not Found")),
                }
            })
        }
    }

    fn importer(files: &[(&str, &str)]) -> (Arc<Importer>, Arc<MapTransport>) {
        let transport = Arc::new(MapTransport::new(files));
        let importer = Arc::new(Importer::with_transport(
            ImporterConfig::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
        ));
        (importer, transport)
    }

    #[tokio::test]
    async fn test_single_import_graph() {
        let (importer, _) = importer(&[
            ("/main.js", "import { x } from './a';\nconsole.log(x);\n"),
            ("/a.js", "export let x = 5;\n"),
        ]);

        let program = importer.run("/main.js").await.unwrap();
        assert!(program.contains("ei.export('/a.js', 'x', x);"));
        assert!(program.contains("const x = ei.import('/a.js', 'x');"));

        // The dependency registers before its importer.
        let a = program.find("ei.export('/a.js'").unwrap();
        let main = program.find("const x = ei.import").unwrap();
        assert!(a < main);
    }

    #[tokio::test]
    async fn test_diamond_fetches_and_assembles_once() {
        let (importer, transport) = importer(&[
            (
                "/main.js",
                "import { x } from './a';\nimport { y } from './b';\n",
            ),
            ("/a.js", "import { z } from './shared';\nexport let x = 1;\n"),
            ("/b.js", "import { z } from './shared';\nexport let y = 2;\n"),
            ("/shared.js", "export let z = 3;\n"),
        ]);

        let program = importer.run("/main.js").await.unwrap();

        // Four files, four fetches: the shared leaf is fetched once even
        // though two siblings reference it.
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(program.matches("ei.export('/shared.js', 'z', z);").count(), 1);

        // Both references still see their own node in the graph.
        let map = importer.dependency_map().unwrap();
        let children = map["/main.js"].as_array().unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_dependency_aborts_build() {
        let (importer, _) = importer(&[("/main.js", "import { x } from './absent';\n")]);

        let err = importer.run("/main.js").await.unwrap_err();
        match err.kind {
            ImportErrorKind::Fetch { ref url, .. } => assert_eq!(url, "/absent.js"),
            ref other => panic!("expected Fetch, got {:?}", other),
        }
        assert_eq!(err.dependency_chain, vec!["/main.js".to_string()]);
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        let (importer, _) = importer(&[
            ("/a.js", "import { b } from './b';\nexport let a = 1;\n"),
            ("/b.js", "import { a } from './a';\nexport let b = 2;\n"),
        ]);

        let err = importer.run("/a.js").await.unwrap_err();
        match err.kind {
            ImportErrorKind::Cycle { ref chain } => {
                assert_eq!(chain, &vec![
                    "/a.js".to_string(),
                    "/b.js".to_string(),
                    "/a.js".to_string(),
                ]);
            }
            ref other => panic!("expected Cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_program_starts_with_registry_prelude() {
        let (importer, _) = importer(&[("/main.js", "console.log('hi');\n")]);
        let program = importer.run("/main.js").await.unwrap();
        assert!(program.starts_with("window.ei = (function () {"));
    }
}
