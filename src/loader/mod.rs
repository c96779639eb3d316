//! Fetch orchestration.
//!
//! One [`Loader`] lives per build session. It guarantees that a canonical
//! path is fetched at most once no matter how many nodes reference it, that
//! cached module text is served immediately while a background refresh keeps
//! the cache warm, and that a slow or dead network degrades to whatever the
//! cache still holds instead of failing the build outright.

pub mod cache;
pub mod store;
pub mod transport;

pub use cache::{CacheEntry, CacheStore, content_hash, versions_match};
pub use store::{JsonFileStore, KvStore, MemoryStore, Store};
pub use transport::{DefaultTransport, FetchFuture, FetchedText, Transport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{ImporterConfig, ModuleConfig};
use crate::importer::diagnostics::{ImportError, ImportResult};

pub struct Loader {
    config: Arc<ImporterConfig>,
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    /// Promise memoization: concurrent loads of one path share one fetch.
    memo: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    /// Background refreshes in flight; joined on demand, never awaited by
    /// the load that spawned them.
    refreshes: Mutex<Vec<JoinHandle<()>>>,
}

impl Loader {
    pub fn new(
        config: Arc<ImporterConfig>,
        transport: Arc<dyn Transport>,
        cache: CacheStore,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            memo: Mutex::new(HashMap::new()),
            refreshes: Mutex::new(Vec::new()),
        }
    }

    pub async fn load(&self, path: &str) -> ImportResult<String> {
        let cell = {
            let mut memo = self.memo.lock().unwrap();
            memo.entry(path.to_string()).or_default().clone()
        };
        // Only successful loads stick; a failed attempt leaves the cell
        // empty so a later call can retry.
        cell.get_or_try_init(|| self.fetch_or_cache(path))
            .await
            .map(|text| text.clone())
    }

    async fn fetch_or_cache(&self, path: &str) -> ImportResult<String> {
        let module_config = self.config.module_config_for_path(path).cloned();
        let use_cache = self.config.cache_all
            || (self.config.cache_modules && self.config.is_module_path(path));

        if !use_cache {
            return self.fetch_fresh(path, module_config.as_ref(), false).await;
        }

        if let Some(entry) = self.cache.lookup(path, module_config.as_ref()) {
            self.spawn_refresh(path, module_config);
            return Ok(entry.text);
        }

        match self.fetch_fresh(path, module_config.as_ref(), true).await {
            Ok(text) => Ok(text),
            Err(err) => match self.cache.lookup_any(path) {
                Some(stale) => {
                    if self.config.debug {
                        eprintln!("esimport: fetch for {} failed; serving cached copy", path);
                    }
                    Ok(stale.text)
                }
                None => Err(err),
            },
        }
    }

    async fn fetch_fresh(
        &self,
        path: &str,
        module_config: Option<&ModuleConfig>,
        record: bool,
    ) -> ImportResult<String> {
        let target = fetch_target(path, module_config);
        let fetched = match timeout(self.config.request_timeout, self.transport.get(&target)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ImportError::fetch_timeout(
                    &target,
                    self.config.request_timeout,
                ));
            }
        };

        if record {
            let entry = build_entry(fetched.clone(), module_config);
            if let Err(err) = self.cache.record(path, &entry) {
                if self.config.debug {
                    eprintln!("esimport: cannot cache {}: {}", path, err);
                }
            }
        }
        Ok(fetched.body)
    }

    /// Fire-and-forget cache refresh. The caller already got its text; this
    /// only rewrites the entry if the network answers within the refresh
    /// window.
    fn spawn_refresh(&self, path: &str, module_config: Option<ModuleConfig>) {
        let transport = Arc::clone(&self.transport);
        let cache = self.cache.clone();
        let window = self.config.refresh_timeout;
        let path = path.to_string();
        let target = fetch_target(&path, module_config.as_ref());

        let handle = tokio::spawn(async move {
            if let Ok(Ok(fetched)) = timeout(window, transport.get(&target)).await {
                let entry = build_entry(fetched, module_config.as_ref());
                let _ = cache.record(&path, &entry);
            }
        });
        self.refreshes.lock().unwrap().push(handle);
    }

    /// Explicit join point for every refresh spawned so far.
    pub async fn await_refreshes(&self) {
        let handles: Vec<JoinHandle<()>> = self.refreshes.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }
}

/// Overrides redirect the network target; the canonical path never changes.
fn fetch_target(path: &str, module_config: Option<&ModuleConfig>) -> String {
    match module_config {
        Some(config) if !config.override_url.is_empty() => config.override_url.clone(),
        _ => path.to_string(),
    }
}

fn build_entry(fetched: FetchedText, module_config: Option<&ModuleConfig>) -> CacheEntry {
    // An unpinned request self-pins to whatever version the fetch resolved
    // to, so later sessions validate against something concrete.
    let version = version_token(&fetched.resolved_url)
        .unwrap_or_else(|| module_config.map(|c| c.version.clone()).unwrap_or_default());
    let override_url = module_config
        .map(|c| c.override_url.clone())
        .unwrap_or_default();
    CacheEntry::new(fetched.body, fetched.resolved_url, version, override_url)
}

/// Extracts the `name@major.minor.patch` version token from a resolved URL.
pub fn version_token(url: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\d+\.\d+\.\d+)").unwrap());
    let token = VERSION_RE.captures(url)?.get(1)?.as_str();
    semver::Version::parse(token).ok()?;
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Serves canned text per target, counting every fetch; targets mapped
    /// to `None` hang past any test timeout.
    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<HashMap<String, Option<FetchedText>>>,
        fetches: AtomicUsize,
    }

    impl FakeTransport {
        fn with(mut self, target: &str, fetched: Option<FetchedText>) -> Self {
            self.responses
                .get_mut()
                .unwrap()
                .insert(target.to_string(), fetched);
            self
        }

        fn text(target: &str, body: &str) -> Option<FetchedText> {
            Some(FetchedText {
                body: body.to_string(),
                resolved_url: target.to_string(),
            })
        }

        fn count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl Transport for FakeTransport {
        fn get<'a>(&'a self, target: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let response = self.responses.lock().unwrap().get(target).cloned();
                match response {
                    Some(Some(fetched)) => Ok(fetched),
                    Some(None) => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        unreachable!("hanging target completed")
                    }
                    None => Err(ImportError::fetch_failed(target, "HTTP 404 Not Found")),
                }
            })
        }
    }

    fn pinned(version: &str, override_url: &str) -> ModuleConfig {
        ModuleConfig {
            module_name: "vue".to_string(),
            version: version.to_string(),
            override_url: override_url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memoization_shares_one_fetch() {
        let fake =
            Arc::new(FakeTransport::default().with("/a.js", FakeTransport::text("/a.js", "text")));
        let loader = Loader::new(
            Arc::new(ImporterConfig::default()),
            Arc::clone(&fake) as Arc<dyn Transport>,
            CacheStore::new(Store::in_memory()),
        );

        let (first, second) = tokio::join!(loader.load("/a.js"), loader.load("/a.js"));
        assert_eq!(first.unwrap(), "text");
        assert_eq!(second.unwrap(), "text");
        assert_eq!(fake.count(), 1);

        // A later sequential load is also served from the memo table.
        assert_eq!(loader.load("/a.js").await.unwrap(), "text");
        assert_eq!(fake.count(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_serves_immediately_and_refreshes() {
        let path = "https://unpkg.com/vue";
        let fake =
            Arc::new(FakeTransport::default().with(path, FakeTransport::text(path, "fresh")));
        let cache = CacheStore::new(Store::in_memory());
        cache
            .record(
                path,
                &CacheEntry::new("cached".into(), path.into(), String::new(), String::new()),
            )
            .unwrap();
        let loader = Loader::new(
            Arc::new(ImporterConfig::default()),
            Arc::clone(&fake) as Arc<dyn Transport>,
            cache.clone(),
        );

        // Caller gets the cached copy without waiting on the network.
        assert_eq!(loader.load(path).await.unwrap(), "cached");

        loader.await_refreshes().await;
        assert_eq!(fake.count(), 1);
        assert_eq!(cache.lookup_any(path).unwrap().text, "fresh");
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_stale_cache() {
        let path = "https://unpkg.com/vue";
        let fake = FakeTransport::default().with(path, None); // hangs
        let cache = CacheStore::new(Store::in_memory());
        // Stale: the recorded version no longer matches the pin, so the
        // cache-first lookup misses and the network race runs.
        cache
            .record(
                path,
                &CacheEntry::new("stale".into(), path.into(), "1.0.0".into(), String::new()),
            )
            .unwrap();

        let mut config = ImporterConfig::default();
        config.request_timeout = Duration::from_millis(20);
        config
            .module_overrides
            .insert("vue".into(), pinned("2.0.0", ""));

        let loader = Loader::new(Arc::new(config), Arc::new(fake), cache);
        assert_eq!(loader.load(path).await.unwrap(), "stale");
    }

    #[tokio::test]
    async fn test_fetch_failure_without_fallback_propagates() {
        let fake = FakeTransport::default(); // every target 404s
        let loader = Loader::new(
            Arc::new(ImporterConfig::default()),
            Arc::new(fake),
            CacheStore::new(Store::in_memory()),
        );
        assert!(loader.load("/missing.js").await.is_err());
    }

    #[tokio::test]
    async fn test_version_mismatch_forces_network_fetch() {
        let path = "https://unpkg.com/vue";
        let fake = Arc::new(FakeTransport::default().with(
            path,
            Some(FetchedText {
                body: "v2 text".to_string(),
                resolved_url: "https://unpkg.com/vue@2.0.0/dist/vue.js".to_string(),
            }),
        ));
        let cache = CacheStore::new(Store::in_memory());
        cache
            .record(
                path,
                &CacheEntry::new("v1 text".into(), path.into(), "1.0.0".into(), String::new()),
            )
            .unwrap();

        let mut config = ImporterConfig::default();
        config
            .module_overrides
            .insert("vue".into(), pinned("2.0.0", ""));

        let loader = Loader::new(
            Arc::new(config),
            Arc::clone(&fake) as Arc<dyn Transport>,
            cache.clone(),
        );
        assert_eq!(loader.load(path).await.unwrap(), "v2 text");
        assert_eq!(fake.count(), 1);
        // The refetch self-pinned from the resolved URL.
        assert_eq!(cache.lookup_any(path).unwrap().version, "2.0.0");
    }

    #[tokio::test]
    async fn test_override_redirects_fetch_target() {
        let path = "https://unpkg.com/vue";
        let mirror = "https://cdn.example/vue.js";
        let fake =
            Arc::new(FakeTransport::default().with(mirror, FakeTransport::text(mirror, "mirrored")));

        let mut config = ImporterConfig::default();
        config
            .module_overrides
            .insert("vue".into(), pinned("", mirror));

        let cache = CacheStore::new(Store::in_memory());
        let loader = Loader::new(
            Arc::new(config),
            Arc::clone(&fake) as Arc<dyn Transport>,
            cache.clone(),
        );
        assert_eq!(loader.load(path).await.unwrap(), "mirrored");
        // Cached under the canonical path, with the override recorded.
        assert_eq!(cache.lookup_any(path).unwrap().override_url, mirror);
    }

    #[tokio::test]
    async fn test_local_paths_skip_cache_unless_cache_all() {
        let fake = Arc::new(
            FakeTransport::default().with("/a.js", FakeTransport::text("/a.js", "local text")),
        );
        let cache = CacheStore::new(Store::in_memory());
        let mut config = ImporterConfig::default();
        config.cache_all = true;

        let loader = Loader::new(
            Arc::new(config),
            Arc::clone(&fake) as Arc<dyn Transport>,
            cache.clone(),
        );
        assert_eq!(loader.load("/a.js").await.unwrap(), "local text");
        assert!(cache.lookup_any("/a.js").is_some());
    }

    #[test]
    fn test_version_token_extraction() {
        assert_eq!(
            version_token("https://unpkg.com/vue@2.6.14/dist/vue.js").as_deref(),
            Some("2.6.14")
        );
        assert_eq!(version_token("https://unpkg.com/vue"), None);
        assert_eq!(version_token("https://unpkg.com/vue@next"), None);
    }
}
