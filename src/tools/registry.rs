//! Tool Registry
//!
//! Composes the metadata catalog, the semantic index and the bounded tool
//! cache into one concurrency-safe facade. All catalog and cache mutations
//! route through `register` / `unregister`; search never instantiates more
//! tools than it returns.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rayon::prelude::*;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::cache::{CacheLimits, DynamicToolCache};
use super::catalog::{CatalogEntry, ToolCatalog};
use super::embedding::{dot_product, Embedder};
use super::index::EmbeddingIndex;
use super::loader::ToolLoader;
use super::Tool;
use crate::agent::{now_ms, AgentError, AgentResult};

/// Filesystem layout and bounds for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding tool manifests.
    pub catalog_dir: PathBuf,
    /// Persisted embedding index location.
    pub index_path: PathBuf,
    pub cache_limits: CacheLimits,
    pub max_embed_cache: usize,
    pub search_cache_ttl: Duration,
    pub index_batch_size: usize,
}

impl RegistryConfig {
    pub fn under(data_dir: &std::path::Path) -> Self {
        Self {
            catalog_dir: data_dir.join("tools").join("catalog"),
            index_path: data_dir.join("tools").join("index.json"),
            cache_limits: CacheLimits::default(),
            max_embed_cache: 1000,
            search_cache_ttl: Duration::from_secs(300),
            index_batch_size: super::index::INDEX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct UsageStat {
    count: u64,
    last_used_ms: Option<i64>,
}

impl UsageStat {
    /// `min(0.01·count, 0.10)` plus a recency bonus decaying over 30 days.
    fn boost(&self, now: i64) -> f32 {
        let count_boost = (0.01 * self.count as f32).min(0.10);
        let recency = match self.last_used_ms {
            Some(last) => {
                let days = (now - last) as f32 / 86_400_000.0;
                0.05 * (1.0 - days / 30.0).max(0.0)
            }
            None => 0.0,
        };
        count_boost + recency
    }
}

pub struct ToolRegistry {
    config: RegistryConfig,
    catalog: RwLock<ToolCatalog>,
    index: Mutex<EmbeddingIndex>,
    cache: DynamicToolCache,
    loader: Arc<dyn ToolLoader>,
    usage: Mutex<HashMap<String, UsageStat>>,
}

impl ToolRegistry {
    pub fn new(
        config: RegistryConfig,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn ToolLoader>,
    ) -> Self {
        let index = EmbeddingIndex::new(config.index_path.clone(), embedder)
            .with_query_cache(config.max_embed_cache, config.search_cache_ttl)
            .with_batch_size(config.index_batch_size);
        Self {
            cache: DynamicToolCache::new(config.cache_limits),
            catalog: RwLock::new(ToolCatalog::new()),
            index: Mutex::new(index),
            loader,
            usage: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Enumerate manifests into the catalog. Idempotent.
    pub async fn scan(&self) -> AgentResult<usize> {
        let mut catalog = self.catalog.write().await;
        catalog.scan(&self.config.catalog_dir)
    }

    /// Register an in-process tool: catalog entry, resident cache entry,
    /// and an incremental index append when an index already exists.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> AgentResult<()> {
        let entry = CatalogEntry {
            name: tool.name(),
            description: tool.description(),
            category: tool
                .categories()
                .first()
                .cloned()
                .unwrap_or_else(|| "general".to_string()),
            tags: tool.categories(),
            source_path: None,
            sensitive: tool.sensitive(),
        };
        let name = entry.name.clone();

        let (names, descs) = {
            let mut catalog = self.catalog.write().await;
            catalog.insert(entry);
            (catalog.names(), catalog.descriptions())
        };
        self.cache.insert(tool).await;

        let mut index = self.index.lock().await;
        if !index.names().is_empty() {
            if let Err(e) = index.append(&names, &descs, &name).await {
                warn!("Incremental index append for '{}' failed: {}", name, e);
            }
        }
        debug!("Registered tool '{}'", name);
        Ok(())
    }

    /// Remove a tool from catalog, cache and index.
    pub async fn unregister(&self, name: &str) -> AgentResult<()> {
        let (removed, names, descs) = {
            let mut catalog = self.catalog.write().await;
            let removed = catalog.remove(name).is_some();
            (removed, catalog.names(), catalog.descriptions())
        };
        if !removed {
            return Err(AgentError::UnknownTool(name.to_string()));
        }
        self.cache.remove(name).await;
        let mut index = self.index.lock().await;
        if let Err(e) = index.remove(&names, &descs, name) {
            warn!("Index removal for '{}' failed: {}", name, e);
        }
        Ok(())
    }

    /// Synchronous-style lookup of an already-loaded tool. Never loads.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.cache.get(name).await
    }

    /// Cached or lazily-loaded tool. Concurrent loads of one name collapse
    /// into a single loader invocation.
    pub async fn get_or_load(&self, name: &str) -> AgentResult<Arc<dyn Tool>> {
        let entry = {
            let catalog = self.catalog.read().await;
            catalog
                .get(name)
                .cloned()
                .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?
        };

        let loader = self.loader.clone();
        let tool = self
            .cache
            .get_or_load(name, || async move { loader.load(&entry).await })
            .await?;
        self.record_usage(name).await;
        Ok(tool)
    }

    /// Semantic top-k retrieval. Scores cosine similarity plus a usage
    /// boost, breaks ties by name, then materializes the winners.
    pub async fn search(&self, query: &str, k: usize) -> AgentResult<Vec<Arc<dyn Tool>>> {
        let (names, descs) = {
            let catalog = self.catalog.read().await;
            (catalog.names(), catalog.descriptions())
        };
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let ranked = {
            let mut index = self.index.lock().await;
            match index.ensure(&names, &descs).await {
                Ok(_) => {}
                Err(e) => {
                    if index.vectors().is_empty() {
                        return Err(e);
                    }
                    // A stale index is still usable for retrieval.
                    warn!("Index refresh failed, degrading to cached index: {}", e);
                }
            }

            let query_vec = index.embed_query(query).await?;
            let usage = self.usage.lock().await;
            let now = now_ms();

            let mut scored: Vec<(f32, &String)> = index
                .vectors()
                .par_iter()
                .zip(index.names().par_iter())
                .map(|(vec, name)| {
                    let boost = usage.get(name).copied().unwrap_or_default().boost(now);
                    (dot_product(&query_vec, vec) + boost, name)
                })
                .collect();

            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(b.1))
            });
            scored
                .into_iter()
                .take(k)
                .map(|(_, name)| name.clone())
                .collect::<Vec<_>>()
        };

        let mut tools = Vec::with_capacity(ranked.len());
        for name in ranked {
            match self.get_or_load(&name).await {
                Ok(tool) => tools.push(tool),
                Err(e) => warn!("Skipping search candidate '{}': {}", name, e),
            }
        }
        Ok(tools)
    }

    /// Currently loaded tools, not the full catalog.
    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.cache.loaded().await
    }

    /// Snapshot of catalog metadata, in stable name order.
    pub async fn catalog_entries(&self) -> Vec<CatalogEntry> {
        self.catalog.read().await.entries().cloned().collect()
    }

    pub async fn catalog_len(&self) -> usize {
        self.catalog.read().await.len()
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.cache.contains(name).await
    }

    /// Force a full embedding recompute and persist.
    pub async fn rebuild_index(&self) -> AgentResult<()> {
        let (names, descs) = {
            let catalog = self.catalog.read().await;
            (catalog.names(), catalog.descriptions())
        };
        let mut index = self.index.lock().await;
        index.rebuild(&names, &descs).await
    }

    /// Bump usage accounting for ranking.
    pub async fn record_usage(&self, name: &str) {
        let mut usage = self.usage.lock().await;
        let stat = usage.entry(name.to_string()).or_default();
        stat.count += 1;
        stat.last_used_ms = Some(now_ms());
    }

    /// Evict idle cache entries. Called by the maintenance scheduler.
    pub async fn sweep_cache(&self) -> usize {
        self.cache.sweep().await
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.len().await
    }

    /// Warm the cache with up to three close neighbors of `query` that the
    /// search did not return. Best-effort; failures never propagate.
    pub async fn preload_similar(&self, query: &str, already: &[String]) {
        let extra = match self.rank_names(query, already.len() + 3).await {
            Ok(names) => names,
            Err(e) => {
                debug!("preload_similar skipped: {}", e);
                return;
            }
        };

        let loads = extra
            .iter()
            .filter(|n| !already.contains(n))
            .take(3)
            .map(|name| async move {
                if !self.cache.contains(name).await {
                    if let Err(e) = self.get_or_load(name).await {
                        debug!("preload of '{}' failed: {}", name, e);
                    }
                }
            });
        join_all(loads).await;
    }

    /// Keyword-driven warm-up: up to five stopword-filtered keywords from
    /// the task, top-3 neighbors each, at most five loads total.
    pub async fn smart_preload(&self, task: &str, context: &str) {
        let text = format!("{} {}", task, context);
        let keywords = extract_keywords(&text, 5);
        if keywords.is_empty() {
            return;
        }

        let mut union: Vec<String> = Vec::new();
        for keyword in keywords {
            match self.rank_names(&keyword, 3).await {
                Ok(names) => {
                    for name in names {
                        if !union.contains(&name) {
                            union.push(name);
                        }
                    }
                }
                Err(e) => debug!("smart_preload('{}') skipped: {}", keyword, e),
            }
            if union.len() >= 5 {
                break;
            }
        }

        let loads = union.iter().take(5).map(|name| async move {
            if !self.cache.contains(name).await {
                if let Err(e) = self.get_or_load(name).await {
                    debug!("smart preload of '{}' failed: {}", name, e);
                }
            }
        });
        join_all(loads).await;
    }

    /// Ranked names only, without materializing any tool.
    async fn rank_names(&self, query: &str, k: usize) -> AgentResult<Vec<String>> {
        let (names, descs) = {
            let catalog = self.catalog.read().await;
            (catalog.names(), catalog.descriptions())
        };
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut index = self.index.lock().await;
        if index.vectors().is_empty() {
            index.ensure(&names, &descs).await?;
        }
        let query_vec = index.embed_query(query).await?;

        let mut scored: Vec<(f32, &String)> = index
            .vectors()
            .iter()
            .zip(index.names().iter())
            .map(|(vec, name)| (dot_product(&query_vec, vec), name))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        Ok(scored.into_iter().take(k).map(|(_, n)| n.clone()).collect())
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "what", "which", "about", "into",
    "when", "where", "then", "than", "them", "they", "your", "please", "will", "should",
    "could", "would", "have", "has", "been", "being", "over", "under", "some", "most",
];

/// Up to `max` lowercase keywords longer than three characters.
fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut keywords = Vec::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(w))
    {
        let word = word.to_string();
        if !keywords.contains(&word) {
            keywords.push(word);
            if keywords.len() >= max {
                break;
            }
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{EchoTool, StubEmbedder};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ToolLoader for CountingLoader {
        async fn load(&self, entry: &CatalogEntry) -> AgentResult<Arc<dyn Tool>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoTool::named(&entry.name)))
        }
    }

    fn write_manifest(dir: &std::path::Path, name: &str, description: &str) {
        std::fs::write(
            dir.join(format!("{}.json", name)),
            json!({
                "name": name,
                "description": description,
                "kind": "http",
                "http": {"url": "https://example.test"}
            })
            .to_string(),
        )
        .unwrap();
    }

    fn registry_in(dir: &std::path::Path) -> (Arc<ToolRegistry>, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let registry = Arc::new(ToolRegistry::new(
            RegistryConfig::under(dir),
            Arc::new(StubEmbedder::new()),
            loader.clone(),
        ));
        (registry, loader)
    }

    #[tokio::test]
    async fn test_search_loads_only_returned_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_dir = dir.path().join("tools").join("catalog");
        std::fs::create_dir_all(&catalog_dir).unwrap();
        for i in 0..40 {
            write_manifest(&catalog_dir, &format!("tool{:02}", i), &format!("does thing {}", i));
        }

        let (registry, loader) = registry_in(dir.path());
        registry.scan().await.unwrap();
        assert_eq!(registry.catalog_len().await, 40);

        let found = registry.search("thing", 5).await.unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 5);
        assert_eq!(registry.cache_len().await, 5);
    }

    #[tokio::test]
    async fn test_get_or_load_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry_in(dir.path());
        let err = registry.get_or_load("ghost").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_register_appends_to_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_dir = dir.path().join("tools").join("catalog");
        std::fs::create_dir_all(&catalog_dir).unwrap();
        write_manifest(&catalog_dir, "alpha", "first");
        write_manifest(&catalog_dir, "beta", "second");

        let (registry, _) = registry_in(dir.path());
        registry.scan().await.unwrap();
        registry.search("first", 1).await.unwrap();

        registry
            .register(Arc::new(EchoTool::named("aaa_new")))
            .await
            .unwrap();

        // The index stayed consistent: a follow-up search succeeds and the
        // registered tool is immediately loadable.
        assert!(registry.get("aaa_new").await.is_some());
        let found = registry.search("echo", 3).await.unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_unregister_removes_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry_in(dir.path());
        registry
            .register(Arc::new(EchoTool::named("gone")))
            .await
            .unwrap();
        registry.unregister("gone").await.unwrap();
        assert!(registry.get("gone").await.is_none());
        assert_eq!(registry.catalog_len().await, 0);
        assert!(registry.unregister("gone").await.is_err());
    }

    #[tokio::test]
    async fn test_usage_boost_affects_ranking() {
        let now = now_ms();
        let cold = UsageStat::default();
        let hot = UsageStat {
            count: 20,
            last_used_ms: Some(now),
        };
        assert!(hot.boost(now) > cold.boost(now));
        assert!(hot.boost(now) <= 0.15 + f32::EPSILON);
    }

    #[test]
    fn test_keyword_extraction() {
        let words = extract_keywords("Please search the latest rust release notes", 5);
        assert!(words.contains(&"search".to_string()));
        assert!(words.contains(&"latest".to_string()));
        assert!(!words.contains(&"the".to_string()));
        assert!(words.len() <= 5);
    }
}
