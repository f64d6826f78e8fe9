//! Dynamic Tool Cache
//!
//! Bounded LRU cache of loaded tool objects. Eviction is biased toward
//! keeping frequently-used tools; a periodic sweep drops idle entries.
//! Concurrent loads of the same name are deduplicated through a per-name
//! gate so the underlying loader runs once per successful load.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use super::{estimate_tool_bytes, Tool};
use crate::agent::{now_ms, AgentResult};

/// Resource bounds for the cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: u64,
    pub idle_timeout: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 50 * 1024 * 1024,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

struct CacheEntry {
    tool: Arc<dyn Tool>,
    categories: Vec<String>,
    last_access_ms: i64,
    access_count: u64,
    estimated_bytes: u64,
}

impl CacheEntry {
    /// Lower scores evict first: stale entries, unless heavily used.
    fn eviction_score(&self) -> i64 {
        self.last_access_ms - (self.access_count as i64) * 60_000
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
}

pub struct DynamicToolCache {
    limits: CacheLimits,
    inner: Mutex<Inner>,
    loading: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DynamicToolCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Lookup without loading. Touches the entry.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(name)?;
        entry.last_access_ms = now_ms();
        entry.access_count += 1;
        Some(entry.tool.clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.lock().await.entries.contains_key(name)
    }

    /// Insert a loaded tool, evicting as needed to respect the bounds.
    pub async fn insert(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        let bytes = estimate_tool_bytes(tool.as_ref());
        let categories = tool.categories();
        let mut inner = self.inner.lock().await;

        if let Some(old) = inner.entries.remove(&name) {
            inner.total_bytes -= old.estimated_bytes;
        }

        while !inner.entries.is_empty()
            && (inner.entries.len() >= self.limits.max_entries
                || inner.total_bytes + bytes > self.limits.max_bytes)
        {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.eviction_score())
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else { break };
            if let Some(evicted) = inner.entries.remove(&victim) {
                inner.total_bytes -= evicted.estimated_bytes;
                debug!("Evicted tool '{}' from cache", victim);
            }
        }

        inner.total_bytes += bytes;
        inner.entries.insert(
            name,
            CacheEntry {
                tool,
                categories,
                last_access_ms: now_ms(),
                access_count: 1,
                estimated_bytes: bytes,
            },
        );
    }

    /// Return the cached tool or load it, deduplicating concurrent loads
    /// of the same name.
    pub async fn get_or_load<F, Fut>(&self, name: &str, load: F) -> AgentResult<Arc<dyn Tool>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AgentResult<Arc<dyn Tool>>>,
    {
        if let Some(tool) = self.get(name).await {
            return Ok(tool);
        }

        let gate = {
            let mut loading = self.loading.lock().await;
            loading
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // A racer may have completed the load while we waited on the gate.
        if let Some(tool) = self.get(name).await {
            return Ok(tool);
        }

        let result = load().await;
        if let Ok(ref tool) = result {
            self.insert(tool.clone()).await;
        }

        let mut loading = self.loading.lock().await;
        loading.remove(name);
        drop(loading);

        result
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.remove(name)?;
        inner.total_bytes -= entry.estimated_bytes;
        Some(entry.tool)
    }

    /// All currently loaded tools.
    pub async fn loaded(&self) -> Vec<Arc<dyn Tool>> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .map(|e| e.tool.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn total_bytes(&self) -> u64 {
        self.inner.lock().await.total_bytes
    }

    /// Evict entries idle past the timeout. Tools in category `core` are
    /// exempt. Returns how many entries were dropped.
    pub async fn sweep(&self) -> usize {
        let cutoff = now_ms() - self.limits.idle_timeout.as_millis() as i64;
        let mut inner = self.inner.lock().await;
        let victims: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| {
                e.last_access_ms < cutoff && !e.categories.iter().any(|c| c == "core")
            })
            .map(|(k, _)| k.clone())
            .collect();
        for name in &victims {
            if let Some(evicted) = inner.entries.remove(name) {
                inner.total_bytes -= evicted.estimated_bytes;
            }
        }
        if !victims.is_empty() {
            debug!("Cache sweep evicted {} idle tools", victims.len());
        }
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::tools::testutil::EchoTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_limits(max_entries: usize) -> CacheLimits {
        CacheLimits {
            max_entries,
            max_bytes: 50 * 1024 * 1024,
            idle_timeout: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn test_entry_bound_is_respected() {
        let cache = DynamicToolCache::new(small_limits(3));
        for i in 0..10 {
            cache.insert(Arc::new(EchoTool::named(&format!("t{}", i)))).await;
        }
        assert!(cache.len().await <= 3);
    }

    #[tokio::test]
    async fn test_eviction_follows_score_order() {
        let cache = DynamicToolCache::new(small_limits(2));
        cache.insert(Arc::new(EchoTool::named("first"))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(Arc::new(EchoTool::named("second"))).await;
        cache.insert(Arc::new(EchoTool::named("third"))).await;

        // Equal access counts, so the entry with the oldest last access
        // has the minimal score and goes first.
        assert!(!cache.contains("first").await);
        assert!(cache.contains("second").await);
        assert!(cache.contains("third").await);
    }

    #[tokio::test]
    async fn test_concurrent_loads_deduplicate() {
        let cache = Arc::new(DynamicToolCache::new(CacheLimits::default()));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_load("shared", || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Arc::new(EchoTool::named("shared")) as Arc<dyn Tool>)
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = DynamicToolCache::new(CacheLimits::default());
        let res = cache
            .get_or_load("broken", || async {
                Err(AgentError::Tool("boom".to_string()))
            })
            .await;
        assert!(res.is_err());
        assert!(!cache.contains("broken").await);
    }

    #[tokio::test]
    async fn test_sweep_spares_core_tools() {
        struct CoreTool;

        #[async_trait::async_trait]
        impl Tool for CoreTool {
            fn name(&self) -> String {
                "core_tool".to_string()
            }
            fn description(&self) -> String {
                "always resident".to_string()
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({"type": "object", "properties": {}})
            }
            fn categories(&self) -> Vec<String> {
                vec!["core".to_string()]
            }
            async fn execute(&self, _p: serde_json::Value) -> AgentResult<super::super::ToolOutput> {
                Ok(super::super::ToolOutput::success(serde_json::Value::Null, "ok"))
            }
        }

        let cache = DynamicToolCache::new(CacheLimits {
            idle_timeout: Duration::from_millis(0),
            ..CacheLimits::default()
        });
        cache.insert(Arc::new(CoreTool)).await;
        cache.insert(Arc::new(EchoTool::named("idle"))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let evicted = cache.sweep().await;
        assert_eq!(evicted, 1);
        assert!(cache.contains("core_tool").await);
        assert!(!cache.contains("idle").await);
    }
}
