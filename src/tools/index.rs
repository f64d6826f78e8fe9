//! Embedding Index
//!
//! Persistent vector index over tool descriptions. The cache record is
//! keyed by embedding-model identity, dimension, and content hashes of the
//! name and description arrays; any mismatch forces a recompute. New tools
//! are appended incrementally, preserving order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::embedding::Embedder;
use crate::agent::{AgentError, AgentResult};

/// How many descriptions are embedded per provider call during a rebuild.
pub const INDEX_BATCH_SIZE: usize = 20;

/// Persisted index record. `vecs[i]` is the embedding of the description
/// of `names[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexRecord {
    pub embed_key: String,
    pub names_hash: String,
    pub descs_hash: String,
    #[serde(default)]
    pub dim: usize,
    pub names: Vec<String>,
    pub vecs: Vec<Vec<f32>>,
}

impl IndexRecord {
    /// Valid iff model identity, dimension, and both content hashes match
    /// the current catalog.
    pub fn is_valid_for(&self, embedder: &dyn Embedder, names: &[String], descs: &[String]) -> bool {
        self.embed_key == embedder.id()
            && self.dim == embedder.dim()
            && self.names_hash == sha1_of(names)
            && self.descs_hash == sha1_of(descs)
            && self.vecs.len() == names.len()
    }
}

/// SHA-1 hex digest of the JSON-serialized string array.
pub fn sha1_of(items: &[String]) -> String {
    let serialized = serde_json::to_string(items).unwrap_or_default();
    let digest = Sha1::digest(serialized.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The registry's semantic index plus the bounded query-embedding cache.
pub struct EmbeddingIndex {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    record: IndexRecord,
    batch_size: usize,
    query_cache: HashMap<String, (Vec<f32>, Instant)>,
    query_cache_cap: usize,
    query_cache_ttl: Duration,
}

impl EmbeddingIndex {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: path.into(),
            embedder,
            record: IndexRecord::default(),
            batch_size: INDEX_BATCH_SIZE,
            query_cache: HashMap::new(),
            query_cache_cap: 1000,
            query_cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_query_cache(mut self, cap: usize, ttl: Duration) -> Self {
        self.query_cache_cap = cap;
        self.query_cache_ttl = ttl;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn record(&self) -> &IndexRecord {
        &self.record
    }

    pub fn names(&self) -> &[String] {
        &self.record.names
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.record.vecs
    }

    /// Load the persisted record if it matches the current catalog,
    /// otherwise recompute in batches and persist. Returns true when a
    /// recompute happened.
    pub async fn ensure(&mut self, names: &[String], descs: &[String]) -> AgentResult<bool> {
        if self.record.is_valid_for(self.embedder.as_ref(), names, descs) {
            return Ok(false);
        }

        if let Some(loaded) = self.load_from_disk() {
            if loaded.is_valid_for(self.embedder.as_ref(), names, descs) {
                debug!("Embedding index cache hit ({} tools)", loaded.names.len());
                self.record = loaded;
                return Ok(false);
            }
            debug!("Embedding index cache stale, recomputing");
        }

        self.rebuild(names, descs).await?;
        Ok(true)
    }

    /// Recompute all vectors in bounded batches and persist.
    pub async fn rebuild(&mut self, names: &[String], descs: &[String]) -> AgentResult<()> {
        info!("Rebuilding embedding index for {} tools", names.len());
        let mut vecs = Vec::with_capacity(descs.len());
        for chunk in descs.chunks(self.batch_size) {
            let batch = self.embedder.embed(chunk).await?;
            vecs.extend(batch);
        }

        self.record = IndexRecord {
            embed_key: self.embedder.id(),
            names_hash: sha1_of(names),
            descs_hash: sha1_of(descs),
            dim: self.embedder.dim(),
            names: names.to_vec(),
            vecs,
        };
        self.persist()?;
        Ok(())
    }

    /// Append one tool without a full recompute, preserving order: the new
    /// name and vector land at the position the catalog dictates.
    pub async fn append(
        &mut self,
        names: &[String],
        descs: &[String],
        added: &str,
    ) -> AgentResult<()> {
        let Some(position) = names.iter().position(|n| n == added) else {
            return Err(AgentError::UnknownTool(added.to_string()));
        };
        if position > self.record.names.len() {
            // The cached record has drifted from the catalog; start over.
            return self.rebuild(names, descs).await;
        }
        let vector = self
            .embedder
            .embed(&[descs[position].clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("embedder returned no vector".to_string()))?;

        self.record.names.insert(position, added.to_string());
        self.record.vecs.insert(position, vector);
        self.record.names_hash = sha1_of(names);
        self.record.descs_hash = sha1_of(descs);
        self.record.embed_key = self.embedder.id();
        self.record.dim = self.embedder.dim();
        self.persist()?;
        Ok(())
    }

    /// Drop one tool from the index, preserving the order of the rest.
    pub fn remove(&mut self, names: &[String], descs: &[String], removed: &str) -> AgentResult<()> {
        if let Some(position) = self.record.names.iter().position(|n| n == removed) {
            self.record.names.remove(position);
            self.record.vecs.remove(position);
        }
        self.record.names_hash = sha1_of(names);
        self.record.descs_hash = sha1_of(descs);
        self.persist()?;
        Ok(())
    }

    /// Embed a search query through the bounded TTL cache.
    pub async fn embed_query(&mut self, query: &str) -> AgentResult<Vec<f32>> {
        let now = Instant::now();
        if let Some((vector, stamp)) = self.query_cache.get(query) {
            if now.duration_since(*stamp) < self.query_cache_ttl {
                return Ok(vector.clone());
            }
        }

        let vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("embedder returned no vector".to_string()))?;

        self.query_cache.retain(|_, (_, stamp)| now.duration_since(*stamp) < self.query_cache_ttl);
        if self.query_cache.len() >= self.query_cache_cap {
            // Evict the oldest entry to stay within the bound.
            if let Some(oldest) = self
                .query_cache
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.query_cache.remove(&oldest);
            }
        }
        self.query_cache.insert(query.to_string(), (vector.clone(), now));
        Ok(vector)
    }

    fn load_from_disk(&self) -> Option<IndexRecord> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Discarding unreadable index cache {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn persist(&self) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Store(format!("create {:?}: {}", parent, e)))?;
        }
        let body = serde_json::to_vec(&self.record)
            .map_err(|e| AgentError::Store(format!("serialize index: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)
            .map_err(|e| AgentError::Store(format!("write {:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AgentError::Store(format!("rename {:?}: {}", self.path, e)))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::StubEmbedder;
    use std::sync::atomic::Ordering;

    fn sample() -> (Vec<String>, Vec<String>) {
        let names = vec!["alpha".to_string(), "beta".to_string()];
        let descs = vec!["first tool".to_string(), "second tool".to_string()];
        (names, descs)
    }

    #[tokio::test]
    async fn test_rebuild_then_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let (names, descs) = sample();

        let mut index = EmbeddingIndex::new(&path, Arc::new(StubEmbedder::new()));
        assert!(index.ensure(&names, &descs).await.unwrap());
        assert_eq!(index.vectors().len(), 2);

        // A fresh instance over the same file reuses the persisted vectors.
        let embedder = Arc::new(StubEmbedder::new());
        let mut reloaded = EmbeddingIndex::new(&path, embedder.clone());
        assert!(!reloaded.ensure(&names, &descs).await.unwrap());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_description_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let (names, mut descs) = sample();

        let mut index = EmbeddingIndex::new(&path, Arc::new(StubEmbedder::new()));
        index.ensure(&names, &descs).await.unwrap();

        descs[1] = "second tool, revised".to_string();
        assert!(index.ensure(&names, &descs).await.unwrap());
    }

    #[tokio::test]
    async fn test_incremental_append_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let (mut names, mut descs) = sample();

        let mut index = EmbeddingIndex::new(&path, Arc::new(StubEmbedder::new()));
        index.ensure(&names, &descs).await.unwrap();

        // "aardvark" sorts before both existing names.
        names.insert(0, "aardvark".to_string());
        descs.insert(0, "digs".to_string());
        index.append(&names, &descs, "aardvark").await.unwrap();

        assert_eq!(index.names(), &names[..]);
        assert!(index.record().is_valid_for(&StubEmbedder::new(), &names, &descs));
    }

    #[tokio::test]
    async fn test_query_cache_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(StubEmbedder::new());
        let mut index = EmbeddingIndex::new(dir.path().join("index.json"), embedder.clone())
            .with_query_cache(2, Duration::from_secs(300));

        index.embed_query("one").await.unwrap();
        index.embed_query("one").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        index.embed_query("two").await.unwrap();
        index.embed_query("three").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }
}
