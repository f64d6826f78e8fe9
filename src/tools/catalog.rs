//! Tool Catalog
//!
//! Scans a directory of JSON tool manifests and records metadata per tool
//! without materializing any executable tool object. The catalog is the
//! source of truth for what exists; the cache decides what is loaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{BreakerPolicy, RetryPolicy};
use crate::agent::{AgentError, AgentResult};

/// On-disk descriptor of a catalog tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Loader discriminator: `http` or one of the builtin tool names.
    pub kind: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub breaker: Option<BreakerPolicy>,
    #[serde(default)]
    pub http: Option<HttpSpec>,
}

/// Remote-call template for `kind = "http"` manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

/// Catalog metadata for one tool. Created during scan, never mutated
/// afterwards except for the `loaded` marker kept by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Manifest path; `None` for tools registered in-process.
    pub source_path: Option<PathBuf>,
    pub sensitive: bool,
}

/// The full metadata catalog, keyed by tool name. Name ordering is the
/// stable iteration order used for index building and tie-breaks.
#[derive(Debug, Default, Clone)]
pub struct ToolCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate `*.json` manifests under `dir` and replace all scanned
    /// entries. Idempotent; per-file parse failures are logged and skipped.
    /// Entries without a source path (in-process registrations) survive.
    pub fn scan(&mut self, dir: &Path) -> AgentResult<usize> {
        if !dir.exists() {
            debug!("Catalog directory {:?} does not exist, skipping scan", dir);
            return Ok(0);
        }

        let listing = std::fs::read_dir(dir)
            .map_err(|e| AgentError::Store(format!("catalog scan of {:?}: {}", dir, e)))?;

        self.entries.retain(|_, e| e.source_path.is_none());

        let mut scanned = 0usize;
        for item in listing {
            let path = match item {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Unreadable catalog entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_manifest(&path) {
                Ok(manifest) => {
                    self.entries.insert(
                        manifest.name.clone(),
                        CatalogEntry {
                            name: manifest.name,
                            description: manifest.description,
                            category: manifest.category,
                            tags: manifest.tags,
                            source_path: Some(path),
                            sensitive: manifest.sensitive,
                        },
                    );
                    scanned += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed tool manifest {:?}: {}", path, e);
                }
            }
        }

        debug!("Catalog scan found {} manifests in {:?}", scanned, dir);
        Ok(scanned)
    }

    pub fn read_manifest(path: &Path) -> AgentResult<ToolManifest> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Store(format!("read {:?}: {}", path, e)))?;
        let manifest: ToolManifest = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Store(format!("parse {:?}: {}", path, e)))?;
        if manifest.name.trim().is_empty() {
            return Err(AgentError::Store(format!("{:?}: empty tool name", path)));
        }
        Ok(manifest)
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<CatalogEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in stable name order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Tool names in stable order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Descriptions aligned with `names()`.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.values().map(|e| e.description.clone()).collect()
    }
}
