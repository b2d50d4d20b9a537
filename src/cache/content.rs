//! ETag-aware content cache with optional snapshot persistence.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::observability::metrics;

/// A cached payload and the validation token it was served with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Value,
    /// Opaque validation token (ETag) from the backend.
    pub etag: String,
    /// When the payload was last confirmed current (epoch ms).
    pub stored_at_ms: u64,
}

/// Thread-safe cache of content payloads keyed by resource path.
///
/// Entries are replaced wholesale; only `touch` updates an entry, and only
/// its timestamp.
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<DashMap<String, CacheEntry>>,
    persistence_path: Option<String>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("entries", &self.inner.len())
            .field("persistence_path", &self.persistence_path)
            .finish()
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ContentCache {
    pub fn new(persistence_path: Option<String>) -> Self {
        Self::with_clock(persistence_path, Arc::new(SystemClock))
    }

    pub fn with_clock(persistence_path: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
            clock,
        }
    }

    /// Load a snapshot if the file exists; start empty otherwise.
    pub fn load_from_file(path: &str, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let cache = Self::with_clock(Some(path.to_string()), clock);
        if Path::new(path).exists() {
            let file = File::open(path)?;
            let reader = BufReader::new(file);
            let map: HashMap<String, CacheEntry> = serde_json::from_reader(reader)?;

            for (k, v) in map {
                cache.inner.insert(k, v);
            }
            tracing::info!(entries = cache.inner.len(), path = %path, "Loaded content cache snapshot");
        }
        Ok(cache)
    }

    /// Write a snapshot to the persistence path, if one is configured.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        if let Some(path) = &self.persistence_path {
            let file = File::create(path)?;
            let writer = BufWriter::new(file);

            let map: HashMap<_, _> = self
                .inner
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect();

            serde_json::to_writer(writer, &map)?;
            tracing::info!(entries = map.len(), path = %path, "Saved content cache snapshot");
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        self.inner.get(path).map(|r| r.value().clone())
    }

    /// Store `payload` for `path`, replacing any previous entry.
    pub fn put(&self, path: &str, payload: Value, etag: impl Into<String>) {
        let entry = CacheEntry {
            payload,
            etag: etag.into(),
            stored_at_ms: self.clock.now_ms(),
        };
        self.inner.insert(path.to_string(), entry);
    }

    /// Refresh the stored-at timestamp after a "not modified" response.
    /// Returns false if the path is no longer cached.
    pub fn touch(&self, path: &str) -> bool {
        match self.inner.get_mut(path) {
            Some(mut entry) => {
                entry.stored_at_ms = self.clock.now_ms();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `path`. Returns true if one existed.
    pub fn invalidate(&self, path: &str) -> bool {
        let removed = self.inner.remove(path).is_some();
        if removed {
            metrics::record_cache_event("invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
