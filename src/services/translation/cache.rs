use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::core::types::EngineType;
use crate::utils::Metrics;

const CACHE_FILE: &str = "translations.json";

/// Persisted form of one cached batch
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    engine: EngineType,
    translations: Vec<String>,
}

/// Everything that influences a provider's output for one batch
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub engine: EngineType,
    pub source_language: Option<&'a str>,
    pub target_language: &'a str,
    pub prompt: Option<&'a str>,
    pub texts: &'a [String],
}

impl CacheKey<'_> {
    /// xxHash3 of all key fields, unit-separated so field boundaries can't collide
    pub fn digest(&self) -> String {
        let mut input = String::new();
        input.push_str(self.engine.as_str());
        input.push('\u{1f}');
        input.push_str(self.source_language.unwrap_or("auto"));
        input.push('\u{1f}');
        input.push_str(self.target_language);
        input.push('\u{1f}');
        input.push_str(self.prompt.unwrap_or(""));
        for text in self.texts {
            input.push('\u{1e}');
            input.push_str(text);
        }
        format!("{:016x}", xxh3_64(input.as_bytes()))
    }
}

/// LRU cache of successful engine batches.
///
/// Re-running a capture over the same text with the same engine skips
/// the provider call entirely. Optionally persisted as JSON so a
/// restarted process keeps its warm entries.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    cache: RwLock<LruCache<String, CacheEntry>>,
    cache_file: Option<PathBuf>,
    metrics: Option<Metrics>,
}

impl TranslationCache {
    /// In-memory cache holding at most `capacity` batches
    pub fn in_memory(capacity: usize, metrics: Option<Metrics>) -> Self {
        Self::build(capacity, None, HashMap::new(), metrics)
    }

    /// Cache persisted to `<cache_dir>/translations.json`, loading existing entries
    pub async fn open(
        cache_dir: impl AsRef<Path>,
        capacity: usize,
        metrics: Option<Metrics>,
    ) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        tokio::fs::create_dir_all(cache_dir)
            .await
            .context("Failed to create cache directory")?;

        let cache_file = cache_dir.join(CACHE_FILE);
        let existing = match tokio::fs::read_to_string(&cache_file).await {
            Ok(data) => serde_json::from_str::<HashMap<String, CacheEntry>>(&data)
                .unwrap_or_else(|e| {
                    warn!("Discarding unreadable translation cache: {}", e);
                    HashMap::new()
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).context("Failed to read cache file"),
        };

        debug!("Loaded {} cached translation batches", existing.len());
        Ok(Self::build(capacity, Some(cache_file), existing, metrics))
    }

    fn build(
        capacity: usize,
        cache_file: Option<PathBuf>,
        existing: HashMap<String, CacheEntry>,
        metrics: Option<Metrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let mut lru = LruCache::new(capacity);
        for (k, v) in existing {
            lru.put(k, v);
        }
        if let Some(ref m) = metrics {
            m.update_cache_size(lru.len());
        }

        Self {
            inner: Arc::new(CacheInner {
                cache: RwLock::new(lru),
                cache_file,
                metrics,
            }),
        }
    }

    /// Look up a batch, recording a hit or miss
    pub fn get(&self, key: &CacheKey<'_>) -> Option<Vec<String>> {
        let digest = key.digest();
        let found = self
            .inner
            .cache
            .write()
            .get(&digest)
            .filter(|entry| entry.engine == key.engine)
            .map(|entry| entry.translations.clone());

        if let Some(ref m) = self.inner.metrics {
            if found.is_some() {
                m.record_cache_hit();
            } else {
                m.record_cache_miss();
            }
        }
        found
    }

    pub fn put(&self, key: &CacheKey<'_>, translations: &[String]) {
        let mut cache = self.inner.cache.write();
        cache.put(
            key.digest(),
            CacheEntry {
                engine: key.engine,
                translations: translations.to_vec(),
            },
        );
        if let Some(ref m) = self.inner.metrics {
            m.update_cache_size(cache.len());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.cache.write().clear();
        if let Some(ref m) = self.inner.metrics {
            m.update_cache_size(0);
        }
    }

    /// Write entries to disk; a no-op for in-memory caches
    pub async fn save(&self) -> Result<()> {
        let Some(path) = self.inner.cache_file.as_ref() else {
            return Ok(());
        };

        let snapshot: HashMap<String, CacheEntry> = {
            let cache = self.inner.cache.read();
            cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize cache")?;

        tokio::fs::write(path, json)
            .await
            .context("Failed to write cache file")
    }
}
