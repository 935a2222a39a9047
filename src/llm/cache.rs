// On-disk response cache
//
// Keyed by a sha256 over stage name + both prompts + temperature, so
// re-running an iteration with identical inputs is idempotent and cheap.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::types::ChatRequest;
use super::ChatModel;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    cache_key: String,
    model: String,
    temperature: f32,
    created: DateTime<Utc>,
    response: String,
}

/// Wraps any `ChatModel` with a file-per-response cache.
pub struct CachedModel {
    inner: Box<dyn ChatModel>,
    cache_dir: PathBuf,
}

impl CachedModel {
    pub fn new(inner: Box<dyn ChatModel>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.into(),
        }
    }

    fn digest(request: &ChatRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.cache_key.as_bytes());
        hasher.update([0]);
        hasher.update(request.system.as_bytes());
        hasher.update([0]);
        hasher.update(request.user.as_bytes());
        hasher.update([0]);
        hasher.update(request.temperature.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(format!("{digest}.json"))
    }

    fn read_entry(path: &Path) -> Option<CacheEntry> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

#[async_trait]
impl ChatModel for CachedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let digest = Self::digest(request);
        let path = self.entry_path(&digest);

        if let Some(entry) = Self::read_entry(&path) {
            debug!(key = %request.cache_key, digest = &digest[..12], "response cache hit");
            return Ok(entry.response);
        }

        if request.fake {
            anyhow::bail!(
                "dry run: no cached response for {} ({})",
                request.cache_key,
                &digest[..12]
            );
        }

        let response = self.inner.complete(request).await?;

        std::fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.cache_dir.display())
        })?;
        let entry = CacheEntry {
            cache_key: request.cache_key.clone(),
            model: self.inner.name().to_string(),
            temperature: request.temperature,
            created: Utc::now(),
            response: response.clone(),
        };
        let json = serde_json::to_string_pretty(&entry).context("Failed to serialize cache entry")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;

        Ok(response)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
