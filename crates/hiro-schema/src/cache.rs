//! On-disk catalog cache.
//!
//! The cache lets the service boot with a warm catalog and carry conditional
//! validators across restarts. Payloads with the wrong version or with
//! missing required fields are discarded with a warning, never trusted.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use hiro_types::Operation;

/// The only accepted payload version.
pub const CACHE_VERSION: u32 = 1;

/// Persisted catalog snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCacheFile {
    pub version: u32,
    pub cached_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_last_modified: Option<String>,
    pub operations: Vec<Operation>,
    pub root_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_context: Option<String>,
}

/// Read and validate the cache file; a missing file is not an error, a
/// corrupt or mis-versioned one is discarded.
pub async fn load(path: &Path) -> Option<CatalogCacheFile> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no catalog cache on disk");
            return None;
        }
        Err(err) => {
            warn!(path = %path.display(), "failed to read catalog cache: {err}");
            return None;
        }
    };
    let parsed: CatalogCacheFile = match serde_json::from_slice(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(path = %path.display(), "discarding corrupt catalog cache: {err}");
            return None;
        }
    };
    if parsed.version != CACHE_VERSION {
        warn!(
            path = %path.display(),
            version = parsed.version,
            "discarding catalog cache with unsupported version"
        );
        return None;
    }
    Some(parsed)
}

/// Serialize the snapshot, creating parent directories as needed.
pub async fn save(path: &Path, cache: &CatalogCacheFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
        }
    }
    let payload = serde_json::to_vec(cache).context("failed to serialize catalog cache")?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write catalog cache {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> CatalogCacheFile {
        CatalogCacheFile {
            version: CACHE_VERSION,
            cached_at: Utc::now(),
            schema_etag: Some("\"abc\"".into()),
            docs_etag: None,
            docs_last_modified: None,
            operations: Vec::new(),
            root_schema: json!({"definitions": {}}),
            docs_context: Some("platform api".into()),
        }
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/catalog-cache.json");
        save(&path, &snapshot()).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.version, CACHE_VERSION);
        assert_eq!(loaded.schema_etag.as_deref(), Some("\"abc\""));
        assert_eq!(loaded.docs_context.as_deref(), Some("platform api"));
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).await.is_none());
    }

    #[tokio::test]
    async fn wrong_version_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut stale = snapshot();
        stale.version = 2;
        save(&path, &stale).await.unwrap();
        assert!(load(&path).await.is_none());
    }

    #[tokio::test]
    async fn garbage_and_missing_fields_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(load(&path).await.is_none());
        tokio::fs::write(&path, serde_json::to_vec(&json!({"version": 1})).unwrap())
            .await
            .unwrap();
        assert!(load(&path).await.is_none());
    }
}
