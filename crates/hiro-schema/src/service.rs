//! The schema service: authoritative catalog owner.
//!
//! Readers take cheap `Arc` snapshots; a refresh rebuilds the catalog off to
//! the side and swaps it in atomically. Refreshes are single-flight: a caller
//! arriving while one is in flight waits for it and returns instead of
//! hitting the upstream again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use reqwest::header::{ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use hiro_types::{Config, Operation};

use crate::cache::{self, CatalogCacheFile, CACHE_VERSION};
use crate::normalize::normalize_root_schema;

/// Docs context is clamped to this many characters after stripping.
const DOCS_CONTEXT_MAX_CHARS: usize = 30_000;

#[derive(Default)]
struct CatalogState {
    operations: Arc<Vec<Arc<Operation>>>,
    by_id: Arc<HashMap<String, Arc<Operation>>>,
    root_schema: Option<Arc<Value>>,
    docs_context: Option<Arc<str>>,
    schema_etag: Option<String>,
    docs_etag: Option<String>,
    docs_last_modified: Option<String>,
    /// Bumped on every catalog or docs-context publication; the search index
    /// owner rebuilds when it observes a new value.
    generation: u64,
}

/// Owns the in-memory catalog and keeps it fresh against the upstream
/// schema and docs endpoints.
pub struct SchemaService {
    config: Arc<Config>,
    client: reqwest::Client,
    state: RwLock<CatalogState>,
    refresh_gate: Mutex<()>,
    /// Completed-refresh counter used by the single-flight join check.
    refresh_seq: AtomicU64,
}

impl SchemaService {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hiro/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build schema HTTP client")?;
        Ok(Self {
            config,
            client,
            state: RwLock::new(CatalogState::default()),
            refresh_gate: Mutex::new(()),
            refresh_seq: AtomicU64::new(0),
        })
    }

    /// Construct the service and attempt the one-time cold boot from the
    /// on-disk cache. A missing or rejected cache file leaves the catalog
    /// empty; `ensure_ready` fills it on first use.
    pub async fn bootstrap(config: Arc<Config>) -> Result<Arc<Self>> {
        let service = Arc::new(Self::new(config)?);
        service.cold_boot().await;
        Ok(service)
    }

    async fn cold_boot(&self) {
        let Some(cached) = cache::load(&self.config.catalog_cache_path).await else {
            return;
        };
        let count = cached.operations.len();
        let mut state = self.state.write().await;
        Self::publish_operations(&mut state, cached.operations);
        state.root_schema = Some(Arc::new(cached.root_schema));
        state.docs_context = cached.docs_context.map(Arc::from);
        state.schema_etag = cached.schema_etag;
        state.docs_etag = cached.docs_etag;
        state.docs_last_modified = cached.docs_last_modified;
        state.generation += 1;
        info!(operations = count, "loaded operation catalog from cache");
    }

    fn publish_operations(state: &mut CatalogState, operations: Vec<Operation>) {
        let operations: Vec<Arc<Operation>> = operations.into_iter().map(Arc::new).collect();
        let by_id = operations
            .iter()
            .map(|op| (op.operation_id.clone(), Arc::clone(op)))
            .collect::<HashMap<_, _>>();
        state.operations = Arc::new(operations);
        state.by_id = Arc::new(by_id);
    }

    /// Block until the catalog is usable, forcing a refresh when it is empty.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.state.read().await.operations.is_empty() {
            self.refresh(true).await?;
        }
        Ok(())
    }

    /// Refresh the catalog and docs context.
    ///
    /// `force` skips the conditional validators. Concurrent callers join the
    /// in-flight refresh instead of starting another one.
    pub async fn refresh(&self, force: bool) -> Result<()> {
        let seq_at_entry = self.refresh_seq.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_seq.load(Ordering::Acquire) != seq_at_entry {
            debug!("joined a concurrent schema refresh");
            return Ok(());
        }
        let outcome = self.refresh_locked(force).await;
        if outcome.is_ok() {
            self.refresh_seq.fetch_add(1, Ordering::Release);
        }
        outcome
    }

    async fn refresh_locked(&self, mut force: bool) -> Result<()> {
        let schema_changed = loop {
            let etag = self.state.read().await.schema_etag.clone();
            let mut request = self
                .client
                .get(&self.config.schema_url)
                .header(ACCEPT, &self.config.accept_header);
            if !force {
                if let Some(etag) = etag {
                    request = request.header(IF_NONE_MATCH, etag);
                }
            }
            let response = request.send().await.context("schema fetch failed")?;

            if response.status() == StatusCode::NOT_MODIFIED {
                if self.state.read().await.operations.is_empty() {
                    // A 304 with nothing in memory means our validator is
                    // stale relative to the lost catalog; refetch for real.
                    warn!("schema endpoint returned 304 but no catalog is loaded; refetching");
                    force = true;
                    continue;
                }
                debug!("upstream schema unchanged (304)");
                break false;
            }
            if !response.status().is_success() {
                anyhow::bail!("schema endpoint returned {}", response.status());
            }

            let new_etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let root: Value = response
                .json()
                .await
                .context("schema endpoint returned invalid JSON")?;
            let normalized = normalize_root_schema(&root);
            let count = normalized.operations.len();

            let mut state = self.state.write().await;
            Self::publish_operations(&mut state, normalized.operations);
            state.root_schema = Some(Arc::new(normalized.root_schema));
            if new_etag.is_some() {
                state.schema_etag = new_etag;
            }
            state.generation += 1;
            drop(state);
            info!(operations = count, "published operation catalog");
            break true;
        };

        let docs_changed = self.refresh_docs().await;

        if schema_changed || docs_changed {
            if let Err(err) = self.persist_cache().await {
                warn!("failed to persist catalog cache: {err:#}");
            }
        }
        Ok(())
    }

    /// Conditionally refetch the docs page feeding the search side channel.
    /// Failures are logged and leave the stored context untouched.
    async fn refresh_docs(&self) -> bool {
        let (etag, last_modified) = {
            let state = self.state.read().await;
            (state.docs_etag.clone(), state.docs_last_modified.clone())
        };
        let mut request = self
            .client
            .get(&self.config.docs_url)
            .header(ACCEPT, "text/html");
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        } else if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("docs fetch failed: {err}");
                return false;
            }
        };
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("docs context unchanged (304)");
            return false;
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "docs endpoint returned non-OK");
            return false;
        }

        let new_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let new_last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to read docs body: {err}");
                return false;
            }
        };
        let stripped = strip_docs_html(&body);

        let mut state = self.state.write().await;
        state.docs_etag = new_etag;
        state.docs_last_modified = new_last_modified;
        if state.docs_context.as_deref() != Some(stripped.as_str()) {
            state.docs_context = Some(Arc::from(stripped));
            state.generation += 1;
            info!("updated docs context");
            true
        } else {
            false
        }
    }

    async fn persist_cache(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            let Some(root_schema) = state.root_schema.as_ref() else {
                // Nothing worth persisting before the first schema load.
                return Ok(());
            };
            CatalogCacheFile {
                version: CACHE_VERSION,
                cached_at: Utc::now(),
                schema_etag: state.schema_etag.clone(),
                docs_etag: state.docs_etag.clone(),
                docs_last_modified: state.docs_last_modified.clone(),
                operations: state
                    .operations
                    .iter()
                    .map(|op| Operation::clone(op))
                    .collect(),
                root_schema: Value::clone(root_schema),
                docs_context: state.docs_context.as_deref().map(str::to_string),
            }
        };
        cache::save(&self.config.catalog_cache_path, &snapshot).await
    }

    /// Spawn the interval-driven background refresh. Uses the same join
    /// point as `ensure_ready`, so a tick never races a forced refresh.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let period = Duration::from_millis(service.config.schema_refresh_interval_ms.max(1_000));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = service.refresh(false).await {
                    warn!("background schema refresh failed: {err:#}");
                }
            }
        })
    }

    /// Look up one operation by its stable identifier.
    pub async fn resolve(&self, operation_id: &str) -> Option<Arc<Operation>> {
        self.state.read().await.by_id.get(operation_id).cloned()
    }

    /// Snapshot of the published catalog.
    pub async fn operations(&self) -> Arc<Vec<Arc<Operation>>> {
        Arc::clone(&self.state.read().await.operations)
    }

    /// The raw upstream root schema, for body validators.
    pub async fn root_schema(&self) -> Option<Arc<Value>> {
        self.state.read().await.root_schema.clone()
    }

    /// The stripped docs blob, for the search side channel.
    pub async fn docs_context(&self) -> Option<Arc<str>> {
        self.state.read().await.docs_context.clone()
    }

    /// Monotonic catalog version; changes whenever operations or docs do.
    pub async fn catalog_generation(&self) -> u64 {
        self.state.read().await.generation
    }
}

/// Drop `<script>`/`<style>` blocks and all tags, collapse whitespace and
/// clamp to the docs-context budget.
fn strip_docs_html(html: &str) -> String {
    let script = Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap();
    let style = Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap();
    let tag = Regex::new(r"(?s)<[^>]+>").unwrap();
    let whitespace = Regex::new(r"\s+").unwrap();

    let text = script.replace_all(html, " ");
    let text = style.replace_all(&text, " ");
    let text = tag.replace_all(&text, " ");
    let text = whitespace.replace_all(&text, " ");
    let text = text.trim();

    match text.char_indices().nth(DOCS_CONTEXT_MAX_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
