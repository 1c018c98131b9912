//! The three-tool surface: `search`, `execute`, `auth_status`.
//!
//! The façade owns the search index, rebuilding it whenever it observes a new
//! catalog generation, resolves the caller identity from transport headers
//! and maps the error taxonomy into the uniform envelope.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use hiro_auth::OAuthService;
use hiro_schema::SchemaService;
use hiro_search::SearchIndex;
use hiro_types::{
    AuthStatus, Config, ErrorEnvelope, ExecuteRequest, ExecuteResponse, GatewayError,
    SearchRequest, SearchResponse,
};

use crate::executor::Executor;

/// Caller identity used when the transport supplies none.
const DEFAULT_USER_ID: &str = "default";

struct IndexedCatalog {
    generation: u64,
    index: Arc<SearchIndex>,
}

/// Routes the three named tools to the schema service, search index,
/// executor and OAuth service.
pub struct ToolFacade {
    config: Arc<Config>,
    schema: Arc<SchemaService>,
    oauth: Arc<OAuthService>,
    executor: Arc<Executor>,
    index: RwLock<IndexedCatalog>,
}

impl ToolFacade {
    pub fn new(
        config: Arc<Config>,
        schema: Arc<SchemaService>,
        oauth: Arc<OAuthService>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            config,
            schema,
            oauth,
            executor,
            index: RwLock::new(IndexedCatalog {
                generation: 0,
                index: Arc::new(SearchIndex::empty()),
            }),
        }
    }

    /// Rank catalog operations against a free-text query. Search needs no
    /// caller identity; the parameter keeps the three tools uniform.
    pub async fn search(
        &self,
        _headers: &HashMap<String, String>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, ErrorEnvelope> {
        if request.query.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "query must not be empty".to_string(),
            }
            .envelope());
        }
        self.ensure_ready().await?;
        let index = self.current_index().await;
        let results = index.search(
            &request.query,
            request.limit,
            request.resource_filter.as_deref().unwrap_or(&[]),
        );
        Ok(SearchResponse { results })
    }

    /// Validate and forward one operation invocation.
    pub async fn execute(
        &self,
        headers: &HashMap<String, String>,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, ErrorEnvelope> {
        self.ensure_ready().await?;
        let user_id = self.resolve_user_id(headers);
        self.executor
            .execute(&user_id, request)
            .await
            .map_err(|err| err.envelope())
    }

    /// Report the caller's stored credential state.
    pub async fn auth_status(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<AuthStatus, ErrorEnvelope> {
        let user_id = self.resolve_user_id(headers);
        self.oauth
            .status(&user_id)
            .await
            .map_err(|err| ErrorEnvelope {
                code: "REQUEST_FAILED".to_string(),
                message: format!("credential lookup failed: {err:#}"),
                status: Some(502),
            })
    }

    async fn ensure_ready(&self) -> Result<(), ErrorEnvelope> {
        self.schema.ensure_ready().await.map_err(|err| ErrorEnvelope {
            code: "SCHEMA_UNAVAILABLE".to_string(),
            message: format!("operation catalog is unavailable: {err:#}"),
            status: Some(503),
        })
    }

    /// The index lags the catalog by at most one observation: whoever first
    /// sees a new generation rebuilds it, everyone else keeps reading the
    /// previous snapshot.
    async fn current_index(&self) -> Arc<SearchIndex> {
        let generation = self.schema.catalog_generation().await;
        {
            let guard = self.index.read().await;
            if guard.generation == generation {
                return Arc::clone(&guard.index);
            }
        }
        let mut guard = self.index.write().await;
        if guard.generation != generation {
            let operations = self.schema.operations().await;
            let docs_context = self.schema.docs_context().await;
            guard.index = Arc::new(SearchIndex::build(&operations, docs_context.as_deref()));
            guard.generation = generation;
            debug!(generation, operations = operations.len(), "rebuilt search index");
        }
        Arc::clone(&guard.index)
    }

    /// Caller identity: the configured header, then `x-user-id`, then the
    /// literal `default`. Header names compare lowercased.
    pub fn resolve_user_id(&self, headers: &HashMap<String, String>) -> String {
        let lookup = |wanted: &str| {
            headers
                .iter()
                .find(|(name, _)| name.to_lowercase() == wanted)
                .map(|(_, value)| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        lookup(&self.config.user_id_header.to_lowercase())
            .or_else(|| lookup("x-user-id"))
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
    }
}
