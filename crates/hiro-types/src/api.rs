//! Request and response types of the three-tool surface.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input of the `search` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text intent, minimum length 1.
    pub query: String,
    /// Result cap, clamped to `[1, 25]`; defaults to 8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Optional OR-filter over definition name, path and operation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<Vec<String>>,
}

/// One ranked hit returned by `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub summary: String,
    pub required_params: Vec<String>,
    pub is_mutating: bool,
    /// Relevance score, rounded to 4 fractional digits.
    pub score: f64,
}

/// Output of the `search` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Input of the `execute` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub operation_id: String,
    /// Values for the `{name}` placeholders; empty strings count as missing.
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    /// Query string values; each must be a string, number or boolean.
    #[serde(default)]
    pub query_params: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// When set, the upstream is never called; mutating operations get a
    /// confirmation token minted into the response body.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_write_token: Option<String>,
}

/// Echo of the rendered upstream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEcho {
    pub method: String,
    pub url: String,
    pub operation_id: String,
}

/// Output of the `execute` tool.
///
/// `status` is `0` for dry runs (no upstream call was made). Headers are
/// cleaned of sensitive names and the body is redacted and size-bounded
/// before it lands here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub request: RequestEcho,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// Output of the `auth_status` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}
