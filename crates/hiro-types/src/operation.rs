//! The canonical description of one upstream endpoint.

use serde::{Deserialize, Serialize};

/// A single `{name}` placeholder in a path template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathParam {
    /// Sanitized parameter name; exactly one `{name}` appears in the template.
    pub name: String,
    /// Decoded JSON pointer the placeholder was derived from, when the raw
    /// template carried an encoded definition reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

/// One canonical `(method, path-template)` operation in the catalog.
///
/// Operations are produced by the schema normalizer, published atomically by
/// the schema service and never mutated afterwards. `operation_id` is the
/// stable external identifier (`"<METHOD> <path-template>"`) and is unique
/// within a published catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Stable external identifier, `"<METHOD> <path-template>"`.
    pub operation_id: String,
    /// Uppercase HTTP verb.
    pub method: String,
    /// Path with `{name}` placeholders, names sanitized.
    pub path_template: String,
    /// Ordered path placeholders.
    #[serde(default)]
    pub path_params: Vec<PathParam>,
    /// Declared path parameter names plus `body.<field>` tokens for the
    /// top-level required body properties, first-seen order.
    #[serde(default)]
    pub required_params: Vec<String>,
    /// JSON Schema for the request body, when the upstream link declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<serde_json::Value>,
    /// `true` iff the method is anything other than GET or HEAD.
    pub is_mutating: bool,
    /// Upstream definition this operation was lifted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    /// Precomputed lowercase blob fed to the search index.
    #[serde(default)]
    pub search_text: String,
}

impl Operation {
    /// GET and HEAD calls are safe to retry and eligible for the read cache.
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }

    /// Human summary: description, else title, else `"<METHOD> <path>"`.
    pub fn summary(&self) -> String {
        self.description
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.title.as_deref().filter(|s| !s.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", self.method, self.path_template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(method: &str) -> Operation {
        Operation {
            operation_id: format!("{method} /apps"),
            method: method.to_string(),
            path_template: "/apps".to_string(),
            path_params: Vec::new(),
            required_params: Vec::new(),
            request_schema: None,
            is_mutating: !matches!(method, "GET" | "HEAD"),
            definition_name: None,
            title: None,
            description: None,
            rel: None,
            search_text: String::new(),
        }
    }

    #[test]
    fn idempotency_follows_method() {
        assert!(op("GET").is_idempotent());
        assert!(op("HEAD").is_idempotent());
        assert!(!op("POST").is_idempotent());
        assert!(!op("DELETE").is_idempotent());
    }

    #[test]
    fn summary_falls_back_in_order() {
        let mut o = op("GET");
        assert_eq!(o.summary(), "GET /apps");
        o.title = Some("List apps".into());
        assert_eq!(o.summary(), "List apps");
        o.description = Some("List existing apps.".into());
        assert_eq!(o.summary(), "List existing apps.");
    }

    #[test]
    fn blank_description_is_skipped() {
        let mut o = op("GET");
        o.description = Some("   ".into());
        o.title = Some("List".into());
        assert_eq!(o.summary(), "List");
    }
}
