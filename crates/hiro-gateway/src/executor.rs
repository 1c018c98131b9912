//! The execution pipeline for one `execute` call.
//!
//! Order of business: resolve the operation, validate path/query/body, render
//! the URL, short-circuit dry runs, enforce the write gate, vend a
//! credential, consult the read cache, send with retry and a per-attempt
//! timeout, then parse, clean, redact, bound and cache the response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jsonschema::{Draft, JSONSchema};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use hiro_crypto::confirmation_token;
use hiro_types::{Config, ExecuteRequest, ExecuteResponse, GatewayError, Operation, RequestEcho};

use crate::capabilities::{CredentialVendor, OperationSource};
use crate::read_cache::ReadCache;
use crate::redact::Redactor;
use crate::transport::{HttpTransport, TransportError, UpstreamRequest};

/// Mirrors JavaScript's `encodeURIComponent` unreserved set.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const RETRY_BACKOFF_MS: u64 = 150;

/// Executes validated operations against the upstream API.
///
/// Collaborators arrive as capabilities at construction time; swapping any of
/// them for a test double exercises the full pipeline without a network.
pub struct Executor {
    config: Arc<Config>,
    operations: Arc<dyn OperationSource>,
    credentials: Arc<dyn CredentialVendor>,
    transport: Arc<dyn HttpTransport>,
    /// Compile-once memo of body validators, keyed by operation id.
    validators: Mutex<std::collections::HashMap<String, Arc<JSONSchema>>>,
    read_cache: ReadCache,
    redactor: Redactor,
}

impl Executor {
    pub fn new(
        config: Arc<Config>,
        operations: Arc<dyn OperationSource>,
        credentials: Arc<dyn CredentialVendor>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let read_cache = ReadCache::new(config.read_cache_ttl_ms);
        Self {
            config,
            operations,
            credentials,
            transport,
            validators: Mutex::new(std::collections::HashMap::new()),
            read_cache,
            redactor: Redactor::new(),
        }
    }

    /// Run one `execute` call for `user_id`.
    pub async fn execute(
        &self,
        user_id: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, GatewayError> {
        let Some(operation) = self.operations.resolve(&request.operation_id).await else {
            return Err(GatewayError::OperationNotFound {
                operation_id: request.operation_id.clone(),
            });
        };

        self.validate_path_params(&operation, request)?;
        self.validate_query_params(request)?;
        self.validate_body(&operation, request).await?;

        let url = self.render_url(&operation, request)?;
        let echo = RequestEcho {
            method: operation.method.clone(),
            url: url.clone(),
            operation_id: operation.operation_id.clone(),
        };

        if request.dry_run {
            return Ok(self.dry_run_response(user_id, &operation, request, echo));
        }

        if operation.is_mutating {
            if !self.config.allow_writes {
                return Err(GatewayError::WritesDisabled);
            }
            let expected = self.expected_confirmation(user_id, &operation, request);
            if request.confirm_write_token.as_deref() != Some(expected.as_str()) {
                return Err(GatewayError::WriteConfirmationRequired);
            }
        }

        let access_token = match self.credentials.access_token(user_id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Err(GatewayError::AuthRequired {
                    user_id: user_id.to_string(),
                })
            }
            Err(err) => {
                return Err(GatewayError::RequestFailed {
                    reason: format!("credential vending failed: {err:#}"),
                })
            }
        };

        let cache_key = self.read_cache_key(user_id, &operation, &url);
        if let Some(key) = &cache_key {
            if let Some(mut hit) = self.read_cache.lookup(key) {
                debug!(operation_id = %operation.operation_id, "read cache hit");
                hit.warnings
                    .get_or_insert_with(Vec::new)
                    .push("served_from_read_cache".to_string());
                return Ok(hit);
            }
        }

        let upstream = self.upstream_request(&operation, request, &url, &access_token);
        let response = self.send_with_retry(&operation, &upstream).await?;

        let parsed = parse_body(response.status, &response.headers, &response.body_text);
        let (headers, request_id) = self.redactor.clean_headers(&response.headers);
        let mut body = parsed;
        self.redactor.redact_body(&mut body);

        if !(200..300).contains(&response.status) {
            let serialized = serde_json::to_string(&body).unwrap_or_default();
            return Err(GatewayError::UpstreamApi {
                status: response.status,
                preview: clamp_chars(&serialized, self.config.execute_body_preview_chars),
            });
        }

        let mut warnings = Vec::new();
        let serialized = serde_json::to_string(&body).unwrap_or_default();
        let body = if serialized.len() > self.config.execute_max_body_bytes {
            warnings.push(format!(
                "response_body_truncated: {} bytes exceeded the {}-byte limit",
                serialized.len(),
                self.config.execute_max_body_bytes
            ));
            let preview = clamp_chars(&serialized, self.config.execute_body_preview_chars);
            json!({
                "truncated": true,
                "original_size_bytes": serialized.len(),
                "preview_is_partial": preview.chars().count() < serialized.chars().count(),
                "preview": preview,
            })
        } else {
            body
        };

        let result = ExecuteResponse {
            request: echo,
            status: response.status,
            headers,
            body,
            request_id,
            warnings: (!warnings.is_empty()).then_some(warnings),
        };
        if let Some(key) = cache_key {
            self.read_cache.store(key, &result);
        }
        Ok(result)
    }

    fn validate_path_params(
        &self,
        operation: &Operation,
        request: &ExecuteRequest,
    ) -> Result<(), GatewayError> {
        // An empty string counts as missing here, unlike for query params.
        let missing: Vec<&str> = operation
            .path_params
            .iter()
            .filter(|param| {
                request
                    .path_params
                    .get(&param.name)
                    .map_or(true, |value| value.is_empty())
            })
            .map(|param| param.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Validation {
                message: format!("missing path parameter(s): {}", missing.join(", ")),
            })
        }
    }

    fn validate_query_params(&self, request: &ExecuteRequest) -> Result<(), GatewayError> {
        for (name, value) in &request.query_params {
            if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                return Err(GatewayError::Validation {
                    message: format!("query parameter '{name}' must be a string, number or boolean"),
                });
            }
        }
        Ok(())
    }

    async fn validate_body(
        &self,
        operation: &Operation,
        request: &ExecuteRequest,
    ) -> Result<(), GatewayError> {
        let Some(schema) = &operation.request_schema else {
            return Ok(());
        };
        let validator = self.body_validator(&operation.operation_id, schema).await?;
        let body = request.body.clone().unwrap_or_else(|| json!({}));
        if let Err(errors) = validator.validate(&body) {
            let details: Vec<String> = errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect();
            return Err(GatewayError::Validation {
                message: format!("body failed schema validation: {}", details.join("; ")),
            });
        }
        Ok(())
    }

    async fn body_validator(
        &self,
        operation_id: &str,
        schema: &Value,
    ) -> Result<Arc<JSONSchema>, GatewayError> {
        if let Some(validator) = self.validators.lock().get(operation_id) {
            return Ok(Arc::clone(validator));
        }
        let Some(root) = self.operations.root_schema().await else {
            return Err(GatewayError::SchemaUnavailable);
        };

        // Graft the root definitions onto the link schema so `#/definitions/...`
        // references resolve.
        let mut doc = schema.clone();
        if let (Some(object), Some(definitions)) = (doc.as_object_mut(), root.get("definitions")) {
            object.insert("definitions".to_string(), definitions.clone());
        }
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&doc)
            .map_err(|err| GatewayError::RequestFailed {
                reason: format!("request schema for '{operation_id}' failed to compile: {err}"),
            })?;
        let validator = Arc::new(compiled);
        self.validators
            .lock()
            .insert(operation_id.to_string(), Arc::clone(&validator));
        Ok(validator)
    }

    fn render_url(
        &self,
        operation: &Operation,
        request: &ExecuteRequest,
    ) -> Result<String, GatewayError> {
        let mut path = operation.path_template.clone();
        for param in &operation.path_params {
            if let Some(value) = request.path_params.get(&param.name) {
                let encoded = utf8_percent_encode(value, URL_COMPONENT).to_string();
                path = path.replace(&format!("{{{}}}", param.name), &encoded);
            }
        }

        let base = self.config.api_base_url.trim_end_matches('/');
        let mut url = format!("{base}{path}");
        if !request.query_params.is_empty() {
            let mut parsed = Url::parse(&url).map_err(|err| GatewayError::RequestFailed {
                reason: format!("rendered URL is invalid: {err}"),
            })?;
            {
                let mut pairs = parsed.query_pairs_mut();
                for (name, value) in &request.query_params {
                    pairs.append_pair(name, &scalar_to_string(value));
                }
            }
            url = parsed.into();
        }
        Ok(url)
    }

    fn dry_run_response(
        &self,
        user_id: &str,
        operation: &Operation,
        request: &ExecuteRequest,
        echo: RequestEcho,
    ) -> ExecuteResponse {
        let mut body = serde_json::Map::new();
        body.insert("dry_run".to_string(), Value::Bool(true));
        let mut warnings = Vec::new();
        if operation.is_mutating {
            body.insert(
                "confirm_write_token".to_string(),
                Value::String(self.expected_confirmation(user_id, operation, request)),
            );
            if !self.config.allow_writes {
                warnings.push(
                    "writes_disabled: mutating calls are rejected until writes are enabled"
                        .to_string(),
                );
            }
        }
        ExecuteResponse {
            request: echo,
            status: 0,
            headers: BTreeMap::new(),
            body: Value::Object(body),
            request_id: None,
            warnings: (!warnings.is_empty()).then_some(warnings),
        }
    }

    fn expected_confirmation(
        &self,
        user_id: &str,
        operation: &Operation,
        request: &ExecuteRequest,
    ) -> String {
        use secrecy::ExposeSecret;
        let path_params = Value::Object(
            request
                .path_params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );
        let query_params = Value::Object(request.query_params.clone());
        let body = request.body.clone().unwrap_or(Value::Null);
        confirmation_token(
            self.config.write_confirmation_secret.expose_secret(),
            user_id,
            &operation.operation_id,
            &path_params,
            &query_params,
            &body,
        )
    }

    /// A key exists only for non-mutating GET/HEAD calls with caching on.
    fn read_cache_key(&self, user_id: &str, operation: &Operation, url: &str) -> Option<String> {
        (self.config.read_cache_ttl_ms > 0 && !operation.is_mutating && operation.is_idempotent())
            .then(|| format!("{user_id}:{}:{url}", operation.operation_id))
    }

    fn upstream_request(
        &self,
        operation: &Operation,
        request: &ExecuteRequest,
        url: &str,
        access_token: &str,
    ) -> UpstreamRequest {
        let body = if operation.is_mutating {
            request.body.clone()
        } else {
            None
        };
        UpstreamRequest {
            method: operation.method.clone(),
            url: url.to_string(),
            headers: vec![
                ("accept".to_string(), self.config.accept_header.clone()),
                ("authorization".to_string(), format!("Bearer {access_token}")),
            ],
            body,
            timeout_ms: self.config.request_timeout_ms,
        }
    }

    /// Idempotent calls retry on network errors, 429 and 5xx, up to
    /// `max_retries` extra attempts with linear backoff. Everything else is
    /// sent exactly once. A per-attempt timeout is terminal.
    async fn send_with_retry(
        &self,
        operation: &Operation,
        upstream: &UpstreamRequest,
    ) -> Result<crate::transport::UpstreamResponse, GatewayError> {
        let attempts = if operation.is_idempotent() {
            self.config.max_retries + 1
        } else {
            1
        };

        for attempt in 1..=attempts {
            match self.transport.send(upstream).await {
                Ok(response) => {
                    let retryable =
                        response.status == 429 || (500..=599).contains(&response.status);
                    if retryable && attempt < attempts {
                        warn!(
                            status = response.status,
                            attempt, "retrying idempotent upstream call"
                        );
                        tokio::time::sleep(Duration::from_millis(
                            RETRY_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(TransportError::Timeout { timeout_ms }) => {
                    return Err(GatewayError::Timeout { timeout_ms });
                }
                Err(TransportError::Network { reason }) => {
                    if attempt < attempts {
                        warn!(attempt, "upstream network error, retrying: {reason}");
                        tokio::time::sleep(Duration::from_millis(
                            RETRY_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                        continue;
                    }
                    return Err(GatewayError::RequestFailed { reason });
                }
            }
        }
        Err(GatewayError::RequestFailed {
            reason: "retry budget exhausted without a response".to_string(),
        })
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 204 is bodiless; JSON content types parse with a raw-text fallback;
/// anything else is text, with empty text mapping to null.
fn parse_body(status: u16, headers: &[(String, String)], body_text: &str) -> Value {
    if status == 204 {
        return Value::Null;
    }
    let is_json = headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type")
            && value.to_ascii_lowercase().contains("application/json")
    });
    if is_json {
        serde_json::from_str(body_text)
            .unwrap_or_else(|_| Value::String(body_text.to_string()))
    } else if body_text.is_empty() {
        Value::Null
    } else {
        Value::String(body_text.to_string())
    }
}

/// First `limit` characters, respecting char boundaries.
fn clamp_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_body_handles_the_content_type_matrix() {
        let json_headers = vec![(
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        )];
        assert_eq!(
            parse_body(200, &json_headers, r#"{"ok":true}"#),
            json!({"ok": true})
        );
        assert_eq!(
            parse_body(200, &json_headers, "not json"),
            Value::String("not json".into())
        );
        assert_eq!(parse_body(204, &json_headers, "ignored"), Value::Null);
        assert_eq!(
            parse_body(200, &[("content-type".into(), "text/plain".into())], "hi"),
            Value::String("hi".into())
        );
        assert_eq!(parse_body(200, &[], ""), Value::Null);
    }

    #[test]
    fn clamp_chars_respects_boundaries() {
        assert_eq!(clamp_chars("hello", 10), "hello");
        assert_eq!(clamp_chars("hello", 2), "he");
        assert_eq!(clamp_chars("héllo", 2), "hé");
    }

    #[test]
    fn scalar_rendering_matches_query_semantics() {
        assert_eq!(scalar_to_string(&json!("x")), "x");
        assert_eq!(scalar_to_string(&json!(3)), "3");
        assert_eq!(scalar_to_string(&json!(true)), "true");
    }
}
