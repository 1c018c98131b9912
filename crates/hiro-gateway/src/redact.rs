//! Sensitive-data scrubbing applied to every upstream response.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Removes credential-bearing headers and blanks credential-bearing body
/// keys before a response is returned or cached.
pub struct Redactor {
    header_pattern: Regex,
    key_pattern: Regex,
}

impl Redactor {
    pub fn new() -> Self {
        Self {
            header_pattern: Regex::new(r"(?i)authorization|cookie|set-cookie|x-api-key").unwrap(),
            key_pattern: Regex::new(r"(?i)token|authorization|password|secret").unwrap(),
        }
    }

    /// Drop sensitive headers, lowercase the rest and pull out `request-id`.
    pub fn clean_headers(
        &self,
        headers: &[(String, String)],
    ) -> (BTreeMap<String, String>, Option<String>) {
        let mut cleaned = BTreeMap::new();
        let mut request_id = None;
        for (name, value) in headers {
            let name = name.to_lowercase();
            if name == "request-id" {
                request_id = Some(value.clone());
            }
            if self.header_pattern.is_match(&name) {
                continue;
            }
            cleaned.insert(name, value.clone());
        }
        (cleaned, request_id)
    }

    /// Replace the value of every matching key, at any nesting level, with
    /// `"[REDACTED]"`.
    pub fn redact_body(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    if self.key_pattern.is_match(key) {
                        *entry = Value::String(REDACTED.to_string());
                    } else {
                        self.redact_body(entry);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact_body(item);
                }
            }
            _ => {}
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}
