//! Pure transform: raw upstream schema → canonical operation catalog.
//!
//! The upstream document is a hypermedia JSON Schema shaped as
//! `{definitions: {<name>: {links: [...]}}}`. Each link's `href` may carry
//! two kinds of placeholders:
//!
//! * encoded definition references, `{(%23%2Fdefinitions%2F...)}`, which are
//!   URI-decoded to a JSON pointer and resolved to a parameter name from the
//!   identities the pointer traverses;
//! * plain `{name}` placeholders.
//!
//! Raw links that collapse to the same `(method, path_template)` merge:
//! descriptions concatenate, required params union in first-seen order and
//! search text appends. `serde_json`'s map keeps definition keys sorted, so
//! merge order is stable for a fixed document.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::debug;

use hiro_types::{Operation, PathParam};

/// Result of normalizing one root schema.
#[derive(Debug, Clone)]
pub struct NormalizedSchema {
    /// Canonical catalog; `operation_id` values are pairwise distinct.
    pub operations: Vec<Operation>,
    /// The raw root document, retained verbatim so the executor can hand
    /// `definitions` to body validators.
    pub root_schema: Value,
}

/// Normalize the upstream root schema into the operation catalog.
pub fn normalize_root_schema(root: &Value) -> NormalizedSchema {
    let mut operations: Vec<Operation> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    let definitions = root
        .get("definitions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (definition_name, definition) in &definitions {
        let Some(links) = definition.get("links").and_then(Value::as_array) else {
            continue;
        };
        for link in links {
            let Some(href) = link.get("href").and_then(Value::as_str) else {
                debug!(definition = %definition_name, "skipping link without href");
                continue;
            };
            let method = coerce_method(link.get("method"));
            let (path_template, path_params) = parse_template(href);
            let operation_id = format!("{method} {path_template}");

            let title = non_empty_str(link.get("title"));
            let description = non_empty_str(link.get("description"));
            let rel = non_empty_str(link.get("rel"));
            let request_schema = link.get("schema").filter(|s| s.is_object()).cloned();

            let mut required_params: Vec<String> =
                path_params.iter().map(|p| p.name.clone()).collect();
            for field in body_required_fields(request_schema.as_ref()) {
                let token = format!("body.{field}");
                if !required_params.contains(&token) {
                    required_params.push(token);
                }
            }

            let search_text = [
                definition_name.as_str(),
                rel.as_deref().unwrap_or(""),
                title.as_deref().unwrap_or(""),
                description.as_deref().unwrap_or(""),
            ]
            .join(" ")
            .to_lowercase()
            .trim()
            .to_string();

            match by_key.get(&operation_id) {
                Some(&index) => {
                    merge_link(&mut operations[index], description, required_params, &search_text);
                }
                None => {
                    by_key.insert(operation_id.clone(), operations.len());
                    operations.push(Operation {
                        operation_id,
                        is_mutating: !matches!(method.as_str(), "GET" | "HEAD"),
                        method,
                        path_template,
                        path_params,
                        required_params,
                        request_schema,
                        definition_name: Some(definition_name.clone()),
                        title,
                        description,
                        rel,
                        search_text,
                    });
                }
            }
        }
    }

    NormalizedSchema {
        operations,
        root_schema: root.clone(),
    }
}

fn merge_link(
    operation: &mut Operation,
    description: Option<String>,
    required_params: Vec<String>,
    search_text: &str,
) {
    if let Some(new_description) = description {
        operation.description = Some(
            match operation.description.take() {
                Some(existing) => format!("{existing} {new_description}"),
                None => new_description,
            }
            .trim()
            .to_string(),
        );
    }
    for param in required_params {
        if !operation.required_params.contains(&param) {
            operation.required_params.push(param);
        }
    }
    if !search_text.is_empty() {
        if !operation.search_text.is_empty() {
            operation.search_text.push(' ');
        }
        operation.search_text.push_str(search_text);
    }
}

fn coerce_method(raw: Option<&Value>) -> String {
    raw.and_then(Value::as_str)
        .map(|m| m.to_uppercase())
        .unwrap_or_else(|| "GET".to_string())
}

fn non_empty_str(raw: Option<&Value>) -> Option<String> {
    raw.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn body_required_fields(schema: Option<&Value>) -> Vec<String> {
    let Some(required) = schema.and_then(|s| s.get("required")).and_then(Value::as_array) else {
        return Vec::new();
    };
    required
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Rewrite a raw href into a `{name}`-templated path plus its ordered
/// parameters.
fn parse_template(href: &str) -> (String, Vec<PathParam>) {
    let mut template = String::with_capacity(href.len());
    let mut params: Vec<PathParam> = Vec::new();
    let mut rest = href;
    let mut index = 0usize;

    while let Some(start) = rest.find('{') {
        template.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            // Unbalanced brace: keep the tail verbatim.
            template.push_str(&rest[start..]);
            return (template, params);
        };
        let raw = &after[..end];
        let (name, source_ref) = resolve_placeholder(raw, index);
        let name = if params.iter().any(|p| p.name == name) {
            format!("{name}_{index}")
        } else {
            name
        };
        template.push('{');
        template.push_str(&name);
        template.push('}');
        params.push(PathParam { name, source_ref });
        rest = &after[end + 1..];
        index += 1;
    }
    template.push_str(rest);
    (template, params)
}

fn resolve_placeholder(raw: &str, index: usize) -> (String, Option<String>) {
    if raw.starts_with('(') && raw.ends_with(')') && raw.len() >= 2 {
        let pointer = percent_decode_str(&raw[1..raw.len() - 1])
            .decode_utf8_lossy()
            .into_owned();
        (pointer_param_name(&pointer, index), Some(pointer))
    } else {
        (sanitize(raw, index), None)
    }
}

/// Resolve a decoded JSON pointer to a parameter name.
///
/// Every segment that immediately follows a `definitions` segment names an
/// identity; two or more collapse to `first_last`, exactly one is used
/// as-is, none falls back to the pointer's last segment.
fn pointer_param_name(pointer: &str, index: usize) -> String {
    let segments: Vec<&str> = pointer
        .split('/')
        .filter(|s| !s.is_empty() && *s != "#")
        .collect();
    let mut names: Vec<&str> = Vec::new();
    for window in segments.windows(2) {
        if window[0] == "definitions" {
            names.push(window[1]);
        }
    }
    match names.len() {
        0 => sanitize(segments.last().copied().unwrap_or(""), index),
        1 => sanitize(names[0], index),
        _ => sanitize(&format!("{}_{}", names[0], names[names.len() - 1]), index),
    }
}

/// Lowercase, collapse runs of anything outside `[a-z0-9]` into `_`, strip
/// edge underscores; empty results become `param_<index>` and a leading digit
/// gets a `p_` prefix.
fn sanitize(raw: &str, index: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for ch in raw.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return format!("param_{index}");
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("p_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const APP_IDENTITY: &str = "%23%2Fdefinitions%2Fapp%2Fdefinitions%2Fidentity";

    fn sample_root() -> Value {
        json!({
            "definitions": {
                "app": {
                    "links": [
                        {
                            "href": "/apps",
                            "method": "GET",
                            "rel": "instances",
                            "title": "List",
                            "description": "List existing apps."
                        },
                        {
                            "href": "/apps",
                            "method": "POST",
                            "rel": "create",
                            "title": "Create",
                            "description": "Create a new app.",
                            "schema": {
                                "type": "object",
                                "properties": {"name": {"type": "string"}},
                                "required": ["name"]
                            }
                        },
                        {
                            "href": format!("/apps/{{({APP_IDENTITY})}}"),
                            "method": "GET",
                            "rel": "self",
                            "title": "Info",
                            "description": "Info for an existing app."
                        }
                    ]
                },
                "release": {
                    "links": [
                        {
                            "href": format!("/apps/{{({APP_IDENTITY})}}/releases"),
                            "method": "GET",
                            "rel": "instances",
                            "title": "List releases"
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn encoded_pointer_collapses_to_first_and_last_identity() {
        let normalized = normalize_root_schema(&sample_root());
        let info = normalized
            .operations
            .iter()
            .find(|o| o.operation_id == "GET /apps/{app_identity}")
            .expect("app info operation");
        assert_eq!(info.path_params.len(), 1);
        assert_eq!(info.path_params[0].name, "app_identity");
        assert_eq!(
            info.path_params[0].source_ref.as_deref(),
            Some("#/definitions/app/definitions/identity")
        );
        assert_eq!(info.required_params, vec!["app_identity"]);
    }

    #[test]
    fn body_required_fields_become_required_params() {
        let normalized = normalize_root_schema(&sample_root());
        let create = normalized
            .operations
            .iter()
            .find(|o| o.operation_id == "POST /apps")
            .unwrap();
        assert_eq!(create.required_params, vec!["body.name"]);
        assert!(create.is_mutating);
        assert!(create.request_schema.is_some());
    }

    #[test]
    fn operation_ids_are_unique_and_classification_holds() {
        let normalized = normalize_root_schema(&sample_root());
        let mut seen = std::collections::HashSet::new();
        for op in &normalized.operations {
            assert!(seen.insert(op.operation_id.clone()), "duplicate {}", op.operation_id);
            assert_eq!(op.is_mutating, !matches!(op.method.as_str(), "GET" | "HEAD"));
            for param in &op.path_params {
                let needle = format!("{{{}}}", param.name);
                assert_eq!(op.path_template.matches(&needle).count(), 1);
            }
        }
    }

    #[test]
    fn normalization_is_deterministic() {
        let root = sample_root();
        let a = serde_json::to_string(&normalize_root_schema(&root).operations).unwrap();
        let b = serde_json::to_string(&normalize_root_schema(&root).operations).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_links_merge_descriptions_and_params() {
        let root = json!({
            "definitions": {
                "addon": {
                    "links": [
                        {"href": "/addons", "method": "GET", "description": "First."},
                        {
                            "href": "/addons",
                            "method": "GET",
                            "description": "Second.",
                            "schema": {"required": ["plan"]}
                        }
                    ]
                }
            }
        });
        let normalized = normalize_root_schema(&root);
        assert_eq!(normalized.operations.len(), 1);
        let op = &normalized.operations[0];
        assert_eq!(op.description.as_deref(), Some("First. Second."));
        assert_eq!(op.required_params, vec!["body.plan"]);
    }

    #[test]
    fn missing_method_defaults_to_get() {
        let root = json!({
            "definitions": {"x": {"links": [{"href": "/things"}, {"href": "/things", "method": 42}]}}
        });
        let normalized = normalize_root_schema(&root);
        assert_eq!(normalized.operations.len(), 1);
        assert_eq!(normalized.operations[0].method, "GET");
        assert!(!normalized.operations[0].is_mutating);
    }

    #[test]
    fn plain_placeholders_are_sanitized() {
        let (template, params) = parse_template("/teams/{Team-Name}/members/{9id}");
        assert_eq!(template, "/teams/{team_name}/members/{p_9id}");
        assert_eq!(params[0].name, "team_name");
        assert_eq!(params[1].name, "p_9id");
        assert!(params[0].source_ref.is_none());
    }

    #[test]
    fn colliding_names_get_index_suffixes() {
        let (template, params) = parse_template("/pipelines/{name}/promote/{name}");
        assert_eq!(template, "/pipelines/{name}/promote/{name_1}");
        assert_eq!(params[1].name, "name_1");
    }

    #[test]
    fn empty_placeholder_uses_positional_name() {
        let (template, params) = parse_template("/x/{--}/y");
        assert_eq!(template, "/x/{param_0}/y");
        assert_eq!(params[0].name, "param_0");
    }

    #[test]
    fn unbalanced_brace_keeps_tail_verbatim() {
        let (template, params) = parse_template("/apps/{broken");
        assert_eq!(template, "/apps/{broken");
        assert!(params.is_empty());
    }

    #[test]
    fn pointer_without_identities_falls_back_to_last_segment() {
        assert_eq!(pointer_param_name("#/parameters/region", 0), "region");
        assert_eq!(pointer_param_name("#/definitions/space", 0), "space");
        assert_eq!(
            pointer_param_name(
                "#/definitions/team/definitions/app/definitions/identity",
                0
            ),
            "team_identity"
        );
    }

    proptest! {
        #[test]
        fn sanitized_names_are_valid_identifiers(raw in "\\PC{0,24}", index in 0usize..16) {
            let name = sanitize(&raw, index);
            let valid = regex::Regex::new(
                r"^([a-z][a-z0-9_]*|p_[0-9][a-z0-9_]*|param_[0-9]+)$"
            ).unwrap();
            prop_assert!(valid.is_match(&name), "invalid name {:?} from {:?}", name, raw);
            prop_assert!(!name.contains("__"));
        }
    }
}
