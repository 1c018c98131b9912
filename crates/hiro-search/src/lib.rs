#![forbid(unsafe_code)]

//! **hiro-search** – TF·IDF ranking index over the operation catalog.
//!
//! The index is a pure in-memory structure rebuilt from scratch on every
//! catalog publication; the previous index stays readable until the new one
//! is swapped in by the owner. Scoring is a plain inverted TF·IDF base with a
//! small ladder of exact-substring and method boosts, plus a quarter-point
//! nudge when the query overlaps the upstream docs context.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hiro_types::{Operation, SearchResult};

/// Results returned when the caller does not ask for a limit.
pub const DEFAULT_LIMIT: usize = 8;
/// Hard cap on returned results.
pub const MAX_LIMIT: usize = 25;

const HAYSTACK_BOOST: f64 = 6.0;
const PATH_BOOST: f64 = 3.0;
const TITLE_BOOST: f64 = 2.0;
const METHOD_BOOST: f64 = 1.0;
const DOCS_CONTEXT_BOOST: f64 = 0.25;

/// Lowercase, split on anything outside `[a-z0-9_]`, drop tokens of length
/// one or less.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'))
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

struct IndexedDoc {
    operation_id: String,
    method: String,
    path: String,
    summary: String,
    required_params: Vec<String>,
    is_mutating: bool,
    tf: HashMap<String, f64>,
    max_tf: f64,
    haystack: String,
    path_lc: String,
    title_lc: String,
    method_lc: String,
    filter_blob: String,
}

/// Immutable ranking index over one published catalog.
pub struct SearchIndex {
    docs: Vec<IndexedDoc>,
    idf: HashMap<String, f64>,
    docs_context_tokens: HashSet<String>,
}

impl SearchIndex {
    /// An index over nothing; every query returns no results.
    pub fn empty() -> Self {
        Self {
            docs: Vec::new(),
            idf: HashMap::new(),
            docs_context_tokens: HashSet::new(),
        }
    }

    /// Build the index for `operations`, with an optional docs-context blob
    /// feeding the side-channel boost.
    pub fn build(operations: &[Arc<Operation>], docs_context: Option<&str>) -> Self {
        let mut docs = Vec::with_capacity(operations.len());
        let mut df: HashMap<String, usize> = HashMap::new();

        for op in operations {
            let text = [
                op.operation_id.as_str(),
                op.title.as_deref().unwrap_or(""),
                op.description.as_deref().unwrap_or(""),
                op.search_text.as_str(),
                op.path_template.as_str(),
                op.method.as_str(),
                op.definition_name.as_deref().unwrap_or(""),
            ]
            .join(" ");

            let mut tf: HashMap<String, f64> = HashMap::new();
            for token in tokenize(&text) {
                *tf.entry(token).or_insert(0.0) += 1.0;
            }
            for token in tf.keys() {
                *df.entry(token.clone()).or_insert(0) += 1;
            }
            let max_tf = tf.values().copied().fold(1.0_f64, f64::max);

            docs.push(IndexedDoc {
                operation_id: op.operation_id.clone(),
                method: op.method.clone(),
                path: op.path_template.clone(),
                summary: op.summary(),
                required_params: op.required_params.clone(),
                is_mutating: op.is_mutating,
                tf,
                max_tf,
                haystack: [
                    op.operation_id.as_str(),
                    op.path_template.as_str(),
                    op.title.as_deref().unwrap_or(""),
                    op.description.as_deref().unwrap_or(""),
                    op.rel.as_deref().unwrap_or(""),
                ]
                .join(" ")
                .to_lowercase(),
                path_lc: op.path_template.to_lowercase(),
                title_lc: op.title.as_deref().unwrap_or("").to_lowercase(),
                method_lc: op.method.to_lowercase(),
                filter_blob: [
                    op.definition_name.as_deref().unwrap_or(""),
                    op.path_template.as_str(),
                    op.operation_id.as_str(),
                ]
                .join(" ")
                .to_lowercase(),
            });
        }

        let n = docs.len().max(1) as f64;
        let idf = df
            .into_iter()
            .map(|(token, count)| (token, ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0))
            .collect();

        Self {
            docs,
            idf,
            docs_context_tokens: docs_context
                .map(|text| tokenize(text).into_iter().collect())
                .unwrap_or_default(),
        }
    }

    /// Rank operations against a free-text query.
    ///
    /// A blank query yields no results. `resource_filter` keeps only
    /// operations whose definition name, path or id contains at least one of
    /// the filter strings.
    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        resource_filter: &[String],
    ) -> Vec<SearchResult> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let query_tokens = tokenize(&query);
        let filters: Vec<String> = resource_filter
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();

        let mut hits: Vec<(usize, f64)> = Vec::new();
        for (i, doc) in self.docs.iter().enumerate() {
            if !filters.is_empty() && !filters.iter().any(|f| doc.filter_blob.contains(f.as_str()))
            {
                continue;
            }

            let mut score = 0.0;
            for token in &query_tokens {
                if let Some(tf) = doc.tf.get(token) {
                    score += tf / doc.max_tf * self.idf.get(token).copied().unwrap_or(1.0);
                }
            }
            if doc.haystack.contains(&query) {
                score += HAYSTACK_BOOST;
            }
            if doc.path_lc.contains(&query) {
                score += PATH_BOOST;
            }
            if !doc.title_lc.is_empty() && doc.title_lc.contains(&query) {
                score += TITLE_BOOST;
            }
            if query_tokens.iter().any(|t| *t == doc.method_lc) {
                score += METHOD_BOOST;
            }
            if !self.docs_context_tokens.is_empty()
                && query_tokens
                    .iter()
                    .any(|t| self.docs_context_tokens.contains(t))
            {
                score += DOCS_CONTEXT_BOOST;
            }

            if score > 0.0 {
                hits.push((i, score));
            }
        }

        // sort_by is stable: equal scores keep catalog order.
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        hits.truncate(limit);

        hits.into_iter()
            .map(|(i, score)| {
                let doc = &self.docs[i];
                SearchResult {
                    operation_id: doc.operation_id.clone(),
                    method: doc.method.clone(),
                    path: doc.path.clone(),
                    summary: doc.summary.clone(),
                    required_params: doc.required_params.clone(),
                    is_mutating: doc.is_mutating,
                    score: (score * 10_000.0).round() / 10_000.0,
                }
            })
            .collect()
    }

    /// Number of indexed operations.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(
        method: &str,
        path: &str,
        title: Option<&str>,
        description: Option<&str>,
        definition: Option<&str>,
    ) -> Arc<Operation> {
        Arc::new(Operation {
            operation_id: format!("{method} {path}"),
            method: method.to_string(),
            path_template: path.to_string(),
            path_params: Vec::new(),
            required_params: Vec::new(),
            request_schema: None,
            is_mutating: !matches!(method, "GET" | "HEAD"),
            definition_name: definition.map(str::to_string),
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            rel: None,
            search_text: String::new(),
        })
    }

    fn sample_catalog() -> Vec<Arc<Operation>> {
        vec![
            op("GET", "/apps", Some("List"), Some("List existing apps."), Some("app")),
            op(
                "GET",
                "/apps/{id}/releases",
                Some("List releases"),
                Some("List existing releases."),
                Some("release"),
            ),
            op("POST", "/apps", Some("Create"), Some("Create a new app."), Some("app")),
        ]
    }

    #[test]
    fn tokenizer_drops_short_tokens_and_lowercases() {
        assert_eq!(tokenize("GET /apps/{id}"), vec!["get", "apps", "id"]);
        assert_eq!(tokenize("GET /apps"), vec!["get", "apps"]);
        assert_eq!(tokenize("a b cd_ef"), vec!["cd_ef"]);
    }

    #[test]
    fn list_apps_ranks_first_for_list_apps_query() {
        let index = SearchIndex::build(&sample_catalog(), None);
        let results = index.search("list apps", None, &[]);
        assert!(!results.is_empty());
        assert_eq!(results[0].operation_id, "GET /apps");
    }

    #[test]
    fn blank_query_returns_nothing() {
        let index = SearchIndex::build(&sample_catalog(), None);
        assert!(index.search("   ", None, &[]).is_empty());
        assert!(index.search("", None, &[]).is_empty());
    }

    #[test]
    fn method_token_boost_applies() {
        let index = SearchIndex::build(&sample_catalog(), None);
        let results = index.search("post apps", None, &[]);
        assert_eq!(results[0].operation_id, "POST /apps");
    }

    #[test]
    fn resource_filter_restricts_results() {
        let index = SearchIndex::build(&sample_catalog(), None);
        let results = index.search("list", None, &["release".to_string()]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].operation_id, "GET /apps/{id}/releases");
    }

    #[test]
    fn limit_is_clamped() {
        let index = SearchIndex::build(&sample_catalog(), None);
        assert_eq!(index.search("list apps releases create", Some(0), &[]).len(), 1);
        let all = index.search("apps", Some(100), &[]);
        assert!(all.len() <= MAX_LIMIT);
    }

    #[test]
    fn docs_context_overlap_adds_quarter_point() {
        let with_docs = SearchIndex::build(&sample_catalog(), Some("managing apps on heroku"));
        let without = SearchIndex::build(&sample_catalog(), None);
        let boosted = with_docs.search("apps", Some(1), &[])[0].score;
        let plain = without.search("apps", Some(1), &[])[0].score;
        assert!((boosted - plain - 0.25).abs() < 1e-9);
    }

    #[test]
    fn scores_are_rounded_to_four_digits() {
        let index = SearchIndex::build(&sample_catalog(), None);
        for result in index.search("list existing apps", None, &[]) {
            let scaled = result.score * 10_000.0;
            assert!((scaled - scaled.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn summary_falls_back_through_description_title_id() {
        let ops = vec![op("GET", "/plain", None, None, None)];
        let index = SearchIndex::build(&ops, None);
        let results = index.search("plain", None, &[]);
        assert_eq!(results[0].summary, "GET /plain");
    }
}
