//! Per-user OAuth token record, persisted encrypted at rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// The OAuth credentials held for one caller.
///
/// Created at the OAuth callback or on refresh, updated in place by the
/// refresh-token grant and deleted on explicit logout. Absolute times are
/// RFC 3339 so the record survives round-trips through the encrypted store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes, split from the token endpoint's space- or
    /// comma-separated `scope` field.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Absolute expiry derived from `expires_in`; absent means the upstream
    /// never expires the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub obtained_at: DateTime<Utc>,
}
