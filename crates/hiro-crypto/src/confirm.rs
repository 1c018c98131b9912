//! Stateless write-confirmation tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::canonical::stable_stringify;

type HmacSha256 = Hmac<Sha256>;

/// Tokens are clamped to this many base64url characters.
pub const CONFIRM_TOKEN_CHARS: usize = 48;

/// Derive the confirmation token binding a mutating request's shape to the
/// server secret.
///
/// The payload is `user_id|operation_id|path|query|body` with each JSON
/// component in canonical form, so equivalent requests yield equal tokens
/// regardless of object key ordering at the source. Absent components must be
/// passed as [`Value::Null`].
pub fn confirmation_token(
    secret: &str,
    user_id: &str,
    operation_id: &str,
    path_params: &Value,
    query_params: &Value,
    body: &Value,
) -> String {
    let payload = format!(
        "{user_id}|{operation_id}|{}|{}|{}",
        stable_stringify(path_params),
        stable_stringify(query_params),
        stable_stringify(body),
    );
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes();
    URL_SAFE_NO_PAD
        .encode(digest)
        .chars()
        .take(CONFIRM_TOKEN_CHARS)
        .collect()
}
