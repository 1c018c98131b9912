//! Environment-driven configuration with secure secret handling.
//!
//! Every recognized option has a defaulted environment variable; secrets are
//! wrapped in [`secrecy::Secret`] so they never land in logs or debug output.
//! Unparseable numeric and boolean values warn and fall back to the default
//! rather than aborting startup.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use secrecy::Secret;
use tracing::warn;

/// Default upstream endpoints for the Heroku Platform API.
pub const DEFAULT_SCHEMA_URL: &str = "https://api.heroku.com/schema";
pub const DEFAULT_API_BASE_URL: &str = "https://api.heroku.com";
pub const DEFAULT_DOCS_URL: &str = "https://devcenter.heroku.com/articles/platform-api-reference";
pub const DEFAULT_ACCEPT_HEADER: &str = "application/vnd.heroku+json; version=3";

const DEFAULT_SCHEMA_REFRESH_INTERVAL_MS: u64 = 3_600_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_READ_CACHE_TTL_MS: u64 = 30_000;
const DEFAULT_EXECUTE_MAX_BODY_BYTES: usize = 51_200;
const DEFAULT_EXECUTE_BODY_PREVIEW_CHARS: usize = 500;
const DEFAULT_USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_CATALOG_CACHE_PATH: &str = ".hiro/catalog-cache.json";
const DEFAULT_TOKEN_STORE_PATH: &str = ".hiro/token-store.json";
const DEFAULT_OAUTH_AUTHORIZE_URL: &str = "https://id.heroku.com/oauth/authorize";
const DEFAULT_OAUTH_TOKEN_URL: &str = "https://id.heroku.com/oauth/token";
const DEFAULT_OAUTH_SCOPE: &str = "global";
const DEFAULT_OAUTH_REDIRECT_URI: &str = "http://localhost:8787/oauth/callback";

/// OAuth 2.0 client parameters.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
}

/// Process-wide configuration, constructed once at startup and passed
/// explicitly into every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream machine-readable schema endpoint.
    pub schema_url: String,
    /// Base URL rendered paths are joined onto.
    pub api_base_url: String,
    /// Human docs endpoint feeding the search side channel.
    pub docs_url: String,
    /// Accept header sent to the schema endpoint and the API.
    pub accept_header: String,
    /// Background refresh period for the schema service.
    pub schema_refresh_interval_ms: u64,
    /// On-disk catalog cache location.
    pub catalog_cache_path: PathBuf,
    /// Global kill switch for mutating upstream calls.
    pub allow_writes: bool,
    /// Per-attempt upstream deadline.
    pub request_timeout_ms: u64,
    /// Additional attempts beyond the first for idempotent calls.
    pub max_retries: u32,
    /// Read-cache entry lifetime; 0 disables the cache.
    pub read_cache_ttl_ms: u64,
    /// Serialized response bodies beyond this byte count are replaced with a
    /// truncation envelope.
    pub execute_max_body_bytes: usize,
    /// Character clamp applied to body previews.
    pub execute_body_preview_chars: usize,
    /// Transport header carrying the caller identity.
    pub user_id_header: String,
    /// HMAC key for confirmation tokens.
    pub write_confirmation_secret: Secret<String>,
    /// On-disk token store location.
    pub token_store_path: PathBuf,
    /// Base64-encoded 32-byte AEAD key for the token store.
    pub token_encryption_key: Secret<String>,
    pub oauth: OAuthConfig,
}

impl Config {
    /// Load the full configuration from the environment.
    ///
    /// Secrets (`WRITE_CONFIRMATION_SECRET`, `TOKEN_ENCRYPTION_KEY`,
    /// `OAUTH_CLIENT_ID`/`OAUTH_CLIENT_SECRET`) are required; everything else
    /// falls back to a documented default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            schema_url: env_string("HEROKU_SCHEMA_URL", DEFAULT_SCHEMA_URL),
            api_base_url: env_string("HEROKU_API_BASE_URL", DEFAULT_API_BASE_URL),
            docs_url: env_string("HEROKU_DOCS_URL", DEFAULT_DOCS_URL),
            accept_header: env_string("HEROKU_ACCEPT_HEADER", DEFAULT_ACCEPT_HEADER),
            schema_refresh_interval_ms: env_parsed(
                "SCHEMA_REFRESH_INTERVAL_MS",
                DEFAULT_SCHEMA_REFRESH_INTERVAL_MS,
            ),
            catalog_cache_path: PathBuf::from(env_string(
                "CATALOG_CACHE_PATH",
                DEFAULT_CATALOG_CACHE_PATH,
            )),
            allow_writes: env_bool("ALLOW_WRITES", false),
            request_timeout_ms: env_parsed("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            max_retries: env_parsed("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            read_cache_ttl_ms: env_parsed("READ_CACHE_TTL_MS", DEFAULT_READ_CACHE_TTL_MS),
            execute_max_body_bytes: env_parsed(
                "EXECUTE_MAX_BODY_BYTES",
                DEFAULT_EXECUTE_MAX_BODY_BYTES,
            ),
            execute_body_preview_chars: env_parsed(
                "EXECUTE_BODY_PREVIEW_CHARS",
                DEFAULT_EXECUTE_BODY_PREVIEW_CHARS,
            ),
            user_id_header: env_string("USER_ID_HEADER", DEFAULT_USER_ID_HEADER).to_lowercase(),
            write_confirmation_secret: env_secret("WRITE_CONFIRMATION_SECRET")?,
            token_store_path: PathBuf::from(env_string(
                "TOKEN_STORE_PATH",
                DEFAULT_TOKEN_STORE_PATH,
            )),
            token_encryption_key: env_secret("TOKEN_ENCRYPTION_KEY")?,
            oauth: OAuthConfig {
                client_id: env::var("OAUTH_CLIENT_ID")
                    .context("required environment variable OAUTH_CLIENT_ID not set")?,
                client_secret: env_secret("OAUTH_CLIENT_SECRET")?,
                scope: env_string("OAUTH_SCOPE", DEFAULT_OAUTH_SCOPE),
                authorize_url: env_string("OAUTH_AUTHORIZE_URL", DEFAULT_OAUTH_AUTHORIZE_URL),
                token_url: env_string("OAUTH_TOKEN_URL", DEFAULT_OAUTH_TOKEN_URL),
                redirect_uri: env_string("OAUTH_REDIRECT_URI", DEFAULT_OAUTH_REDIRECT_URI),
            },
        })
    }
}

fn env_string(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_secret(name: &str) -> Result<Secret<String>> {
    env::var(name)
        .map(Secret::new)
        .with_context(|| format!("required environment variable {name} not set"))
}

fn env_parsed<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => parse_or_default(name, &raw, default),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                warn!("ignoring unrecognized boolean value for {name}: {other:?}");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_or_default<T>(name: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(err) => {
            warn!("failed to parse {name}={raw:?}: {err}; using the default");
            default
        }
    }
}
