#![forbid(unsafe_code)]

//! **hiro-gateway** – Execution pipeline and tool façade of the hiro gateway.
//!
//! The [`Executor`] runs the full contract for one `execute` call:
//! validation against the catalog and JSON Schema, the dry-run/confirmation
//! gate for mutating operations, credential vending, a per-user read-through
//! cache, idempotent retry with per-attempt timeouts, and response cleaning
//! (header scrubbing, body redaction, size bounding).
//!
//! The [`ToolFacade`] exposes the fixed three-tool surface on top of it and
//! maps every failure into the uniform `{code, message, status?}` envelope.
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hiro_auth::{OAuthService, TokenStore};
//! use hiro_gateway::{Executor, ReqwestTransport, ToolFacade};
//! use hiro_schema::SchemaService;
//! use hiro_types::Config;
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let config = Arc::new(Config::from_env()?);
//! let schema = SchemaService::bootstrap(Arc::clone(&config)).await?;
//! let store = Arc::new(TokenStore::from_config(&config)?);
//! let oauth = Arc::new(OAuthService::new(Arc::clone(&config), store)?);
//! let executor = Arc::new(Executor::new(
//!     Arc::clone(&config),
//!     schema.clone(),
//!     oauth.clone(),
//!     Arc::new(ReqwestTransport::new()?),
//! ));
//! let facade = ToolFacade::new(config, schema.clone(), oauth.clone(), executor);
//! let _refresh = schema.spawn_refresh_task();
//! let _state_gc = oauth.spawn_state_gc(std::time::Duration::from_secs(60));
//! # let _ = facade;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod executor;
pub mod facade;
pub mod read_cache;
pub mod redact;
pub mod transport;

pub use capabilities::{CredentialVendor, OperationSource};
pub use executor::Executor;
pub use facade::ToolFacade;
pub use transport::{HttpTransport, ReqwestTransport, TransportError, UpstreamRequest, UpstreamResponse};
