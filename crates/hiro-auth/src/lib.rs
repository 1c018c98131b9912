#![forbid(unsafe_code)]

//! **hiro-auth** – Per-user credential handling for the hiro gateway.
//!
//! [`TokenStore`] persists one OAuth [`TokenRecord`](hiro_types::TokenRecord)
//! per caller in a single JSON file, each record sealed in an AES-256-GCM
//! envelope. [`OAuthService`] drives the authorization-code and refresh-token
//! flows against the upstream identity provider and vends access tokens with
//! proactive, expiry-aware refresh.
//!
//! The store is single-owner within the process; cross-process writers are
//! explicitly out of contract.

pub mod oauth;
pub mod store;

pub use oauth::OAuthService;
pub use store::TokenStore;
