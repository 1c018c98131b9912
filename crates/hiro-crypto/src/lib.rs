#![forbid(unsafe_code)]

//! **hiro-crypto** – Crypto primitives for the hiro gateway.
//!
//! Three small, independent pieces:
//!
//! * [`aead`] – AES-256-GCM envelopes for the encrypted-at-rest token store.
//! * [`canonical`] – a deterministic JSON serializer used to derive stable
//!   HMAC payloads from request shapes.
//! * [`confirm`] – HMAC-SHA256 confirmation tokens gating mutating calls.
//!
//! The confirmation token is stateless: the server never remembers issued
//! tokens, a round-tripped token is validated by recomputation.

pub mod aead;
pub mod canonical;
pub mod confirm;

pub use aead::{decrypt, encrypt, EncryptedEnvelope, EncryptionKey};
pub use canonical::stable_stringify;
pub use confirm::confirmation_token;
