#![forbid(unsafe_code)]

//! **hiro-schema** – Upstream schema ingestion for the hiro gateway.
//!
//! Two halves:
//!
//! * [`normalize`] – the pure transform from the upstream hypermedia JSON
//!   Schema (Heroku-style `#/definitions/.../links[]` entries with
//!   URI-encoded pointer hrefs) into the canonical, deduplicated operation
//!   catalog.
//! * [`service`] – the [`SchemaService`] owning the authoritative catalog in
//!   memory: cold boot from an on-disk cache, single-flight conditional
//!   refresh against the schema and docs endpoints, atomic publication and
//!   persistence after meaningful change.

pub mod cache;
pub mod normalize;
pub mod service;

pub use cache::CatalogCacheFile;
pub use normalize::{normalize_root_schema, NormalizedSchema};
pub use service::SchemaService;
