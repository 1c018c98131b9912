//! Capability seams between the executor and its collaborators.
//!
//! The executor needs exactly four operations: resolve an operation by id,
//! read the root schema, vend an access token and send an HTTP request. The
//! first three live here as traits over the real services; the fourth is
//! [`HttpTransport`](crate::transport::HttpTransport). Tests construct the
//! executor with in-memory stand-ins.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use hiro_auth::OAuthService;
use hiro_schema::SchemaService;
use hiro_types::Operation;

/// Read access to the published catalog.
#[async_trait]
pub trait OperationSource: Send + Sync {
    /// Look up one operation by its stable identifier.
    async fn resolve(&self, operation_id: &str) -> Option<Arc<Operation>>;
    /// The upstream root schema, supplying `definitions` to body validators.
    async fn root_schema(&self) -> Option<Arc<Value>>;
}

/// Vends upstream credentials for a caller.
#[async_trait]
pub trait CredentialVendor: Send + Sync {
    /// `Ok(None)` means the caller has no usable credentials.
    async fn access_token(&self, user_id: &str) -> Result<Option<String>>;
}

#[async_trait]
impl OperationSource for SchemaService {
    async fn resolve(&self, operation_id: &str) -> Option<Arc<Operation>> {
        SchemaService::resolve(self, operation_id).await
    }

    async fn root_schema(&self) -> Option<Arc<Value>> {
        SchemaService::root_schema(self).await
    }
}

#[async_trait]
impl CredentialVendor for OAuthService {
    async fn access_token(&self, user_id: &str) -> Result<Option<String>> {
        OAuthService::access_token(self, user_id).await
    }
}
