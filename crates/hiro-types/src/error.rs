//! Error taxonomy surfaced to tool callers.
//!
//! Every failure the executor or façade can report carries a machine-readable
//! code, a human message and an optional HTTP status hint. Validation and
//! policy errors are surfaced verbatim; transient upstream failures are
//! retried before they land here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of one tool call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The `operation_id` is not in the published catalog.
    #[error("unknown operation '{operation_id}'")]
    OperationNotFound {
        /// Identifier the caller asked for.
        operation_id: String,
    },

    /// Missing path parameter, bad query parameter type or body schema failure.
    #[error("{message}")]
    Validation {
        /// Concatenated validation failures.
        message: String,
    },

    /// The root schema is not loaded and a body validator is needed.
    #[error("upstream schema is not loaded; body validation is unavailable")]
    SchemaUnavailable,

    /// The global allow-writes flag is off.
    #[error("mutating operations are disabled by configuration")]
    WritesDisabled,

    /// Missing or non-matching confirmation token on a mutating call.
    #[error("write confirmation required: run with dry_run=true first and resubmit the issued confirm_write_token")]
    WriteConfirmationRequired,

    /// No vendable access token for the caller.
    #[error("no OAuth credentials for caller '{user_id}'; complete the authorization flow first")]
    AuthRequired {
        /// Caller the credential lookup failed for.
        user_id: String,
    },

    /// The upstream API answered with a non-2xx status.
    #[error("upstream API returned {status}: {preview}")]
    UpstreamApi {
        /// Status propagated from the upstream response.
        status: u16,
        /// Serialized body, clamped to the configured preview length.
        preview: String,
    },

    /// The per-attempt deadline elapsed and the request was aborted.
    #[error("upstream request timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// Network failure or unexpected retry exhaustion.
    #[error("upstream request failed: {reason}")]
    RequestFailed {
        /// Transport-level failure description.
        reason: String,
    },
}

impl GatewayError {
    /// Machine-readable code for the uniform error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperationNotFound { .. } => "OPERATION_NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::SchemaUnavailable => "SCHEMA_UNAVAILABLE",
            Self::WritesDisabled => "WRITES_DISABLED",
            Self::WriteConfirmationRequired => "WRITE_CONFIRMATION_REQUIRED",
            Self::AuthRequired { .. } => "AUTH_REQUIRED",
            Self::UpstreamApi { .. } => "HEROKU_API_ERROR",
            Self::Timeout { .. } => "REQUEST_TIMEOUT",
            Self::RequestFailed { .. } => "REQUEST_FAILED",
        }
    }

    /// HTTP status hint; upstream errors propagate the upstream status.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::OperationNotFound { .. } => Some(404),
            Self::Validation { .. } => Some(400),
            Self::SchemaUnavailable => Some(503),
            Self::WritesDisabled | Self::WriteConfirmationRequired => Some(403),
            Self::AuthRequired { .. } => Some(401),
            Self::UpstreamApi { status, .. } => Some(*status),
            Self::Timeout { .. } => Some(504),
            Self::RequestFailed { .. } => Some(502),
        }
    }

    /// Render into the uniform envelope returned by the tool façade.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            status: self.status(),
        }
    }
}

/// Uniform error shape returned to the MCP host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}
