// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the AllOps PM server.
//!
//! Every fallible operation returns [`Error`]. The HTTP layer renders it as
//! `{"error": "...", "detail": ...}` with the status from
//! [`Error::status_code`]; database and serialization failures only ever
//! surface a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or missing request data.
    #[error("{0}")]
    InvalidInput(String),

    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Payload identity does not match the canonical records.
    #[error("{0}")]
    Mismatch(String),

    /// A required external target is not configured.
    #[error("{0}")]
    Misconfigured(String),

    /// The external workflow call failed.
    #[error("{message}")]
    Upstream {
        /// Short description.
        message: String,
        /// Upstream response body or transport error, when available.
        detail: Option<Value>,
    },

    /// Polling ran out of time and no fallback URL was available.
    #[error("{0}")]
    UpstreamTimeout(String),

    /// Every diagram candidate URL failed.
    #[error("{message}")]
    UpstreamUnavailable {
        /// Short description.
        message: String,
        /// Failure of the last attempted candidate.
        detail: Option<String>,
    },

    /// The originating request was aborted.
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other internal error.
    #[error("{0}")]
    Internal(String),
}

/// Result type using the server [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Status used for requests the client abandoned.
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl Error {
    /// Create an upstream (dispatch) error.
    pub fn upstream(message: impl Into<String>, detail: Option<Value>) -> Self {
        Self::Upstream {
            message: message.into(),
            detail,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Mismatch(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Misconfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { .. } | Self::UpstreamTimeout(_) | Self::UpstreamUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Config(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Mismatch(_) => "MISMATCH",
            Self::Misconfigured(_) => "MISCONFIGURED",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::Config(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Extra context (upstream body, last failure) when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_internal() {
            tracing::error!(error = %self, status = %status, "Internal error");
        } else {
            tracing::warn!(
                error_kind = self.kind(),
                error_message = %self,
                status = %status,
                "API error"
            );
        }

        let body = match self {
            Error::Upstream { message, detail } => ErrorResponse {
                error: message,
                detail,
            },
            Error::UpstreamUnavailable { message, detail } => ErrorResponse {
                error: message,
                detail: Some(detail.map(Value::String).unwrap_or(Value::Null)),
            },
            other if other.is_internal() => ErrorResponse {
                error: "Internal server error".to_string(),
                detail: None,
            },
            other => ErrorResponse {
                error: other.to_string(),
                detail: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
