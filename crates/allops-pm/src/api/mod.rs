// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/health` | liveness and database check |
//! | GET | `/api/customers/{id}/diagram` | current share link or `null` |
//! | GET | `/api/customers/{id}/diagram/image` | proxied diagram bytes |
//! | POST | `/api/customers/{id}/diagram` | upload or link a diagram |
//! | GET | `/api/customers/diagram-webhook/health` | probe the active webhook |
//! | GET/PUT | `/api/settings/webhook` | webhook configuration |
//! | POST | `/api/pm/import/{family}` | import monitoring snapshots |
//! | GET | `/api/pm/{pm_id}/snapshots/{family}` | stored snapshots |

pub mod diagram;
pub mod import;
pub mod settings;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::Error;
use crate::state::AppState;

/// JSON body extractor whose rejection is an [`Error::InvalidInput`].
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidInput(rejection.body_text())
    }
}

/// Parse a positive integer path id.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, Error> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid {what}")))
}

/// Build the complete API router.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.upload_limit;

    Router::new()
        .route("/health", get(health))
        .nest("/api/customers", diagram::routes(upload_limit))
        .nest("/api/settings", settings::routes())
        .nest("/api/pm", import::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.persistence.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
            }),
        ),
        result => {
            if let Err(e) = result {
                warn!(error = %e, "Database health check failed");
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "unavailable",
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12", "customer id").unwrap(), 12);
        assert!(matches!(parse_id("0", "customer id"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse_id("abc", "customer id"), Err(Error::InvalidInput(ref m)) if m == "Invalid customer id"));
    }
}
