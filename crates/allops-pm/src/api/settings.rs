// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook settings routes.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use super::JsonBody;
use crate::error::Result;
use crate::state::AppState;
use crate::webhook::{WebhookConfig, WebhookConfigUpdate};

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", get(get_webhook).put(update_webhook))
}

async fn get_webhook(State(state): State<AppState>) -> Json<WebhookConfig> {
    Json(state.webhooks.resolve().await)
}

async fn update_webhook(
    State(state): State<AppState>,
    JsonBody(update): JsonBody<WebhookConfigUpdate>,
) -> Result<Json<WebhookConfig>> {
    Ok(Json(state.webhooks.update(update).await?))
}
