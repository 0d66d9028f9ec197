// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snapshot import routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use super::{JsonBody, parse_id};
use crate::error::{Error, Result};
use crate::persistence::{SnapshotFamily, StoredSnapshot};
use crate::snapshot::{ImportOutcome, ImportRequest};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/import/{family}", post(import_snapshots))
        .route("/{pm_id}/snapshots/{family}", get(list_snapshots))
}

fn family(slug: &str) -> Result<SnapshotFamily> {
    SnapshotFamily::from_slug(slug)
        .ok_or_else(|| Error::NotFound(format!("Unknown snapshot family: {slug}")))
}

async fn import_snapshots(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    JsonBody(request): JsonBody<ImportRequest>,
) -> Result<Json<ImportOutcome>> {
    let family = family(&slug)?;
    Ok(Json(state.imports.import(family, request).await?))
}

async fn list_snapshots(
    State(state): State<AppState>,
    Path((pm_id, slug)): Path<(String, String)>,
) -> Result<Json<Vec<StoredSnapshot>>> {
    let pm_id = parse_id(&pm_id, "pm_id")?;
    let family = family(&slug)?;
    Ok(Json(state.imports.list(family, pm_id).await?))
}
