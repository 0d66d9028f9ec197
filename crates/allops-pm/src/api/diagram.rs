// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Customer diagram routes.

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{JsonBody, parse_id};
use crate::diagram::{DiagramPayload, IngestOutcome, ProxiedImage, WebhookHealth};
use crate::error::{Error, Result};
use crate::persistence::ShareLink;
use crate::state::AppState;

/// JSON upload body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramUploadBody {
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
}

pub fn routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/diagram-webhook/health", get(webhook_health))
        .route(
            "/{id}/diagram",
            get(latest_diagram)
                .post(upload_diagram)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/{id}/diagram/image", get(diagram_image))
}

async fn latest_diagram(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<ShareLink>>> {
    let owner_id = parse_id(&id, "customer id")?;
    Ok(Json(state.persistence.latest_share_link(owner_id).await?))
}

async fn diagram_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ProxiedImage> {
    let owner_id = parse_id(&id, "customer id")?;
    state.proxy.fetch(owner_id).await
}

async fn webhook_health(State(state): State<AppState>) -> Result<Json<WebhookHealth>> {
    Ok(Json(state.ingestor.check_webhook().await?))
}

/// Accepts a multipart upload (`diagram`, `imageData` or `externalUrl`
/// fields) or a JSON body with `imageData` or `externalUrl`.
async fn upload_diagram(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<(StatusCode, Json<IngestOutcome>)> {
    let owner_id = parse_id(&id, "customer id")?;

    let payload = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| Error::InvalidInput(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let JsonBody(body) = JsonBody::<DiagramUploadBody>::from_request(request, &state).await?;
        DiagramPayload::from_parts(None, body.image_data, body.external_url)?
    };

    // Dropping the handler (client gone) cancels the ingestion task.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let ingestor = state.ingestor.clone();
    let task = tokio::spawn(async move { ingestor.ingest(owner_id, payload, &cancel).await });
    let outcome = task
        .await
        .map_err(|e| Error::Internal(format!("Diagram ingestion task failed: {}", e)))??;

    info!(
        owner_id,
        link_id = outcome.link.id,
        source = ?outcome.source,
        "Diagram ingested"
    );
    Ok((StatusCode::CREATED, Json(outcome)))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
}

async fn read_multipart(mut multipart: Multipart) -> Result<DiagramPayload> {
    let mut file: Option<(Bytes, Option<String>, Option<String>)> = None;
    let mut image_data = None;
    let mut external_url = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "diagram" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidInput(e.body_text()))?;
                file = Some((bytes, file_name, content_type));
            }
            "imageData" => {
                image_data = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::InvalidInput(e.body_text()))?,
                );
            }
            "externalUrl" => {
                external_url = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::InvalidInput(e.body_text()))?,
                );
            }
            _ => {}
        }
    }

    DiagramPayload::from_parts(file, image_data, external_url)
}
