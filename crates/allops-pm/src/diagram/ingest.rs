// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Diagram ingestion through the workflow webhook.
//!
//! An uploaded PNG is posted to the active webhook. The workflow stores the
//! file and records a share link on its own, so after dispatch the
//! ingestor polls the latest link until it changes. If polling times out
//! and the webhook response carried a shareable URL, that URL is recorded
//! instead.
//!
//! Every await point after validation observes the caller's
//! [`CancellationToken`]; a cancelled ingestion writes nothing further.

use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::has_changed;
use super::proxy::USER_AGENT;
use crate::config::DiagramConfig;
use crate::error::{Error, Result};
use crate::persistence::{PROJECT_LINK_TYPE, Persistence, ShareLink};
use crate::webhook::{WebhookConfigResolver, WebhookMode};

const PNG_MIME: &str = "image/png";

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:(?P<mime>[^;,]+);base64,(?P<data>.+)$").expect("data url pattern is valid")
});

static HTTP_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("http url pattern is valid"));

static CODE_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("code filter pattern is valid"));

/// The diagram carried by an upload request.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagramPayload {
    /// A binary file upload.
    File {
        bytes: Bytes,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    /// An inline `data:<mime>;base64,<data>` URL.
    DataUrl(String),
    /// A URL hosted elsewhere, recorded as-is.
    ExternalUrl(String),
}

impl DiagramPayload {
    /// Build the payload from the optional request parts.
    ///
    /// Exactly one part must be present; blank strings count as absent.
    pub fn from_parts(
        file: Option<(Bytes, Option<String>, Option<String>)>,
        image_data: Option<String>,
        external_url: Option<String>,
    ) -> Result<Self> {
        let image_data = image_data.filter(|s| !s.trim().is_empty());
        let external_url = external_url.filter(|s| !s.trim().is_empty());

        match (file, image_data, external_url) {
            (Some((bytes, file_name, content_type)), None, None) => Ok(Self::File {
                bytes,
                file_name,
                content_type,
            }),
            (None, Some(data), None) => Ok(Self::DataUrl(data)),
            (None, None, Some(url)) => Ok(Self::ExternalUrl(url)),
            (None, None, None) => Err(Error::InvalidInput("Missing diagram payload".to_string())),
            _ => Err(Error::InvalidInput(
                "Provide exactly one of diagram, imageData or externalUrl".to_string(),
            )),
        }
    }
}

/// Where the recorded share link came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    /// Produced by the workflow, either observed by polling or taken from
    /// the webhook response.
    Workflow,
    /// Supplied directly by the operator.
    External,
}

/// Result of an ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    #[serde(flatten)]
    pub link: ShareLink,
    pub file_name: Option<String>,
    pub source: IngestSource,
    pub mode: Option<WebhookMode>,
}

/// Result of a webhook health probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookHealth {
    pub status: &'static str,
    pub mode: WebhookMode,
    pub url: String,
    pub upstream_status: u16,
    pub checked_at: DateTime<Utc>,
}

/// A validated PNG upload.
#[derive(Debug, Clone)]
struct PngUpload {
    bytes: Bytes,
}

/// Sends diagrams to the workflow and records the resulting share links.
#[derive(Clone)]
pub struct DiagramIngestor {
    persistence: Arc<dyn Persistence>,
    webhooks: WebhookConfigResolver,
    client: reqwest::Client,
    config: DiagramConfig,
}

impl DiagramIngestor {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        webhooks: WebhookConfigResolver,
        config: DiagramConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            persistence,
            webhooks,
            client,
            config,
        })
    }

    /// Ingest a diagram for `owner_id`.
    pub async fn ingest(
        &self,
        owner_id: i64,
        payload: DiagramPayload,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        match payload {
            DiagramPayload::ExternalUrl(url) => self.record_external(owner_id, &url).await,
            DiagramPayload::DataUrl(raw) => {
                let (bytes, mime) = parse_data_url(&raw)?;
                let file_name = format!("diagram.{}", extension_for(&mime));
                let upload = self.validate_upload(bytes, Some(&mime), Some(&file_name))?;
                self.dispatch_and_reconcile(owner_id, upload, cancel).await
            }
            DiagramPayload::File {
                bytes,
                file_name,
                content_type,
            } => {
                let upload =
                    self.validate_upload(bytes, content_type.as_deref(), file_name.as_deref())?;
                self.dispatch_and_reconcile(owner_id, upload, cancel).await
            }
        }
    }

    fn validate_upload(
        &self,
        bytes: Bytes,
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<PngUpload> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Diagram file is empty".to_string()));
        }
        if !is_png(content_type, file_name) {
            return Err(Error::InvalidInput(
                "Diagram file must be a PNG image".to_string(),
            ));
        }
        if bytes.len() > self.config.max_file_bytes {
            let limit_mb = self.config.max_file_bytes as f64 / (1024.0 * 1024.0);
            return Err(Error::InvalidInput(format!(
                "File size exceeds {:.1} MB limit",
                limit_mb
            )));
        }
        Ok(PngUpload { bytes })
    }

    async fn record_external(&self, owner_id: i64, raw_url: &str) -> Result<IngestOutcome> {
        let url = raw_url.trim();
        if !HTTP_URL.is_match(url) {
            return Err(Error::InvalidInput(
                "externalUrl must start with http or https".to_string(),
            ));
        }
        self.customer_code(owner_id).await?;

        let link = self
            .persistence
            .insert_share_link(owner_id, url, PROJECT_LINK_TYPE)
            .await?;
        info!(owner_id, link_id = link.id, "External diagram link recorded");

        Ok(IngestOutcome {
            link,
            file_name: None,
            source: IngestSource::External,
            mode: None,
        })
    }

    async fn dispatch_and_reconcile(
        &self,
        owner_id: i64,
        upload: PngUpload,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let cust_code = self.customer_code(owner_id).await?;

        let webhook = self.webhooks.resolve().await;
        let Some(active_url) = webhook.active_url.clone() else {
            return Err(Error::Misconfigured(
                "Workflow webhook URL is not configured".to_string(),
            ));
        };

        let baseline = self.persistence.latest_share_link(owner_id).await?;
        let file_name = diagram_file_name(&cust_code, Local::now());

        info!(
            owner_id,
            url = %active_url,
            mode = webhook.mode.as_str(),
            file_name = %file_name,
            size = upload.bytes.len(),
            "Sending diagram to workflow webhook"
        );
        let response = self
            .dispatch(&active_url, owner_id, &file_name, upload, cancel)
            .await?;

        let shareable_url = extract_shareable_url(&response);
        if shareable_url.is_none() {
            warn!(owner_id, "Webhook response has no shareable URL, waiting for the workflow");
        }

        let outcome = |link: ShareLink| IngestOutcome {
            link,
            file_name: Some(file_name.clone()),
            source: IngestSource::Workflow,
            mode: Some(webhook.mode),
        };

        if let Some(link) = self
            .wait_for_new_link(owner_id, baseline.as_ref(), cancel)
            .await?
        {
            info!(owner_id, link_id = link.id, "Workflow recorded diagram link");
            return Ok(outcome(link));
        }

        match shareable_url {
            Some(url) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let link = self
                    .persistence
                    .insert_share_link(owner_id, &url, PROJECT_LINK_TYPE)
                    .await?;
                info!(
                    owner_id,
                    link_id = link.id,
                    "Recorded shareable URL from webhook response"
                );
                Ok(outcome(link))
            }
            None => Err(Error::UpstreamTimeout(
                "Workflow did not return a shareable URL before timing out".to_string(),
            )),
        }
    }

    /// Customer code used in file names. Fails when the customer is unknown.
    async fn customer_code(&self, owner_id: i64) -> Result<String> {
        let customer = self
            .persistence
            .get_customer(owner_id)
            .await?
            .ok_or_else(|| Error::NotFound("Customer not found".to_string()))?;
        Ok(sanitize_customer_code(
            customer.cust_code.as_deref(),
            owner_id,
        ))
    }

    async fn dispatch(
        &self,
        url: &str,
        owner_id: i64,
        file_name: &str,
        upload: PngUpload,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let part = Part::bytes(upload.bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(PNG_MIME)
            .map_err(|e| Error::Internal(format!("Invalid multipart mime type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("status", "Active")
            .text("doctype", PROJECT_LINK_TYPE)
            .text("owner_id", owner_id.to_string())
            .text("extension", "png");

        let request = self
            .client
            .post(url)
            .timeout(self.config.dispatch_timeout)
            .multipart(form)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response.map_err(|e| {
                warn!(owner_id, url = %url, error = %e, "Error calling workflow webhook");
                Error::upstream(
                    "Failed to upload diagram through workflow",
                    Some(Value::String(e.to_string())),
                )
            })?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.text() => body.unwrap_or_default(),
        };
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            warn!(
                owner_id,
                url = %url,
                status = status.as_u16(),
                "Workflow webhook rejected the diagram"
            );
            let detail = parsed.unwrap_or_else(|| {
                if body.trim().is_empty() {
                    Value::String(format!("Request failed with status code {}", status.as_u16()))
                } else {
                    Value::String(body)
                }
            });
            return Err(Error::upstream(
                "Failed to upload diagram through workflow",
                Some(detail),
            ));
        }

        debug!(owner_id, status = status.as_u16(), "Workflow webhook accepted the diagram");
        Ok(parsed.unwrap_or(Value::Null))
    }

    /// Poll the latest share link until it differs from `baseline` or the
    /// poll window closes.
    async fn wait_for_new_link(
        &self,
        owner_id: i64,
        baseline: Option<&ShareLink>,
        cancel: &CancellationToken,
    ) -> Result<Option<ShareLink>> {
        let deadline = Instant::now() + self.config.poll_timeout;
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            attempts += 1;
            let latest = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                latest = self.persistence.latest_share_link(owner_id) => latest?,
            };
            if has_changed(baseline, latest.as_ref(), self.config.poll_min_diff) {
                return Ok(latest);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        debug!(owner_id, attempts, "Share link did not change before poll timeout");
        Ok(None)
    }

    /// Probe the active webhook with `?health=1`.
    pub async fn check_webhook(&self) -> Result<WebhookHealth> {
        let config = self.webhooks.resolve().await;
        let url = config
            .active_url
            .ok_or_else(|| Error::Misconfigured("Webhook URL not configured".to_string()))?;

        let response = self
            .client
            .get(&url)
            .query(&[("health", "1")])
            .timeout(self.config.health_timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Diagram webhook health check failed");
                Error::upstream(
                    "Webhook health check failed",
                    Some(json!({ "message": e.to_string(), "upstreamStatus": null })),
                )
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(url = %url, status, "Diagram webhook health check failed");
            return Err(Error::upstream(
                "Webhook responded with unexpected status",
                Some(json!({ "upstreamStatus": status })),
            ));
        }

        Ok(WebhookHealth {
            status: "ok",
            mode: config.mode,
            url,
            upstream_status: status,
            checked_at: Utc::now(),
        })
    }
}

/// Decode a `data:<mime>;base64,<data>` URL into bytes and its mime type.
pub fn parse_data_url(raw: &str) -> Result<(Bytes, String)> {
    let invalid = || Error::InvalidInput("Invalid base64 image data".to_string());
    let caps = DATA_URL.captures(raw.trim()).ok_or_else(invalid)?;
    let mime = caps.name("mime").ok_or_else(invalid)?.as_str().trim().to_string();
    let data: String = caps
        .name("data")
        .ok_or_else(invalid)?
        .as_str()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(data).map_err(|_| invalid())?;
    Ok((Bytes::from(bytes), mime))
}

fn extension_for(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// A declared content type must be `image/png`; without one, the file name
/// must end in `.png`.
pub fn is_png(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    match content_type.map(str::trim).filter(|t| !t.is_empty()) {
        Some(declared) => declared.eq_ignore_ascii_case(PNG_MIME),
        None => file_name
            .map(|n| n.trim().to_ascii_lowercase().ends_with(".png"))
            .unwrap_or(false),
    }
}

/// Strip a customer code to `[A-Za-z0-9_-]` and upper-case it.
pub fn sanitize_customer_code(code: Option<&str>, cust_id: i64) -> String {
    let raw = match code.filter(|c| !c.is_empty()) {
        Some(code) => code.to_string(),
        None => format!("CUST{cust_id}"),
    };
    let cleaned = CODE_FILTER.replace_all(&raw, "").to_uppercase();
    if cleaned.is_empty() {
        "CUST".to_string()
    } else {
        cleaned
    }
}

/// `{CODE}_diagram_{YYYY_MM_DD_HH_MM_SS}.png`
pub fn diagram_file_name(cust_code: &str, at: DateTime<Local>) -> String {
    format!("{}_diagram_{}.png", cust_code, at.format("%Y_%m_%d_%H_%M_%S"))
}

/// First string among `publicUrl`, `url` and `data.publicUrl`.
pub fn extract_shareable_url(response: &Value) -> Option<String> {
    [
        response.get("publicUrl"),
        response.get("url"),
        response.get("data").and_then(|d| d.get("publicUrl")),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str())
    .map(str::to_string)
}
