// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Diagram image proxy.
//!
//! Serves the bytes behind a customer's current share link. Candidate URLs
//! are tried strictly in order; the first 2xx response with a non-empty body
//! wins.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::redirect::Policy;
use tracing::{debug, info, warn};

use crate::config::DiagramConfig;
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::url_candidates::candidate_urls;

const ACCEPT_IMAGES: &str = "image/png,image/*;q=0.9,*/*;q=0.8";
const DEFAULT_CONTENT_TYPE: &str = "image/png";
const DEFAULT_CACHE_CONTROL: &str = "private, max-age=60";
const MAX_REDIRECTS: usize = 5;

pub(crate) const USER_AGENT: &str = concat!("allops-pm/", env!("CARGO_PKG_VERSION"));

/// Image bytes and the upstream caching headers.
#[derive(Debug, Clone)]
pub struct ProxiedImage {
    pub content_type: String,
    pub cache_control: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Bytes,
    /// Candidate that served the bytes.
    pub source_url: String,
}

impl IntoResponse for ProxiedImage {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        let mut put = |name: header::HeaderName, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        };
        put(header::CONTENT_TYPE, &self.content_type);
        put(header::CACHE_CONTROL, &self.cache_control);
        if let Some(etag) = &self.etag {
            put(header::ETAG, etag);
        }
        if let Some(last_modified) = &self.last_modified {
            put(header::LAST_MODIFIED, last_modified);
        }
        put(header::CONTENT_LENGTH, &self.body.len().to_string());

        (headers, self.body).into_response()
    }
}

/// Fetches diagram bytes for a customer.
#[derive(Clone)]
pub struct DiagramProxy {
    persistence: Arc<dyn Persistence>,
    client: reqwest::Client,
}

impl DiagramProxy {
    pub fn new(persistence: Arc<dyn Persistence>, config: &DiagramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.proxy_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            persistence,
            client,
        })
    }

    /// Fetch the image behind the customer's current share link.
    pub async fn fetch(&self, owner_id: i64) -> Result<ProxiedImage> {
        let link = self
            .persistence
            .latest_share_link(owner_id)
            .await?
            .filter(|l| !l.url.trim().is_empty())
            .ok_or_else(|| Error::NotFound("Diagram link not found".to_string()))?;

        let candidates = candidate_urls(Some(&link.url));
        if candidates.is_empty() {
            return Err(Error::NotFound("Diagram link not found".to_string()));
        }
        debug!(owner_id, link_id = link.id, candidates = candidates.len(), "Proxying diagram");

        self.fetch_candidates(owner_id, &candidates).await
    }

    /// Try each candidate in order and return the first image.
    pub async fn fetch_candidates(
        &self,
        owner_id: i64,
        candidates: &[String],
    ) -> Result<ProxiedImage> {
        let mut last_failure = None;

        for candidate in candidates {
            match self.fetch_one(candidate).await {
                Ok(image) => {
                    info!(
                        owner_id,
                        candidate = %candidate,
                        bytes = image.body.len(),
                        "Diagram served from candidate"
                    );
                    return Ok(image);
                }
                Err(failure) => {
                    warn!(
                        owner_id,
                        candidate = %candidate,
                        status = ?failure.status,
                        message = %failure.message,
                        "Diagram candidate failed"
                    );
                    last_failure = Some(failure.message);
                }
            }
        }

        Err(Error::UpstreamUnavailable {
            message: "Unable to load the diagram image from the stored link".to_string(),
            detail: last_failure,
        })
    }

    async fn fetch_one(&self, url: &str) -> std::result::Result<ProxiedImage, CandidateFailure> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT_IMAGES)
            .send()
            .await
            .map_err(|e| CandidateFailure::new(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CandidateFailure::new(
                Some(status.as_u16()),
                format!("Request failed with status code {}", status.as_u16()),
            ));
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| CandidateFailure::new(Some(status.as_u16()), e.to_string()))?;
        if body.is_empty() {
            return Err(CandidateFailure::new(
                Some(status.as_u16()),
                "Empty payload from upstream diagram URL".to_string(),
            ));
        }

        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Ok(ProxiedImage {
            content_type: text(header::CONTENT_TYPE)
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            cache_control: text(header::CACHE_CONTROL)
                .unwrap_or_else(|| DEFAULT_CACHE_CONTROL.to_string()),
            etag: text(header::ETAG),
            last_modified: text(header::LAST_MODIFIED),
            body,
            source_url: url.to_string(),
        })
    }
}

#[derive(Debug)]
struct CandidateFailure {
    status: Option<u16>,
    message: String,
}

impl CandidateFailure {
    fn new(status: Option<u16>, message: String) -> Self {
        Self { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use chrono::Utc;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

    fn proxy(store: Arc<MemoryPersistence>) -> DiagramProxy {
        DiagramProxy::new(store, &DiagramConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_falls_through_to_first_working_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/diagram.png"))
            .and(header_exists("accept"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(PNG, "image/png")
                    .insert_header("etag", "\"v1\""),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/never"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(PNG, "image/png"))
            .expect(0)
            .mount(&server)
            .await;

        let candidates: Vec<String> = ["/missing", "/empty", "/diagram.png", "/never"]
            .iter()
            .map(|p| format!("{}{}", server.uri(), p))
            .collect();

        let image = proxy(Arc::new(MemoryPersistence::new()))
            .fetch_candidates(1, &candidates)
            .await
            .unwrap();

        assert_eq!(image.body.as_ref(), PNG);
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.cache_control, DEFAULT_CACHE_CONTROL);
        assert_eq!(image.etag.as_deref(), Some("\"v1\""));
        assert!(image.source_url.ends_with("/diagram.png"));
    }

    #[tokio::test]
    async fn test_all_candidates_failing_reports_last_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let candidates = vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())];
        let err = proxy(Arc::new(MemoryPersistence::new()))
            .fetch_candidates(1, &candidates)
            .await
            .unwrap_err();

        match err {
            Error::UpstreamUnavailable { detail, .. } => {
                assert_eq!(detail.as_deref(), Some("Request failed with status code 403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_uses_latest_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/new.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(PNG, "image/png")
                    .insert_header("cache-control", "public, max-age=600"),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryPersistence::new());
        let t0 = Utc::now();
        store
            .push_share_link(4, &format!("{}/old.png", server.uri()), "project", t0)
            .await;
        store
            .push_share_link(
                4,
                &format!("{}/new.png", server.uri()),
                "project",
                t0 + chrono::Duration::seconds(1),
            )
            .await;

        let image = proxy(store).fetch(4).await.unwrap();
        assert_eq!(image.cache_control, "public, max-age=600");
    }

    #[tokio::test]
    async fn test_missing_link_is_not_found() {
        let store = Arc::new(MemoryPersistence::new());
        store.push_share_link(9, "   ", "project", Utc::now()).await;

        assert!(matches!(proxy(store.clone()).fetch(9).await, Err(Error::NotFound(_))));
        assert!(matches!(proxy(store).fetch(10).await, Err(Error::NotFound(_))));
    }
}
