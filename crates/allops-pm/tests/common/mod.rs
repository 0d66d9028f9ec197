// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for allops-pm integration tests.
//!
//! Provides a TestContext driving the router against in-memory persistence,
//! and a PostgreSQL pool helper gated on TEST_ALLOPS_DATABASE_URL.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use allops_pm::config::DiagramConfig;
use allops_pm::persistence::MemoryPersistence;
use allops_pm::webhook::WebhookDefaults;
use allops_pm::{AppState, api, migrations};

/// Router plus the store behind it.
pub struct TestContext {
    pub store: Arc<MemoryPersistence>,
    pub app: Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(fast_diagram_config(), WebhookDefaults::default())
    }

    pub fn with_config(diagram: DiagramConfig, webhook_defaults: WebhookDefaults) -> Self {
        let store = Arc::new(MemoryPersistence::new());
        let state = AppState::new(store.clone(), diagram, webhook_defaults)
            .expect("Failed to build app state");
        Self {
            store,
            app: api::router(state),
        }
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = self.send_raw(request).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Response body is not JSON")
        };
        (status, body)
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .body(Body::empty())
                .expect("Failed to build request"),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, &body)).await
    }

    pub async fn put_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("PUT", uri, &body)).await
    }
}

/// Poll settings short enough for tests.
pub fn fast_diagram_config() -> DiagramConfig {
    DiagramConfig {
        poll_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        ..DiagramConfig::default()
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

/// Build a `multipart/form-data` body from `(name, file_name, content_type, bytes)`.
pub fn multipart_request(
    uri: &str,
    parts: &[(&str, Option<&str>, Option<&str>, &[u8])],
) -> Request<Body> {
    const BOUNDARY: &str = "allops-test-boundary";
    let mut body = Vec::new();
    for (name, file_name, content_type, bytes) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{name}\"");
        if let Some(file_name) = file_name {
            disposition.push_str(&format!("; filename=\"{file_name}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("Failed to build request")
}

/// Connect to the test database and apply migrations.
pub async fn pg_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_ALLOPS_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    migrations::run(&pool).await.ok()?;
    Some(pool)
}

/// Skip test if database URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_ALLOPS_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_ALLOPS_DATABASE_URL not set");
            return;
        }
    };
}
