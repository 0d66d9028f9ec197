// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the AllOps PM server.

use std::net::SocketAddr;
use std::time::Duration;

use crate::webhook::{WebhookDefaults, WebhookMode};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum pool size.
    pub database_max_connections: u32,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Diagram upload, polling and proxy settings.
    pub diagram: DiagramConfig,
    /// Compiled/process defaults for the workflow webhook, overlaid by
    /// persisted settings at read time.
    pub webhook_defaults: WebhookDefaults,
}

/// Tunables for diagram ingestion and proxying.
#[derive(Debug, Clone)]
pub struct DiagramConfig {
    /// Largest accepted diagram upload in bytes.
    pub max_file_bytes: usize,
    /// Total time to wait for the workflow to record a new share link.
    pub poll_timeout: Duration,
    /// Pause between two share-link reads while polling.
    pub poll_interval: Duration,
    /// A newer row only counts as a change when its timestamp is ahead of the
    /// baseline by more than this.
    pub poll_min_diff: Duration,
    /// Per-candidate timeout when proxying diagram bytes.
    pub proxy_timeout: Duration,
    /// Timeout of the multipart dispatch to the workflow webhook.
    pub dispatch_timeout: Duration,
    /// Timeout of the webhook health probe.
    pub health_timeout: Duration,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 5 * 1024 * 1024,
            poll_timeout: Duration::from_millis(20_000),
            poll_interval: Duration::from_millis(1_500),
            poll_min_diff: Duration::from_millis(250),
            proxy_timeout: Duration::from_millis(15_000),
            dispatch_timeout: Duration::from_millis(30_000),
            health_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("ALLOPS_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar(
                "ALLOPS_DATABASE_URL or DATABASE_URL",
            ))?;

        let database_max_connections =
            parse_number(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;

        let port: u16 = lookup("PORT")
            .unwrap_or_else(|| "5000".to_string())
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let max_file_mb: f64 = parse_number(&lookup, "DIAGRAM_MAX_FILE_MB", 5.0)?;
        if !max_file_mb.is_finite() || max_file_mb <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "DIAGRAM_MAX_FILE_MB",
                value: max_file_mb.to_string(),
            });
        }

        let dispatch_ms = parse_number(&lookup, "N8N_TIMEOUT_MS", 30_000u64)?;
        // The health probe inherits the dispatch timeout when only that one is set.
        let health_default = if lookup("N8N_TIMEOUT_MS").is_some() {
            dispatch_ms
        } else {
            10_000
        };

        let diagram = DiagramConfig {
            max_file_bytes: (max_file_mb * 1024.0 * 1024.0) as usize,
            poll_timeout: millis(&lookup, "DIAGRAM_POLL_TIMEOUT_MS", 20_000)?,
            poll_interval: millis(&lookup, "DIAGRAM_POLL_INTERVAL_MS", 1_500)?,
            poll_min_diff: millis(&lookup, "DIAGRAM_POLL_MIN_DIFF_MS", 250)?,
            proxy_timeout: millis(&lookup, "DIAGRAM_PROXY_TIMEOUT_MS", 15_000)?,
            dispatch_timeout: Duration::from_millis(dispatch_ms),
            health_timeout: millis(&lookup, "N8N_HEALTH_TIMEOUT_MS", health_default)?,
        };

        let mode = match lookup("N8N_WEBHOOK_MODE").as_deref().map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("TEST") => WebhookMode::Test,
            _ => WebhookMode::Prd,
        };
        let webhook_defaults = WebhookDefaults {
            mode,
            test_url: non_blank(lookup("N8N_WEBHOOK_TEST_URL")),
            prd_url: non_blank(lookup("N8N_WEBHOOK_PRD_URL")),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            http_addr,
            diagram,
            webhook_defaults,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

fn millis<F>(lookup: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_number(lookup, name, default).map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric variable could not be parsed.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },
}
