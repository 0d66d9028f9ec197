// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends.
//!
//! [`Persistence`] is the only way the services reach storage. Two backends
//! exist: [`PostgresPersistence`] for the real deployment and
//! [`MemoryPersistence`] for tests and local embedding.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Link type that marks a diagram share link.
pub const PROJECT_LINK_TYPE: &str = "project";

/// A share link row from `url_share`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ShareLink {
    /// Database primary key.
    pub id: i64,
    /// Customer the link belongs to.
    pub owner_id: i64,
    /// Shareable URL produced by the workflow or supplied by the operator.
    pub url: String,
    /// Link type, `project` for diagrams.
    #[serde(rename = "type")]
    pub link_type: String,
    /// When the row was recorded.
    pub created_at: DateTime<Utc>,
}

/// Customer identity.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CustomerRecord {
    pub cust_id: i64,
    pub cust_code: Option<String>,
}

/// A PM plan together with the customer that owns it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PlanOwner {
    pub pm_id: i64,
    pub cust_id: i64,
    pub cust_code: Option<String>,
}

/// An environment linked to a customer.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EnvironmentRef {
    pub env_id: i64,
    pub env_name: Option<String>,
}

/// One pending write to `app_settings`. `None` deletes the key.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub value: Option<String>,
}

impl SettingChange {
    pub fn set(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }

    pub fn delete(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
        }
    }
}

/// Monitoring snapshot families and their storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotFamily {
    /// Application content sizing, one row per environment and month.
    ContentSizing,
    /// API response capture, one row per environment and day.
    ApiResponse,
    /// Other application responses, one row per environment and month.
    OtherAppResponse,
}

impl SnapshotFamily {
    pub const ALL: [SnapshotFamily; 3] = [
        SnapshotFamily::ContentSizing,
        SnapshotFamily::ApiResponse,
        SnapshotFamily::OtherAppResponse,
    ];

    /// Path segment used by the HTTP API.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::ContentSizing => "content-sizing",
            Self::ApiResponse => "api-response",
            Self::OtherAppResponse => "other-app-response",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.slug() == slug)
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::ContentSizing => "pm_app_content_sizing",
            Self::ApiResponse => "pm_api_response",
            Self::OtherAppResponse => "pm_app_other_response",
        }
    }

    pub fn bucket_column(&self) -> &'static str {
        match self {
            Self::ContentSizing | Self::OtherAppResponse => "year_month_file",
            Self::ApiResponse => "api_date",
        }
    }

    pub fn payload_column(&self) -> &'static str {
        match self {
            Self::ContentSizing => "app_size_json",
            Self::ApiResponse => "api_json",
            Self::OtherAppResponse => "json_app_response",
        }
    }
}

impl fmt::Display for SnapshotFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// A snapshot row to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotWrite {
    pub pm_id: i64,
    pub env_id: i64,
    pub bucket: Option<String>,
    pub payload: Value,
}

/// A stored snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredSnapshot {
    pub pm_id: i64,
    pub env_id: i64,
    pub env_name: Option<String>,
    pub bucket: Option<String>,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

/// Storage operations used by the services.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Most recent `project` share link of a customer.
    async fn latest_share_link(&self, owner_id: i64) -> Result<Option<ShareLink>>;

    /// Append a share link and return the stored row.
    async fn insert_share_link(&self, owner_id: i64, url: &str, link_type: &str)
    -> Result<ShareLink>;

    async fn get_customer(&self, cust_id: i64) -> Result<Option<CustomerRecord>>;

    /// Read the given settings keys; missing keys are absent from the map.
    async fn load_settings(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Apply all changes in one transaction.
    async fn apply_settings(&self, changes: &[SettingChange]) -> Result<()>;

    async fn plan_owner(&self, pm_id: i64) -> Result<Option<PlanOwner>>;

    /// Environments linked to a customer, ordered by id.
    async fn customer_environments(&self, cust_id: i64) -> Result<Vec<EnvironmentRef>>;

    /// Upsert every row on `(pm_id, env_id, bucket)` in one transaction.
    ///
    /// Returns the number of rows written. Nothing is written on error.
    async fn replace_snapshots(&self, family: SnapshotFamily, rows: &[SnapshotWrite])
    -> Result<u64>;

    /// Stored rows of a plan, by environment name then bucket descending.
    async fn list_snapshots(&self, family: SnapshotFamily, pm_id: i64)
    -> Result<Vec<StoredSnapshot>>;

    async fn health_check(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_layout() {
        assert_eq!(
            SnapshotFamily::from_slug("api-response"),
            Some(SnapshotFamily::ApiResponse)
        );
        assert_eq!(SnapshotFamily::from_slug("sizing"), None);
        assert_eq!(SnapshotFamily::ApiResponse.bucket_column(), "api_date");
        assert_eq!(
            SnapshotFamily::OtherAppResponse.payload_column(),
            "json_app_response"
        );
    }

    #[test]
    fn test_share_link_serializes_type() {
        let link = ShareLink {
            id: 7,
            owner_id: 3,
            url: "https://x".into(),
            link_type: PROJECT_LINK_TYPE.into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["type"], "project");
        assert_eq!(json["owner_id"], 3);
    }
}
