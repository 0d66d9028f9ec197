// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Monitoring snapshot import.
//!
//! Every import is checked in a fixed order before anything is written:
//!
//! | Step | Check | Failure |
//! |------|-------|---------|
//! | 0 | `pm_id`, `cust_code` and `jsonData` are well formed | `InvalidInput` |
//! | 1 | the PM plan exists | `NotFound` |
//! | 2 | `cust_code` matches the plan's customer | `Mismatch` |
//! | 3 | an explicit `env_id` is linked to that customer | `Mismatch` |
//!
//! Rows are then upserted on `(pm_id, env_id, bucket)` in one transaction,
//! so a re-import of the same bucket replaces the stored payload. Within one
//! content-sizing batch the last record for a key wins, and `inserted`
//! counts stored rows.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::bucket::{self, DAY_FIELDS, Granularity, MONTH_FIELDS};
use crate::error::{Error, Result};
use crate::persistence::{
    EnvironmentRef, Persistence, SnapshotFamily, SnapshotWrite, StoredSnapshot,
};

/// Record fields that may name an environment, in priority order.
const ENV_NAME_FIELDS: &[&str] = &["env_name", "env", "environment"];

/// Import request body shared by all families.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub pm_id: Option<Value>,
    #[serde(default)]
    pub cust_code: Option<String>,
    #[serde(default)]
    pub env_id: Option<Value>,
    #[serde(default, rename = "jsonData")]
    pub json_data: Option<Value>,
}

/// A record left out of a batch import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

/// Result of an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ImportOutcome {
    /// Per-record import (content sizing).
    Batch {
        inserted: u64,
        skipped: Vec<SkippedRecord>,
    },
    /// Whole-payload import.
    Single {
        inserted: u64,
        env_id: i64,
        bucket: Option<String>,
    },
}

/// Import parameters after validation steps 0 to 3.
#[derive(Debug)]
struct ValidatedImport {
    pm_id: i64,
    environments: Vec<EnvironmentRef>,
    env_id: Option<i64>,
    records: Vec<Value>,
}

/// Whether a family takes `env_id` from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvParam {
    Ignored,
    Required,
    Optional,
}

/// Validates and stores monitoring snapshots.
#[derive(Clone)]
pub struct ImportService {
    persistence: Arc<dyn Persistence>,
}

impl ImportService {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Import `request` into `family`.
    pub async fn import(&self, family: SnapshotFamily, request: ImportRequest) -> Result<ImportOutcome> {
        let outcome = match family {
            SnapshotFamily::ContentSizing => self.import_content_sizing(request).await?,
            SnapshotFamily::ApiResponse => self.import_api_response(request).await?,
            SnapshotFamily::OtherAppResponse => self.import_other_app_response(request).await?,
        };

        match &outcome {
            ImportOutcome::Batch { inserted, skipped } => info!(
                family = %family,
                inserted,
                skipped = skipped.len(),
                "Snapshot batch imported"
            ),
            ImportOutcome::Single {
                env_id, bucket, ..
            } => info!(family = %family, env_id, bucket = ?bucket, "Snapshot imported"),
        }
        Ok(outcome)
    }

    /// Stored snapshots of a plan.
    pub async fn list(&self, family: SnapshotFamily, pm_id: i64) -> Result<Vec<StoredSnapshot>> {
        if self.persistence.plan_owner(pm_id).await?.is_none() {
            return Err(Error::NotFound("PM plan not found".to_string()));
        }
        self.persistence.list_snapshots(family, pm_id).await
    }

    async fn import_content_sizing(&self, request: ImportRequest) -> Result<ImportOutcome> {
        let import = self.validate(request, EnvParam::Ignored).await?;

        let mut rows: Vec<SnapshotWrite> = Vec::with_capacity(import.records.len());
        // Later records replace earlier ones with the same (env_id, bucket).
        let mut slots: HashMap<(i64, Option<String>), usize> = HashMap::new();
        let mut skipped = Vec::new();
        for (index, record) in import.records.iter().enumerate() {
            let Some(object) = record.as_object() else {
                skipped.push(SkippedRecord {
                    index,
                    reason: "Record is not an object".to_string(),
                });
                continue;
            };
            match resolve_record_environment(object, &import.environments) {
                Ok(env_id) => {
                    let row = SnapshotWrite {
                        pm_id: import.pm_id,
                        env_id,
                        bucket: bucket::derive_bucket(record, MONTH_FIELDS, Granularity::Month),
                        payload: record.clone(),
                    };
                    match slots.entry((env_id, row.bucket.clone())) {
                        Entry::Occupied(slot) => {
                            debug!(
                                index,
                                env_id,
                                bucket = ?row.bucket,
                                "Record replaces an earlier one in the batch"
                            );
                            rows[*slot.get()] = row;
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(rows.len());
                            rows.push(row);
                        }
                    }
                }
                Err(reason) => {
                    debug!(index, reason, "Skipping content sizing record");
                    skipped.push(SkippedRecord {
                        index,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        let inserted = if rows.is_empty() {
            0
        } else {
            self.persistence
                .replace_snapshots(SnapshotFamily::ContentSizing, &rows)
                .await?
        };

        Ok(ImportOutcome::Batch { inserted, skipped })
    }

    async fn import_api_response(&self, request: ImportRequest) -> Result<ImportOutcome> {
        let import = self.validate(request, EnvParam::Required).await?;
        let env_id = import
            .env_id
            .ok_or_else(|| Error::InvalidInput("env_id is required".to_string()))?;

        let bucket = import
            .records
            .first()
            .and_then(|r| bucket::derive_bucket(r, DAY_FIELDS, Granularity::Day));

        self.write_single(SnapshotFamily::ApiResponse, import, env_id, bucket)
            .await
    }

    async fn import_other_app_response(&self, request: ImportRequest) -> Result<ImportOutcome> {
        let import = self.validate(request, EnvParam::Optional).await?;
        let last = import.records.last();

        let env_id = match import.env_id {
            Some(env_id) => env_id,
            None => {
                let object = last.and_then(Value::as_object);
                match object.map(|o| resolve_record_environment(o, &import.environments)) {
                    Some(Ok(env_id)) => env_id,
                    Some(Err(reason)) if reason != MISSING_ENV => {
                        return Err(Error::Mismatch(reason.to_string()));
                    }
                    _ => return Err(Error::InvalidInput("env_id is required".to_string())),
                }
            }
        };

        // Unparseable dates land in the current month for this family.
        let bucket = last
            .and_then(|r| bucket::derive_bucket(r, MONTH_FIELDS, Granularity::Month))
            .unwrap_or_else(bucket::current_month);

        self.write_single(SnapshotFamily::OtherAppResponse, import, env_id, Some(bucket))
            .await
    }

    async fn write_single(
        &self,
        family: SnapshotFamily,
        import: ValidatedImport,
        env_id: i64,
        bucket: Option<String>,
    ) -> Result<ImportOutcome> {
        let row = SnapshotWrite {
            pm_id: import.pm_id,
            env_id,
            bucket: bucket.clone(),
            payload: Value::Array(import.records),
        };
        let inserted = self.persistence.replace_snapshots(family, &[row]).await?;

        Ok(ImportOutcome::Single {
            inserted,
            env_id,
            bucket,
        })
    }

    async fn validate(&self, request: ImportRequest, env_param: EnvParam) -> Result<ValidatedImport> {
        // Step 0: request shape.
        let pm_id = request
            .pm_id
            .as_ref()
            .and_then(positive_id)
            .ok_or_else(|| Error::InvalidInput("pm_id must be a positive integer".to_string()))?;
        let cust_code = request
            .cust_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidInput("cust_code is required".to_string()))?
            .to_string();
        let records = match request.json_data {
            Some(Value::Array(records)) if !records.is_empty() => records,
            _ => {
                return Err(Error::InvalidInput(
                    "jsonData must be a non-empty array".to_string(),
                ));
            }
        };
        let env_id = match (env_param, request.env_id.filter(|v| !v.is_null())) {
            (EnvParam::Ignored, _) | (EnvParam::Optional, None) => None,
            (EnvParam::Required, None) => {
                return Err(Error::InvalidInput("env_id is required".to_string()));
            }
            (_, Some(raw)) => Some(positive_id(&raw).ok_or_else(|| {
                Error::InvalidInput("env_id must be a positive integer".to_string())
            })?),
        };

        // Step 1: the plan exists.
        let owner = self
            .persistence
            .plan_owner(pm_id)
            .await?
            .ok_or_else(|| Error::NotFound("PM plan not found".to_string()))?;

        // Step 2: the payload belongs to the plan's customer.
        let matches = owner
            .cust_code
            .as_deref()
            .map(|code| code.trim().eq_ignore_ascii_case(&cust_code))
            .unwrap_or(false);
        if !matches {
            return Err(Error::Mismatch(
                "cust_code does not match the PM plan's customer".to_string(),
            ));
        }

        // Step 3: an explicit environment is linked to that customer.
        let environments = self.persistence.customer_environments(owner.cust_id).await?;
        if let Some(env_id) = env_id {
            if !environments.iter().any(|e| e.env_id == env_id) {
                return Err(Error::Mismatch(
                    "env_id is not linked to the customer".to_string(),
                ));
            }
        }

        Ok(ValidatedImport {
            pm_id,
            environments,
            env_id,
            records,
        })
    }
}

const MISSING_ENV: &str = "Missing environment reference";

/// Resolve a record's environment against the customer's environments.
///
/// A linked `env_id` wins; otherwise the first name field is matched
/// case-insensitively.
fn resolve_record_environment(
    record: &Map<String, Value>,
    environments: &[EnvironmentRef],
) -> std::result::Result<i64, &'static str> {
    let by_id = record.get("env_id").and_then(positive_id);
    if let Some(env_id) = by_id {
        if environments.iter().any(|e| e.env_id == env_id) {
            return Ok(env_id);
        }
    }

    let name = ENV_NAME_FIELDS
        .iter()
        .filter_map(|f| record.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|n| !n.is_empty());
    if let Some(name) = name {
        return environments
            .iter()
            .find(|e| {
                e.env_name
                    .as_deref()
                    .map(|n| n.trim().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .map(|e| e.env_id)
            .ok_or("Environment name is not linked to the customer");
    }

    if by_id.is_some() {
        Err("env_id is not linked to the customer")
    } else {
        Err(MISSING_ENV)
    }
}

/// A positive integer id given as a JSON number or a numeric string.
fn positive_id(value: &Value) -> Option<i64> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}
