// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence backend.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::{
    CustomerRecord, EnvironmentRef, PROJECT_LINK_TYPE, Persistence, PlanOwner, SettingChange,
    ShareLink, SnapshotFamily, SnapshotWrite, StoredSnapshot,
};
use crate::error::Result;

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Roll back after a failed statement, keeping the original error.
async fn abort<E>(tx: Transaction<'_, Postgres>, error: E, operation: &str) -> E
where
    E: std::fmt::Display,
{
    if let Err(rollback_error) = tx.rollback().await {
        warn!(
            operation,
            error = %error,
            rollback_error = %rollback_error,
            "Rollback failed"
        );
    }
    error
}

fn upsert_snapshot_sql(family: SnapshotFamily) -> String {
    let table = family.table();
    let bucket = family.bucket_column();
    let payload = family.payload_column();
    format!(
        r#"
        INSERT INTO {table} (pm_id, env_id, {bucket}, {payload}, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        ON CONFLICT (pm_id, env_id, (COALESCE({bucket}, ''))) DO UPDATE
        SET {payload} = EXCLUDED.{payload},
            updated_at = NOW()
        "#
    )
}

fn list_snapshots_sql(family: SnapshotFamily) -> String {
    let table = family.table();
    let bucket = family.bucket_column();
    let payload = family.payload_column();
    format!(
        r#"
        SELECT s.pm_id, s.env_id, e.env_name,
               s.{bucket} AS bucket, s.{payload} AS payload, s.updated_at
        FROM {table} s
        LEFT JOIN env e ON e.env_id = s.env_id
        WHERE s.pm_id = $1
        ORDER BY e.env_name NULLS LAST, s.{bucket} DESC NULLS LAST
        "#
    )
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn latest_share_link(&self, owner_id: i64) -> Result<Option<ShareLink>> {
        let link = sqlx::query_as::<_, ShareLink>(
            r#"
            SELECT link_id AS id, cust_id AS owner_id, url, type AS link_type, created_at
            FROM url_share
            WHERE cust_id = $1 AND LOWER(type) = $2
            ORDER BY created_at DESC, link_id DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(PROJECT_LINK_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn insert_share_link(
        &self,
        owner_id: i64,
        url: &str,
        link_type: &str,
    ) -> Result<ShareLink> {
        let link = sqlx::query_as::<_, ShareLink>(
            r#"
            INSERT INTO url_share (cust_id, url, type, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING link_id AS id, cust_id AS owner_id, url, type AS link_type, created_at
            "#,
        )
        .bind(owner_id)
        .bind(url)
        .bind(link_type)
        .fetch_one(&self.pool)
        .await?;

        debug!(owner_id, link_id = link.id, "Share link recorded");
        Ok(link)
    }

    async fn get_customer(&self, cust_id: i64) -> Result<Option<CustomerRecord>> {
        let customer = sqlx::query_as::<_, CustomerRecord>(
            "SELECT cust_id, cust_code FROM customer WHERE cust_id = $1",
        )
        .bind(cust_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn load_settings(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT setting_key, setting_value
            FROM app_settings
            WHERE setting_key = ANY($1)
            "#,
        )
        .bind(&keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    async fn apply_settings(&self, changes: &[SettingChange]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for change in changes {
            let result = match &change.value {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO app_settings (setting_key, setting_value, updated_at)
                        VALUES ($1, $2, NOW())
                        ON CONFLICT (setting_key) DO UPDATE
                        SET setting_value = EXCLUDED.setting_value,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(&change.key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                }
                None => {
                    sqlx::query("DELETE FROM app_settings WHERE setting_key = $1")
                        .bind(&change.key)
                        .execute(&mut *tx)
                        .await
                }
            };

            if let Err(e) = result {
                return Err(abort(tx, e, "apply_settings").await.into());
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn plan_owner(&self, pm_id: i64) -> Result<Option<PlanOwner>> {
        let owner = sqlx::query_as::<_, PlanOwner>(
            r#"
            SELECT p.pm_id, c.cust_id, c.cust_code
            FROM pm_plan p
            JOIN customer c ON c.cust_id = p.cust_id
            WHERE p.pm_id = $1
            "#,
        )
        .bind(pm_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    async fn customer_environments(&self, cust_id: i64) -> Result<Vec<EnvironmentRef>> {
        let envs = sqlx::query_as::<_, EnvironmentRef>(
            r#"
            SELECT e.env_id, e.env_name
            FROM customer_env ce
            JOIN env e ON e.env_id = ce.env_id
            WHERE ce.cust_id = $1
            ORDER BY e.env_id
            "#,
        )
        .bind(cust_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(envs)
    }

    async fn replace_snapshots(
        &self,
        family: SnapshotFamily,
        rows: &[SnapshotWrite],
    ) -> Result<u64> {
        let sql = upsert_snapshot_sql(family);
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for row in rows {
            let result = sqlx::query(&sql)
                .bind(row.pm_id)
                .bind(row.env_id)
                .bind(&row.bucket)
                .bind(&row.payload)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) => written += done.rows_affected(),
                Err(e) => return Err(abort(tx, e, family.table()).await.into()),
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn list_snapshots(
        &self,
        family: SnapshotFamily,
        pm_id: i64,
    ) -> Result<Vec<StoredSnapshot>> {
        let sql = list_snapshots_sql(family);
        let rows = sqlx::query_as::<_, StoredSnapshot>(&sql)
            .bind(pm_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn health_check(&self) -> Result<bool> {
        let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_targets_bucket_expression() {
        let sql = upsert_snapshot_sql(SnapshotFamily::ApiResponse);
        assert!(sql.contains("INSERT INTO pm_api_response"));
        assert!(sql.contains("ON CONFLICT (pm_id, env_id, (COALESCE(api_date, '')))"));
        assert!(sql.contains("api_json = EXCLUDED.api_json"));
    }

    #[test]
    fn test_list_orders_by_env_then_bucket() {
        let sql = list_snapshots_sql(SnapshotFamily::ContentSizing);
        assert!(sql.contains("FROM pm_app_content_sizing s"));
        assert!(sql.contains("s.year_month_file DESC"));
    }
}
