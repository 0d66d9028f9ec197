// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence for tests.
//!
//! Keeps every table in maps behind a single tokio mutex, so each trait call
//! is atomic. Failure switches let tests exercise the degraded paths.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    CustomerRecord, EnvironmentRef, PROJECT_LINK_TYPE, Persistence, PlanOwner, SettingChange,
    ShareLink, SnapshotFamily, SnapshotWrite, StoredSnapshot,
};
use crate::error::{Error, Result};

type SnapshotKey = (SnapshotFamily, i64, i64, Option<String>);

#[derive(Debug, Default)]
struct MemoryState {
    customers: BTreeMap<i64, Option<String>>,
    environments: BTreeMap<i64, Option<String>>,
    customer_envs: Vec<(i64, i64)>,
    plans: BTreeMap<i64, i64>,
    share_links: Vec<ShareLink>,
    next_link_id: i64,
    settings: HashMap<String, String>,
    snapshots: HashMap<SnapshotKey, (Value, DateTime<Utc>)>,
}

/// In-memory persistence backend.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
    fail_settings_reads: AtomicBool,
    fail_snapshot_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_customer(&self, cust_id: i64, cust_code: Option<&str>) {
        let mut state = self.state.lock().await;
        state.customers.insert(cust_id, cust_code.map(str::to_string));
    }

    pub async fn add_environment(&self, env_id: i64, env_name: &str) {
        let mut state = self.state.lock().await;
        state.environments.insert(env_id, Some(env_name.to_string()));
    }

    pub async fn link_environment(&self, cust_id: i64, env_id: i64) {
        let mut state = self.state.lock().await;
        state.customer_envs.push((cust_id, env_id));
    }

    pub async fn add_plan(&self, pm_id: i64, cust_id: i64) {
        let mut state = self.state.lock().await;
        state.plans.insert(pm_id, cust_id);
    }

    /// Record a share link with an explicit timestamp.
    pub async fn push_share_link(
        &self,
        owner_id: i64,
        url: &str,
        link_type: &str,
        created_at: DateTime<Utc>,
    ) -> ShareLink {
        let mut state = self.state.lock().await;
        state.next_link_id += 1;
        let link = ShareLink {
            id: state.next_link_id,
            owner_id,
            url: url.to_string(),
            link_type: link_type.to_string(),
            created_at,
        };
        state.share_links.push(link.clone());
        link
    }

    pub async fn share_link_count(&self, owner_id: i64) -> usize {
        let state = self.state.lock().await;
        state
            .share_links
            .iter()
            .filter(|l| l.owner_id == owner_id)
            .count()
    }

    pub async fn snapshot_count(&self, family: SnapshotFamily) -> usize {
        let state = self.state.lock().await;
        state.snapshots.keys().filter(|k| k.0 == family).count()
    }

    /// Make every settings read fail.
    pub fn fail_settings_reads(&self, fail: bool) {
        self.fail_settings_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every snapshot write fail.
    pub fn fail_snapshot_writes(&self, fail: bool) {
        self.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }
}

fn latest_project_link(links: &[ShareLink], owner_id: i64) -> Option<ShareLink> {
    links
        .iter()
        .filter(|l| l.owner_id == owner_id && l.link_type.eq_ignore_ascii_case(PROJECT_LINK_TYPE))
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        .cloned()
}

fn none_last<T: Ord>(a: &Option<T>, b: &Option<T>, descending: bool) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(a),
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn latest_share_link(&self, owner_id: i64) -> Result<Option<ShareLink>> {
        let state = self.state.lock().await;
        Ok(latest_project_link(&state.share_links, owner_id))
    }

    async fn insert_share_link(
        &self,
        owner_id: i64,
        url: &str,
        link_type: &str,
    ) -> Result<ShareLink> {
        Ok(self
            .push_share_link(owner_id, url, link_type, Utc::now())
            .await)
    }

    async fn get_customer(&self, cust_id: i64) -> Result<Option<CustomerRecord>> {
        let state = self.state.lock().await;
        Ok(state.customers.get(&cust_id).map(|code| CustomerRecord {
            cust_id,
            cust_code: code.clone(),
        }))
    }

    async fn load_settings(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        if self.fail_settings_reads.load(Ordering::SeqCst) {
            return Err(Error::Internal("settings store unavailable".to_string()));
        }
        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| state.settings.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn apply_settings(&self, changes: &[SettingChange]) -> Result<()> {
        let mut state = self.state.lock().await;
        for change in changes {
            match &change.value {
                Some(value) => {
                    state.settings.insert(change.key.clone(), value.clone());
                }
                None => {
                    state.settings.remove(&change.key);
                }
            }
        }
        Ok(())
    }

    async fn plan_owner(&self, pm_id: i64) -> Result<Option<PlanOwner>> {
        let state = self.state.lock().await;
        let Some(&cust_id) = state.plans.get(&pm_id) else {
            return Ok(None);
        };
        let Some(cust_code) = state.customers.get(&cust_id) else {
            return Ok(None);
        };
        Ok(Some(PlanOwner {
            pm_id,
            cust_id,
            cust_code: cust_code.clone(),
        }))
    }

    async fn customer_environments(&self, cust_id: i64) -> Result<Vec<EnvironmentRef>> {
        let state = self.state.lock().await;
        let mut envs: Vec<EnvironmentRef> = state
            .customer_envs
            .iter()
            .filter(|(c, _)| *c == cust_id)
            .filter_map(|(_, env_id)| {
                state.environments.get(env_id).map(|name| EnvironmentRef {
                    env_id: *env_id,
                    env_name: name.clone(),
                })
            })
            .collect();
        envs.sort_by_key(|e| e.env_id);
        envs.dedup_by_key(|e| e.env_id);
        Ok(envs)
    }

    async fn replace_snapshots(
        &self,
        family: SnapshotFamily,
        rows: &[SnapshotWrite],
    ) -> Result<u64> {
        if self.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!("{} is not writable", family.table())));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for row in rows {
            state.snapshots.insert(
                (family, row.pm_id, row.env_id, row.bucket.clone()),
                (row.payload.clone(), now),
            );
        }
        Ok(rows.len() as u64)
    }

    async fn list_snapshots(
        &self,
        family: SnapshotFamily,
        pm_id: i64,
    ) -> Result<Vec<StoredSnapshot>> {
        let state = self.state.lock().await;
        let mut rows: Vec<StoredSnapshot> = state
            .snapshots
            .iter()
            .filter(|((f, p, _, _), _)| *f == family && *p == pm_id)
            .map(|((_, pm_id, env_id, bucket), (payload, updated_at))| StoredSnapshot {
                pm_id: *pm_id,
                env_id: *env_id,
                env_name: state.environments.get(env_id).cloned().flatten(),
                bucket: bucket.clone(),
                payload: payload.clone(),
                updated_at: *updated_at,
            })
            .collect();
        rows.sort_by(|a, b| {
            none_last(&a.env_name, &b.env_name, false)
                .then_with(|| none_last(&a.bucket, &b.bucket, true))
        });
        Ok(rows)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_latest_share_link_ignores_other_types() {
        let store = MemoryPersistence::new();
        let t0 = Utc::now();
        store.push_share_link(1, "https://a", "project", t0).await;
        store
            .push_share_link(1, "https://b", "invoice", t0 + Duration::seconds(5))
            .await;
        store
            .push_share_link(1, "https://c", "PROJECT", t0 + Duration::seconds(2))
            .await;
        store
            .push_share_link(2, "https://d", "project", t0 + Duration::seconds(9))
            .await;

        let latest = store.latest_share_link(1).await.unwrap().unwrap();
        assert_eq!(latest.url, "https://c");
        assert!(store.latest_share_link(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_snapshots_overwrites_same_key() {
        let store = MemoryPersistence::new();
        let row = |payload: Value| SnapshotWrite {
            pm_id: 1,
            env_id: 2,
            bucket: Some("2024-03".into()),
            payload,
        };
        store
            .replace_snapshots(SnapshotFamily::ContentSizing, &[row(serde_json::json!([1]))])
            .await
            .unwrap();
        store
            .replace_snapshots(SnapshotFamily::ContentSizing, &[row(serde_json::json!([2]))])
            .await
            .unwrap();

        let rows = store
            .list_snapshots(SnapshotFamily::ContentSizing, 1)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, serde_json::json!([2]));
    }
}
