// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow webhook target resolution.
//!
//! The active webhook is the overlay of persisted `app_settings` rows on top
//! of the process defaults handed to [`WebhookConfigResolver::new`]. The
//! derived `activeUrl` is computed on every read and never stored.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::persistence::{Persistence, SettingChange};

/// Settings key holding the webhook mode.
pub const MODE_KEY: &str = "n8n_webhook_mode";
/// Settings key holding the TEST webhook URL.
pub const TEST_URL_KEY: &str = "n8n_webhook_test_url";
/// Settings key holding the PRD webhook URL.
pub const PRD_URL_KEY: &str = "n8n_webhook_prd_url";

const SETTING_KEYS: [&str; 3] = [MODE_KEY, TEST_URL_KEY, PRD_URL_KEY];

/// Which webhook URL is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookMode {
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "PRD")]
    Prd,
}

impl WebhookMode {
    /// Parse a mode name case-insensitively. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("TEST") {
            Some(Self::Test)
        } else if raw.eq_ignore_ascii_case("PRD") {
            Some(Self::Prd)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::Prd => "PRD",
        }
    }
}

/// Process-level webhook defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDefaults {
    pub mode: WebhookMode,
    pub test_url: Option<String>,
    pub prd_url: Option<String>,
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self {
            mode: WebhookMode::Prd,
            test_url: None,
            prd_url: None,
        }
    }
}

/// Resolved webhook configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub mode: WebhookMode,
    pub test_url: Option<String>,
    pub prd_url: Option<String>,
    /// PRD prefers `prd_url`, TEST prefers `test_url`; each falls back to
    /// the other.
    pub active_url: Option<String>,
}

/// Partial update of the webhook configuration.
///
/// For the URLs, an absent key keeps the current override, while `null` or a
/// blank string removes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfigUpdate {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub test_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub prd_url: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Reads and updates the active webhook configuration.
#[derive(Clone)]
pub struct WebhookConfigResolver {
    persistence: Arc<dyn Persistence>,
    defaults: WebhookDefaults,
}

impl WebhookConfigResolver {
    pub fn new(persistence: Arc<dyn Persistence>, defaults: WebhookDefaults) -> Self {
        Self {
            persistence,
            defaults,
        }
    }

    /// Resolve the current configuration.
    ///
    /// A failing settings read degrades to the defaults.
    pub async fn resolve(&self) -> WebhookConfig {
        let settings = match self.persistence.load_settings(&SETTING_KEYS).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load webhook settings, using defaults");
                HashMap::new()
            }
        };
        resolve_from(&self.defaults, &settings)
    }

    /// Apply a partial update and return the freshly resolved configuration.
    ///
    /// The prospective configuration is validated before anything is written.
    pub async fn update(&self, update: WebhookConfigUpdate) -> Result<WebhookConfig> {
        let mode = match update.mode.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(WebhookMode::parse(raw).ok_or_else(|| {
                Error::InvalidInput("Mode must be either TEST or PRD".to_string())
            })?),
        };

        let mut changes = Vec::new();
        if let Some(mode) = mode {
            changes.push(SettingChange::set(MODE_KEY, mode.as_str()));
        }
        for (key, value) in [(TEST_URL_KEY, &update.test_url), (PRD_URL_KEY, &update.prd_url)] {
            if let Some(value) = value {
                changes.push(match non_blank(value.as_deref()) {
                    Some(url) => SettingChange::set(key, url),
                    None => SettingChange::delete(key),
                });
            }
        }

        let mut prospective = self.persistence.load_settings(&SETTING_KEYS).await?;
        for change in &changes {
            match &change.value {
                Some(value) => prospective.insert(change.key.clone(), value.clone()),
                None => prospective.remove(&change.key),
            };
        }
        validate(&resolve_from(&self.defaults, &prospective))?;

        if !changes.is_empty() {
            self.persistence.apply_settings(&changes).await?;
        }

        let config = self.resolve().await;
        info!(
            mode = config.mode.as_str(),
            active_url = ?config.active_url,
            changed = changes.len(),
            "Webhook configuration updated"
        );
        Ok(config)
    }
}

/// Overlay persisted settings on the defaults.
pub fn resolve_from(defaults: &WebhookDefaults, settings: &HashMap<String, String>) -> WebhookConfig {
    let mode = settings
        .get(MODE_KEY)
        .and_then(|raw| WebhookMode::parse(raw))
        .unwrap_or(defaults.mode);
    let test_url = non_blank(settings.get(TEST_URL_KEY).map(String::as_str))
        .map(str::to_string)
        .or_else(|| defaults.test_url.clone());
    let prd_url = non_blank(settings.get(PRD_URL_KEY).map(String::as_str))
        .map(str::to_string)
        .or_else(|| defaults.prd_url.clone());

    let active_url = match mode {
        WebhookMode::Prd => prd_url.clone().or_else(|| test_url.clone()),
        WebhookMode::Test => test_url.clone().or_else(|| prd_url.clone()),
    };

    WebhookConfig {
        mode,
        test_url,
        prd_url,
        active_url,
    }
}

fn validate(config: &WebhookConfig) -> Result<()> {
    if config.mode == WebhookMode::Prd && config.prd_url.is_none() {
        return Err(Error::InvalidInput(
            "PRD URL is required when mode is PRD".to_string(),
        ));
    }
    if config.test_url.is_none() && config.prd_url.is_none() {
        return Err(Error::InvalidInput(
            "At least one webhook URL must be configured".to_string(),
        ));
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn defaults(test: Option<&str>, prd: Option<&str>) -> WebhookDefaults {
        WebhookDefaults {
            mode: WebhookMode::Prd,
            test_url: test.map(str::to_string),
            prd_url: prd.map(str::to_string),
        }
    }

    #[test]
    fn test_active_url_fallbacks() {
        let only_test = defaults(Some("https://t"), None);
        let config = resolve_from(&only_test, &HashMap::new());
        assert_eq!(config.mode, WebhookMode::Prd);
        assert_eq!(config.active_url.as_deref(), Some("https://t"));

        let both = defaults(Some("https://t"), Some("https://p"));
        let config = resolve_from(&both, &settings(&[(MODE_KEY, "test")]));
        assert_eq!(config.mode, WebhookMode::Test);
        assert_eq!(config.active_url.as_deref(), Some("https://t"));

        let only_prd = defaults(None, Some("https://p"));
        let config = resolve_from(&only_prd, &settings(&[(MODE_KEY, "TEST")]));
        assert_eq!(config.active_url.as_deref(), Some("https://p"));

        let none = defaults(None, None);
        assert!(resolve_from(&none, &HashMap::new()).active_url.is_none());
    }

    #[test]
    fn test_persisted_values_override_defaults() {
        let config = resolve_from(
            &defaults(Some("https://t"), Some("https://p")),
            &settings(&[(PRD_URL_KEY, " https://override "), (MODE_KEY, "bogus")]),
        );
        assert_eq!(config.mode, WebhookMode::Prd);
        assert_eq!(config.prd_url.as_deref(), Some("https://override"));
        assert_eq!(config.active_url.as_deref(), Some("https://override"));
    }

    #[test]
    fn test_update_deserialization_distinguishes_null_from_absent() {
        let update: WebhookConfigUpdate =
            serde_json::from_str(r#"{"mode":"PRD","testUrl":null}"#).unwrap();
        assert_eq!(update.test_url, Some(None));
        assert_eq!(update.prd_url, None);
    }

    #[tokio::test]
    async fn test_update_rejects_prd_without_prd_url() {
        let store = Arc::new(MemoryPersistence::new());
        let resolver = WebhookConfigResolver::new(store.clone(), WebhookDefaults::default());

        let err = resolver
            .update(WebhookConfigUpdate {
                mode: Some("PRD".into()),
                test_url: Some(Some("https://t".into())),
                prd_url: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("PRD URL")));
        assert!(store.load_settings(&SETTING_KEYS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_mode() {
        let store = Arc::new(MemoryPersistence::new());
        let resolver = WebhookConfigResolver::new(store, WebhookDefaults::default());

        let err = resolver
            .update(WebhookConfigUpdate {
                mode: Some("staging".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_blank_url_reverts_to_default() {
        let store = Arc::new(MemoryPersistence::new());
        let resolver = WebhookConfigResolver::new(
            store.clone(),
            defaults(Some("https://default-test"), Some("https://default-prd")),
        );

        let config = resolver
            .update(WebhookConfigUpdate {
                mode: Some("test".into()),
                test_url: Some(Some("  https://custom-test  ".into())),
                prd_url: None,
            })
            .await
            .unwrap();
        assert_eq!(config.mode, WebhookMode::Test);
        assert_eq!(config.active_url.as_deref(), Some("https://custom-test"));

        let config = resolver
            .update(WebhookConfigUpdate {
                mode: None,
                test_url: Some(Some("   ".into())),
                prd_url: None,
            })
            .await
            .unwrap();
        assert_eq!(config.test_url.as_deref(), Some("https://default-test"));
        let stored = store.load_settings(&SETTING_KEYS).await.unwrap();
        assert!(!stored.contains_key(TEST_URL_KEY));
        assert_eq!(stored.get(MODE_KEY).map(String::as_str), Some("TEST"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_settings_unreadable() {
        let store = Arc::new(MemoryPersistence::new());
        store
            .apply_settings(&[SettingChange::set(TEST_URL_KEY, "https://stored")])
            .await
            .unwrap();
        store.fail_settings_reads(true);

        let resolver =
            WebhookConfigResolver::new(store, defaults(None, Some("https://default-prd")));
        let config = resolver.resolve().await;
        assert!(config.test_url.is_none());
        assert_eq!(config.active_url.as_deref(), Some("https://default-prd"));
    }
}
