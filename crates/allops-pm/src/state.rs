// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared state for the HTTP handlers.

use std::sync::Arc;

use crate::config::DiagramConfig;
use crate::diagram::{DiagramIngestor, DiagramProxy};
use crate::error::Result;
use crate::persistence::Persistence;
use crate::snapshot::ImportService;
use crate::webhook::{WebhookConfigResolver, WebhookDefaults};

/// Services wired to one persistence backend.
#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<dyn Persistence>,
    pub webhooks: WebhookConfigResolver,
    pub ingestor: DiagramIngestor,
    pub proxy: DiagramProxy,
    pub imports: ImportService,
    /// Request body limit for diagram uploads.
    pub upload_limit: usize,
}

impl AppState {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        diagram: DiagramConfig,
        webhook_defaults: WebhookDefaults,
    ) -> Result<Self> {
        let webhooks = WebhookConfigResolver::new(persistence.clone(), webhook_defaults);
        let proxy = DiagramProxy::new(persistence.clone(), &diagram)?;
        // Room for base64 inline images and multipart framing.
        let upload_limit = diagram.max_file_bytes.saturating_mul(2).max(1024 * 1024);
        let ingestor = DiagramIngestor::new(persistence.clone(), webhooks.clone(), diagram)?;
        let imports = ImportService::new(persistence.clone());

        Ok(Self {
            persistence,
            webhooks,
            ingestor,
            proxy,
            imports,
            upload_limit,
        })
    }
}
