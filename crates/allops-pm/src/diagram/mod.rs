// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Customer diagrams.
//!
//! - [`ingest`] sends an uploaded diagram to the workflow webhook and waits
//!   for the workflow to record the resulting share link.
//! - [`proxy`] serves the bytes behind the current share link.

pub mod ingest;
pub mod proxy;

pub use ingest::{DiagramIngestor, DiagramPayload, IngestOutcome, IngestSource, WebhookHealth};
pub use proxy::{DiagramProxy, ProxiedImage};

use std::time::Duration;

use crate::persistence::ShareLink;

/// Whether `candidate` is a newer share link than `baseline`.
///
/// A row counts as new when it has a different positive id, or when it was
/// recorded more than `min_diff` after the baseline.
pub fn has_changed(
    baseline: Option<&ShareLink>,
    candidate: Option<&ShareLink>,
    min_diff: Duration,
) -> bool {
    let Some(candidate) = candidate else {
        return false;
    };
    let Some(baseline) = baseline else {
        return true;
    };

    if baseline.id > 0 && candidate.id > 0 && baseline.id != candidate.id {
        return true;
    }

    let min_diff = chrono::Duration::from_std(min_diff).unwrap_or(chrono::Duration::MAX);
    candidate.created_at - baseline.created_at > min_diff
}
