// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AllOps PM backend.
//!
//! Serves the preventive-maintenance side of AllOps:
//!
//! - Customer diagrams are pushed to an external workflow webhook, which
//!   stores the file and records a share link in `url_share`. The service
//!   waits for that link to appear and reports it back.
//! - The current diagram image is proxied from its hosting provider, trying
//!   Google Drive URL variants in order.
//! - The webhook mode and URLs are stored in `app_settings` with environment
//!   defaults.
//! - Monitoring snapshots (content sizing, API responses, other-app
//!   responses) are imported per plan and environment, keyed by a date
//!   bucket derived from each record.
//!
//! ```text
//!   client ──► api ──► diagram::ingest ──► workflow webhook
//!               │            │                    │
//!               │            └──── poll ◄─────────┤ (writes url_share)
//!               ├──► diagram::proxy ──► Drive / image host
//!               ├──► webhook (settings)
//!               └──► snapshot ──► bucket
//!                         │
//!                         ▼
//!                    persistence (PostgreSQL)
//! ```
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error type and HTTP mapping
//! - [`persistence`]: Storage trait with PostgreSQL and in-memory backends
//! - [`migrations`]: Embedded schema migrations
//! - [`webhook`]: Webhook mode and URL settings
//! - [`url_candidates`]: Fetchable variants of a share URL
//! - [`diagram`]: Diagram ingestion and image proxy
//! - [`bucket`]: Date bucket derivation for snapshots
//! - [`snapshot`]: Snapshot import and listing
//! - [`api`]: HTTP routes

pub mod api;
pub mod bucket;
pub mod config;
pub mod diagram;
pub mod error;
pub mod migrations;
pub mod persistence;
pub mod snapshot;
pub mod state;
pub mod url_candidates;
pub mod webhook;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
