#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Relay Core
//!
//! Durable outbound action queue for a supervised social agent: the
//! subsystem that turns agent decisions into reliable, rate-limit-aware,
//! auditable calls against a third-party social API, with a human
//! operator gating consequential actions before they take effect.
//!
//! ## Architecture
//!
//! Three pieces share one shape: an agent produces a candidate action or
//! inference, it sits in a durable, inspectable state until processed or
//! explicitly approved, and every transition lands in the audit log.
//!
//! - **Outbound queue** ([`dispatch`]): job store with atomic claiming,
//!   five-category error classification, per-category retry/backoff, and
//!   dead-letter handling with operator alerts.
//! - **Content approval** ([`state_machine::approval`]): draft →
//!   approve/reject → publish, where approved drafts re-enter the queue as
//!   `publish_post` jobs, keeping the dispatcher the single choke point
//!   for provider calls.
//! - **Attribution review** ([`state_machine::attribution_review`]):
//!   approve/reject over inferred revenue credits, feeding a periodic
//!   model-weight update that lives outside this crate.
//!
//! ## Module Organization
//!
//! - [`models`] - row types and status enums for every entity
//! - [`dispatch`] - queue store, classifier, retry policy, worker pool
//! - [`state_machine`] - the two human-oversight machines
//! - [`audit`] - append-only transition trail
//! - [`operator`] - filterable, paginated dashboard reads
//! - [`config`] / [`database`] / [`logging`] / [`error`] - ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay_core::config::RelayConfig;
//! use relay_core::dispatch::{Dispatcher, QueueStore, RetryPolicy};
//!
//! # async fn example(
//! #     provider: Arc<dyn relay_core::dispatch::ProviderClient>,
//! #     credentials: Arc<dyn relay_core::dispatch::CredentialResolver>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! relay_core::logging::init_telemetry();
//! let config = RelayConfig::load()?;
//! let pool = relay_core::database::connect(&config.database).await?;
//!
//! let store = QueueStore::new(pool, RetryPolicy::from_config(&config.retry));
//! let handle = Dispatcher::new(store, provider, credentials, config.dispatcher).start();
//! // ... run until shutdown ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod operator;
pub mod state_machine;

pub use config::RelayConfig;
pub use dispatch::{
    classify, Dispatcher, DispatcherHandle, ErrorCategory, FailureDetails, ProviderClient,
    ProviderResponse, QueueStore, RetryPolicy,
};
pub use error::{RelayError, Result};
pub use models::{
    ActionType, AlertType, Job, JobPayload, JobPriority, JobStatus, PostStatus, ReviewStatus,
    ScheduledPost,
};
pub use state_machine::{AttributionReviewQueue, ContentApproval};
