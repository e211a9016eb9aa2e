//! # Glucotick Core
//!
//! Providers, polling, caching and analytics for a continuous glucose
//! monitor readout.
//!
//! ## Overview
//!
//! This crate turns a remote CGM backend into a stream of display-ready
//! snapshots:
//!
//! - **Canonical domain models** for readings, history batches and units
//! - **Provider adapters** for Nightscout and LibreLink Up
//! - **Monitor loop** with retry, cooldown and stale-result discard
//! - **Two-tier cache**: in-memory history plus a JSON file that survives restarts
//! - **Analytics** for trend, delta, time in range and staleness
//! - **Alerts** on transitions into low or high
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Nightscout and LibreLink providers plus the factory |
//! | [`alert`] | Low/high transition notifications |
//! | [`analytics`] | Trend, delta, time in range, staleness |
//! | [`cache`] | In-memory history cache with TTL |
//! | [`config`] | Settings document, config sources and secret lookup |
//! | [`display`] | Snapshot composition and time-ago text |
//! | [`domain`] | Domain models (Reading, HistoryBatch, Thresholds) |
//! | [`durable`] | On-disk last-known reading and history |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP client abstraction |
//! | [`orchestrator`] | The monitor loop and its handle |
//! | [`provider`] | Provider trait and fetch errors |
//! | [`retry`] | Backoff policy and fetch state machine |
//! | [`source`] | Provider identifiers |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use glucotick_core::{DisplaySink, FileConfig, MonitorBuilder, Notification, Settings, Snapshot};
//!
//! struct Stdout;
//!
//! impl DisplaySink for Stdout {
//!     fn publish(&self, snapshot: &Snapshot) {
//!         println!("{} ({})", snapshot.label(), snapshot.updated_ago);
//!     }
//!     fn notify(&self, notification: &Notification) {
//!         println!("{}: {}", notification.title, notification.body);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(FileConfig::open(Settings::default_path()?)?);
//!     let monitor = MonitorBuilder::new(config, Arc::new(Stdout)).start();
//!     tokio::signal::ctrl_c().await?;
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  ConfigSource   │────▶│ ProviderFactory  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Monitor loop   │────▶│ Provider         │
//! │ (retry, caches) │     │ (Nightscout/LLU) │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  DisplaySink    │     │ HTTP Client      │
//! │ (Snapshot)      │     │ (reqwest)        │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Fetches fail with a classified [`SourceError`]; the monitor retries only
//! retryable kinds:
//!
//! ```rust
//! use glucotick_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::Config => "add a URL or credentials",
//!         SourceErrorKind::Auth => "check the token or password",
//!         SourceErrorKind::Network => "will retry",
//!         SourceErrorKind::Data => "backend returned nothing usable",
//!     }
//! }
//!
//! assert_eq!(describe(&SourceError::config("missing url")), "add a URL or credentials");
//! ```
//!
//! ## Security
//!
//! - Tokens and passwords are never logged; emails are masked
//! - Empty credentials may be filled from the environment at provider construction
//! - All HTTP requests use TLS via rustls

pub mod adapters;
pub mod alert;
pub mod analytics;
pub mod cache;
pub mod config;
pub mod display;
pub mod domain;
pub mod durable;
pub mod error;
pub mod http_client;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod source;

// Adapter implementations
pub use adapters::{
    build_provider, DefaultProviderFactory, LibreLinkProvider, NightscoutProvider, ProviderFactory,
};

// Alerts
pub use alert::{AlertEvaluator, AlertState, Notification};

// Analytics
pub use analytics::{Delta, TrendClass};

// Caching
pub use cache::EphemeralCache;
pub use durable::{CacheEntry, DurableCache};

// Configuration
pub use config::{
    ConfigSource, EnvSecretStore, FileConfig, NoSecrets, SecretStore, Settings, StaticConfig,
};

// Display
pub use display::{MonitorStatus, Snapshot};

// Domain models
pub use domain::{
    GlucoseLevel, GlucoseUnit, HistoryBatch, Reading, Thresholds, TrendDirection, UtcDateTime,
};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};

// Monitor
pub use orchestrator::{DisplaySink, MonitorBuilder, MonitorHandle, MonitorOptions};

// Provider contract
pub use provider::{FetchFuture, FetchKind, Provider, SourceError, SourceErrorKind};

// Retry logic
pub use retry::{FetchPhase, FetchState, RetryPolicy};

// Source identifiers
pub use source::ProviderId;
