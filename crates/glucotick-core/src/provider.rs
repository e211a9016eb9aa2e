//! Provider trait and fetch error types.
//!
//! This module defines the contract (`Provider`) every glucose telemetry
//! backend implements, along with the structured error used by the monitor
//! to decide whether and how to retry.
//!
//! # Operations
//!
//! | Operation | Output | Description |
//! |-----------|--------|-------------|
//! | [`fetch_current`](Provider::fetch_current) | [`Reading`] | Latest sample |
//! | [`fetch_history`](Provider::fetch_history) | [`HistoryBatch`] | Retention window |
//! | [`is_configured`](Provider::is_configured) | `bool` | Credentials present, no I/O |
//! | [`cgm_interval`](Provider::cgm_interval) | minutes | Sampling cadence estimate |
//! | [`destroy`](Provider::destroy) | - | Abort requests, drop session state |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::http_client::HttpError;
use crate::{HistoryBatch, ProviderId, Reading};

/// The two independently scheduled fetch types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    Current,
    History,
}

impl FetchKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::History => "history",
        }
    }
}

impl Display for FetchKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Required URL or credentials are missing. Never retried.
    Config,
    /// Login, token or permission failure.
    Auth,
    /// Connection failure, timeout or unexpected HTTP status.
    Network,
    /// Empty, malformed or semantically invalid payload.
    Data,
}

/// Structured provider error consumed by the monitor's retry logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Config,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Auth,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Network,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Data,
            message: message.into(),
            retryable: true,
        }
    }

    /// Transport errors become network errors; an aborted request is not
    /// worth retrying because the session that issued it is gone.
    pub fn from_transport(provider: ProviderId, error: &HttpError) -> Self {
        Self {
            kind: SourceErrorKind::Network,
            message: format!("{provider} transport error: {}", error.message()),
            retryable: !error.is_aborted(),
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Config => "source.config",
            SourceErrorKind::Auth => "source.auth",
            SourceErrorKind::Network => "source.network",
            SourceErrorKind::Data => "source.data",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

pub type FetchFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Glucose telemetry backend contract.
///
/// Implementations are shared behind `Arc<dyn Provider>` between the monitor
/// loop and the tasks it spawns, so all methods take `&self` and any mutable
/// session state (tokens, detected intervals) lives behind interior
/// mutability.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`.
pub trait Provider: Send + Sync {
    /// Returns the provider identifier.
    fn id(&self) -> ProviderId;

    /// Whether the required URL/credentials are present. Performs no I/O.
    fn is_configured(&self) -> bool;

    /// Fetches the most recent reading.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] of kind `Config` when unconfigured, `Auth` on
    /// login/token failures, `Network` on transport failures and `Data` when
    /// the payload is empty or unusable.
    fn fetch_current<'a>(&'a self) -> FetchFuture<'a, Reading>;

    /// Fetches the retention window of readings.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch_current`](Provider::fetch_current).
    fn fetch_history<'a>(&'a self) -> FetchFuture<'a, HistoryBatch>;

    /// Best-effort sampling cadence in minutes.
    fn cgm_interval(&self) -> u32;

    /// Aborts outstanding requests and clears session state. Idempotent.
    fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retryable() {
        let error = SourceError::config("nightscout url missing");
        assert_eq!(error.kind(), SourceErrorKind::Config);
        assert!(!error.retryable());
        assert_eq!(error.code(), "source.config");
    }

    #[test]
    fn aborted_transport_errors_are_not_retryable() {
        let aborted = SourceError::from_transport(ProviderId::Nightscout, &HttpError::aborted());
        let timeout = SourceError::from_transport(ProviderId::Nightscout, &HttpError::new("timeout"));

        assert_eq!(aborted.kind(), SourceErrorKind::Network);
        assert!(!aborted.retryable());
        assert!(timeout.retryable());
        assert!(timeout.to_string().contains("nightscout transport error"));
    }
}
