use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient, Session};
use crate::provider::{FetchFuture, Provider, SourceError};
use crate::{HistoryBatch, ProviderId, Reading, Settings, TrendDirection, UtcDateTime};

const API_PATH: &str = "/api/v1/entries.json";
const HISTORY_FETCH_HOURS: f64 = 50.0;
const HISTORY_OVERFETCH: f64 = 1.2;
const DEFAULT_CGM_INTERVAL: u32 = 1;

const INTERVAL_SAMPLE: usize = 20;
const INTERVAL_MIN_ENTRIES: usize = 5;
const INTERVAL_MIN_DELTAS: usize = 3;
const INTERVAL_MIN_SURVIVORS: usize = 2;
const INTERVAL_RANGE_MINUTES: (f64, f64) = (0.5, 30.0);

/// Nightscout REST adapter (`/api/v1/entries.json`).
pub struct NightscoutProvider {
    base_url: Option<String>,
    token: String,
    http_client: Arc<dyn HttpClient>,
    session: Session,
    cgm_interval: AtomicU32,
}

impl NightscoutProvider {
    pub fn new(url: &str, token: impl Into<String>) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::default()), url, token)
    }

    pub fn with_http_client(
        http_client: Arc<dyn HttpClient>,
        url: &str,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: normalize_base_url(url),
            token: token.into(),
            http_client,
            session: Session::default(),
            cgm_interval: AtomicU32::new(DEFAULT_CGM_INTERVAL),
        }
    }

    pub fn from_settings(settings: &Settings, http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_http_client(http_client, &settings.nightscout_url, settings.api_token.clone())
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Entries requested per history fetch for the current interval estimate.
    pub fn history_count(&self) -> u32 {
        history_count_for(self.cgm_interval())
    }

    fn entries_url(&self, count: u32) -> Result<String, SourceError> {
        match (&self.base_url, self.token.is_empty()) {
            (Some(base), false) => Ok(format!(
                "{base}{API_PATH}?count={count}&token={}",
                urlencoding::encode(&self.token)
            )),
            _ => Err(SourceError::config("nightscout url or token not configured")),
        }
    }

    async fn fetch_entries(&self, count: u32) -> Result<Vec<Reading>, SourceError> {
        let url = self.entries_url(count)?;
        tracing::debug!(
            provider = "nightscout",
            base_url = self.base_url.as_deref().unwrap_or_default(),
            count,
            "fetching entries"
        );

        let response = self
            .session
            .execute(self.http_client.as_ref(), HttpRequest::get(url))
            .await
            .map_err(|error| SourceError::from_transport(ProviderId::Nightscout, &error))?;

        if response.is_auth_failure() {
            return Err(SourceError::auth(format!(
                "nightscout rejected the token (status {})",
                response.status
            )));
        }
        if !response.is_success() {
            return Err(SourceError::network(format!(
                "nightscout upstream returned status {}",
                response.status
            )));
        }
        if response.body.trim().is_empty() {
            return Err(SourceError::data("empty response from nightscout"));
        }

        let entries: Vec<NightscoutEntry> = serde_json::from_str(&response.body).map_err(|e| {
            SourceError::data(format!(
                "failed to parse nightscout entries: {e}; body starts with '{}'",
                response.preview()
            ))
        })?;
        if entries.is_empty() {
            return Err(SourceError::data("no entries in nightscout response"));
        }

        let total = entries.len();
        let readings: Vec<Reading> = entries
            .into_iter()
            .filter_map(|entry| match normalize_entry(&entry) {
                Ok(reading) => Some(reading),
                Err(error) => {
                    tracing::debug!(provider = "nightscout", %error, "skipping entry");
                    None
                }
            })
            .collect();

        if readings.is_empty() {
            return Err(SourceError::data(format!(
                "none of {total} nightscout entries carried a usable reading"
            )));
        }
        Ok(readings)
    }
}

impl Provider for NightscoutProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Nightscout
    }

    fn is_configured(&self) -> bool {
        self.base_url.is_some() && !self.token.is_empty()
    }

    fn fetch_current<'a>(&'a self) -> FetchFuture<'a, Reading> {
        Box::pin(async move {
            let readings = self.fetch_entries(1).await?;
            readings
                .into_iter()
                .next()
                .ok_or_else(|| SourceError::data("no entries in nightscout response"))
        })
    }

    fn fetch_history<'a>(&'a self) -> FetchFuture<'a, HistoryBatch> {
        Box::pin(async move {
            let readings = self.fetch_entries(self.history_count()).await?;

            let timestamps: Vec<UtcDateTime> =
                readings.iter().map(|reading| reading.timestamp).collect();
            let interval = detect_cgm_interval(&timestamps);
            self.cgm_interval.store(interval, Ordering::Relaxed);
            tracing::debug!(
                provider = "nightscout",
                entries = readings.len(),
                cgm_interval = interval,
                "history fetched"
            );

            Ok(HistoryBatch::new(readings))
        })
    }

    fn cgm_interval(&self) -> u32 {
        self.cgm_interval.load(Ordering::Relaxed)
    }

    fn destroy(&self) {
        self.session.close();
    }
}

#[derive(Debug, Clone, Deserialize)]
struct NightscoutEntry {
    #[serde(default)]
    sgv: Option<f64>,
    #[serde(default, rename = "dateString")]
    date_string: Option<String>,
    #[serde(default)]
    date: Option<f64>,
    #[serde(default)]
    direction: Option<String>,
}

fn normalize_entry(entry: &NightscoutEntry) -> Result<Reading, SourceError> {
    let value = entry
        .sgv
        .ok_or_else(|| SourceError::data("nightscout entry has no sgv"))?;

    let timestamp = match (&entry.date_string, entry.date) {
        (Some(date_string), fallback) => UtcDateTime::parse(date_string).or_else(|error| {
            fallback
                .ok_or(error)
                .and_then(|millis| UtcDateTime::from_unix_millis(millis as i64))
        }),
        (None, Some(millis)) => UtcDateTime::from_unix_millis(millis as i64),
        (None, None) => {
            return Err(SourceError::data("nightscout entry has no timestamp"));
        }
    }
    .map_err(|error| SourceError::data(error.to_string()))?;

    let direction = entry
        .direction
        .as_deref()
        .map(TrendDirection::from_nightscout)
        .unwrap_or_default();

    Reading::new(value, timestamp, direction).map_err(|error| SourceError::data(error.to_string()))
}

/// Trims, strips one trailing `/` and adds `https://` when no scheme is given.
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http") {
        Some(trimmed.to_owned())
    } else {
        Some(format!("https://{trimmed}"))
    }
}

/// `ceil(50h / interval * 1.2)` entries.
pub fn history_count_for(interval_minutes: u32) -> u32 {
    let interval = f64::from(interval_minutes.max(1));
    (HISTORY_FETCH_HOURS * 60.0 / interval * HISTORY_OVERFETCH).ceil() as u32
}

/// Estimates the sampling cadence in whole minutes from entry timestamps in
/// the order the server returned them.
///
/// Falls back to one minute when the sample is too small or too noisy.
pub fn detect_cgm_interval(timestamps: &[UtcDateTime]) -> u32 {
    if timestamps.len() < INTERVAL_MIN_ENTRIES {
        return DEFAULT_CGM_INTERVAL;
    }

    let (min, max) = INTERVAL_RANGE_MINUTES;
    let sample = &timestamps[..timestamps.len().min(INTERVAL_SAMPLE)];
    let deltas: Vec<f64> = sample
        .windows(2)
        .map(|pair| pair[0].minutes_since(pair[1]).abs())
        .filter(|minutes| (min..=max).contains(minutes))
        .collect();
    if deltas.len() < INTERVAL_MIN_DELTAS {
        return DEFAULT_CGM_INTERVAL;
    }

    let count = deltas.len() as f64;
    let mean = deltas.iter().sum::<f64>() / count;
    let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / count;
    let limit = 2.0 * variance.sqrt();

    let kept: Vec<f64> = deltas
        .into_iter()
        .filter(|d| (d - mean).abs() <= limit)
        .collect();
    if kept.len() < INTERVAL_MIN_SURVIVORS {
        return DEFAULT_CGM_INTERVAL;
    }

    let average = kept.iter().sum::<f64>() / kept.len() as f64;
    (average.round() as u32).max(DEFAULT_CGM_INTERVAL)
}
