use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::{PrimitiveDateTime, UtcOffset};

use crate::config::ConfigSource;
use crate::http_client::{
    HttpAuth, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient, Session,
};
use crate::provider::{FetchFuture, Provider, SourceError};
use crate::{HistoryBatch, ProviderId, Reading, Settings, TrendDirection, UtcDateTime};

const REGIONAL_URLS: [(&str, &str); 8] = [
    ("EU", "https://api-eu.libreview.io"),
    ("US", "https://api.libreview.io"),
    ("DE", "https://api-de.libreview.io"),
    ("FR", "https://api-fr.libreview.io"),
    ("JP", "https://api-jp.libreview.io"),
    ("AP", "https://api-ap.libreview.io"),
    ("AU", "https://api-au.libreview.io"),
    ("RU", "https://api.libreview.ru"),
];

const CLIENT_HEADERS: [(&str, &str); 7] = [
    (
        "user-agent",
        "Mozilla/5.0 (iPhone; CPU OS 17_4.1 like Mac OS X) AppleWebKit/536.26 (KHTML, like Gecko) Version/17.4.1 Mobile/10A5355d Safari/8536.25",
    ),
    ("accept-encoding", "gzip"),
    ("cache-control", "no-cache"),
    ("connection", "Keep-Alive"),
    ("content-type", "application/json"),
    ("product", "llu.ios"),
    ("version", "4.12.0"),
];

const PATIENT_ID_KEY: &str = "librelink.patientId";

/// Resolves a region code to its API base URL; unknown codes map to EU.
pub fn regional_base_url(region: &str) -> &'static str {
    let region = region.trim().to_ascii_uppercase();
    REGIONAL_URLS
        .iter()
        .find(|(code, _)| *code == region)
        .map_or(REGIONAL_URLS[0].1, |(_, url)| *url)
}

/// Lowercase hex SHA-256 of the LibreView user id.
pub fn account_id_for(user_id: &str) -> String {
    hex::encode(Sha256::digest(user_id.as_bytes()))
}

/// First three characters of an email followed by `***`.
pub fn mask_email(email: &str) -> String {
    if email.is_empty() {
        return String::from("<unset>");
    }
    let prefix: String = email.chars().take(3).collect();
    format!("{prefix}***")
}

#[derive(Debug, Clone, Default)]
struct AuthState {
    token: Option<String>,
    expires_at: Option<UtcDateTime>,
    account_id: Option<String>,
    patient_id: Option<String>,
}

impl AuthState {
    fn token_valid(&self, now: UtcDateTime) -> bool {
        self.token.is_some() && self.expires_at.is_some_and(|expires| now < expires)
    }
}

#[derive(Debug, Clone)]
struct Authenticated {
    token: String,
    account_id: String,
    patient_id: String,
}

/// LibreLinkUp follower-API adapter.
pub struct LibreLinkProvider {
    email: String,
    password: String,
    base_url: &'static str,
    configured_patient_id: Option<String>,
    http_client: Arc<dyn HttpClient>,
    config: Option<Arc<dyn ConfigSource>>,
    session: Session,
    auth: Mutex<AuthState>,
}

impl LibreLinkProvider {
    pub fn new(email: impl Into<String>, password: impl Into<String>, region: &str) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::default()), email, password, region)
    }

    pub fn with_http_client(
        http_client: Arc<dyn HttpClient>,
        email: impl Into<String>,
        password: impl Into<String>,
        region: &str,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            base_url: regional_base_url(region),
            configured_patient_id: None,
            http_client,
            config: None,
            session: Session::default(),
            auth: Mutex::new(AuthState::default()),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        http_client: Arc<dyn HttpClient>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        let librelink = &settings.librelink;
        Self::with_http_client(
            http_client,
            librelink.email.clone(),
            librelink.password.clone(),
            &librelink.region,
        )
        .with_patient_id(librelink.patient_id.clone())
        .with_config(config)
    }

    /// Skips connection discovery when `patient_id` is non-empty.
    pub fn with_patient_id(mut self, patient_id: impl Into<String>) -> Self {
        let patient_id = patient_id.into();
        self.configured_patient_id = (!patient_id.is_empty()).then_some(patient_id);
        self
    }

    /// Config source the discovered patient id is written back to.
    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn base_url(&self) -> &'static str {
        self.base_url
    }

    fn lock_auth(&self) -> std::sync::MutexGuard<'_, AuthState> {
        self.auth
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn clear_token(&self) {
        let mut auth = self.lock_auth();
        auth.token = None;
        auth.expires_at = None;
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        let response = self
            .session
            .execute(self.http_client.as_ref(), request.with_headers(CLIENT_HEADERS))
            .await
            .map_err(|error| SourceError::from_transport(ProviderId::Librelink, &error))?;

        if response.is_auth_failure() {
            self.clear_token();
            return Err(SourceError::auth(format!(
                "librelink rejected the request (status {})",
                response.status
            )));
        }
        if !response.is_success() {
            return Err(SourceError::network(format!(
                "librelink upstream returned status {}",
                response.status
            )));
        }
        if response.body.trim().is_empty() {
            return Err(SourceError::data(format!(
                "empty response from librelink (status {})",
                response.status
            )));
        }
        Ok(response)
    }

    fn authorized(request: HttpRequest, token: &str, account_id: &str) -> HttpRequest {
        request
            .with_auth(&HttpAuth::BearerToken(token.to_owned()))
            .with_header("account-id", account_id)
    }

    async fn login(&self) -> Result<(String, String), SourceError> {
        tracing::info!(
            provider = "librelink",
            base_url = self.base_url,
            email = %mask_email(&self.email),
            "logging in"
        );

        let body = serde_json::to_string(&LoginRequest {
            email: &self.email,
            password: &self.password,
        })
        .map_err(|e| SourceError::config(format!("failed to encode login request: {e}")))?;

        let response = self
            .send(HttpRequest::post(format!("{}/llu/auth/login", self.base_url)).with_body(body))
            .await?;

        let envelope: LluEnvelope<LoginData> = parse_envelope(&response, "login")?;
        if envelope.status != 0 {
            return Err(SourceError::auth(format!(
                "librelink login failed: {}",
                describe_error(envelope.error.as_ref())
            )));
        }

        let (ticket, user) = envelope
            .data
            .and_then(|data| data.auth_ticket.zip(data.user))
            .ok_or_else(|| SourceError::auth("invalid librelink login response: no auth ticket"))?;

        let user_id = match user.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        let account_id = account_id_for(&user_id);
        let expires_at = UtcDateTime::from_unix_millis(ticket.expires.saturating_mul(1000))
            .map_err(|e| SourceError::auth(format!("invalid auth ticket expiry: {e}")))?;

        {
            let mut auth = self.lock_auth();
            auth.token = Some(ticket.token.clone());
            auth.expires_at = Some(expires_at);
            auth.account_id = Some(account_id.clone());
        }
        tracing::info!(provider = "librelink", expires_at = %expires_at, "login succeeded");

        Ok((ticket.token, account_id))
    }

    async fn discover_patient_id(&self, token: &str, account_id: &str) -> Result<String, SourceError> {
        if let Some(patient_id) = &self.configured_patient_id {
            return Ok(patient_id.clone());
        }

        let request = Self::authorized(
            HttpRequest::get(format!("{}/llu/connections", self.base_url)),
            token,
            account_id,
        );
        let response = self.send(request).await?;

        let envelope: LluEnvelope<Vec<LluConnection>> = parse_envelope(&response, "connections")?;
        if envelope.status != 0 {
            return Err(SourceError::data(format!(
                "failed to list librelink connections: {}",
                describe_error(envelope.error.as_ref())
            )));
        }
        let patient_id = envelope
            .data
            .and_then(|connections| connections.into_iter().next())
            .map(|connection| connection.patient_id)
            .ok_or_else(|| {
                SourceError::data("no librelink connections; nobody is sharing data with this account")
            })?;

        if let Some(config) = &self.config {
            if let Err(error) = config.set(PATIENT_ID_KEY, Value::String(patient_id.clone())) {
                tracing::warn!(provider = "librelink", %error, "failed to persist patient id");
            }
        }
        tracing::info!(provider = "librelink", "discovered patient connection");
        Ok(patient_id)
    }

    /// Logs in only when the token is missing or expired and discovers the
    /// patient only when it is not yet known.
    async fn ensure_authenticated(&self) -> Result<Authenticated, SourceError> {
        if !self.is_configured() {
            return Err(SourceError::config("librelink email or password not configured"));
        }

        let cached = self.lock_auth().clone();
        let token_valid = cached.token_valid(UtcDateTime::now());
        let (token, account_id) = match (token_valid, cached.token, cached.account_id) {
            (true, Some(token), Some(account_id)) => (token, account_id),
            _ => self.login().await?,
        };

        let patient_id = match cached.patient_id {
            Some(patient_id) => patient_id,
            None => {
                let patient_id = self.discover_patient_id(&token, &account_id).await?;
                self.lock_auth().patient_id = Some(patient_id.clone());
                patient_id
            }
        };

        Ok(Authenticated {
            token,
            account_id,
            patient_id,
        })
    }

    async fn fetch_graph(&self) -> Result<GraphData, SourceError> {
        let auth = self.ensure_authenticated().await?;
        let request = Self::authorized(
            HttpRequest::get(format!(
                "{}/llu/connections/{}/graph",
                self.base_url, auth.patient_id
            )),
            &auth.token,
            &auth.account_id,
        );
        let response = self.send(request).await?;

        let envelope: LluEnvelope<GraphData> = parse_envelope(&response, "graph")?;
        if envelope.status != 0 {
            return Err(SourceError::data(format!(
                "failed to fetch librelink glucose data: {}",
                describe_error(envelope.error.as_ref())
            )));
        }
        envelope
            .data
            .ok_or_else(|| SourceError::data("no glucose data in librelink response"))
    }
}

impl Provider for LibreLinkProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Librelink
    }

    fn is_configured(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    fn fetch_current<'a>(&'a self) -> FetchFuture<'a, Reading> {
        Box::pin(async move {
            let graph = self.fetch_graph().await?;
            let measurement = graph
                .connection
                .and_then(|connection| connection.glucose_measurement)
                .ok_or_else(|| SourceError::data("no current glucose measurement found"))?;
            normalize_measurement(&measurement)
        })
    }

    fn fetch_history<'a>(&'a self) -> FetchFuture<'a, HistoryBatch> {
        Box::pin(async move {
            let graph = self.fetch_graph().await?;
            let points = graph
                .graph_data
                .ok_or_else(|| SourceError::data("no glucose history found"))?;

            let readings = points
                .iter()
                .filter_map(|point| match normalize_measurement(point) {
                    Ok(reading) => Some(reading),
                    Err(error) => {
                        tracing::debug!(provider = "librelink", %error, "skipping graph point");
                        None
                    }
                })
                .collect::<Vec<_>>();
            if readings.is_empty() {
                return Err(SourceError::data(format!(
                    "no usable glucose history in librelink response ({} points)",
                    points.len()
                )));
            }
            tracing::debug!(provider = "librelink", entries = readings.len(), "history fetched");

            Ok(HistoryBatch::new(readings))
        })
    }

    fn cgm_interval(&self) -> u32 {
        1
    }

    fn destroy(&self) {
        self.session.close();
        *self.lock_auth() = AuthState::default();
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LluEnvelope<T> {
    #[serde(default = "missing_status")]
    status: i64,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

const fn missing_status() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default, rename = "authTicket")]
    auth_ticket: Option<AuthTicket>,
    #[serde(default)]
    user: Option<LluUser>,
}

#[derive(Debug, Deserialize)]
struct AuthTicket {
    token: String,
    expires: i64,
}

#[derive(Debug, Deserialize)]
struct LluUser {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct LluConnection {
    #[serde(rename = "patientId")]
    patient_id: String,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    #[serde(default)]
    connection: Option<GraphConnection>,
    #[serde(default, rename = "graphData")]
    graph_data: Option<Vec<Measurement>>,
}

#[derive(Debug, Deserialize)]
struct GraphConnection {
    #[serde(default, rename = "glucoseMeasurement")]
    glucose_measurement: Option<Measurement>,
}

#[derive(Debug, Clone, Deserialize)]
struct Measurement {
    #[serde(default, rename = "ValueInMgPerDl")]
    value_in_mg_per_dl: Option<f64>,
    #[serde(default, rename = "Value")]
    value: Option<f64>,
    #[serde(default, rename = "FactoryTimestamp")]
    factory_timestamp: Option<String>,
    #[serde(default, rename = "Timestamp")]
    timestamp: Option<String>,
    #[serde(default, rename = "TrendArrow")]
    trend_arrow: Option<i64>,
}

fn parse_envelope<T>(response: &HttpResponse, operation: &str) -> Result<LluEnvelope<T>, SourceError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(&response.body).map_err(|e| {
        SourceError::data(format!(
            "failed to parse librelink {operation} response: {e}; body starts with '{}'",
            response.preview()
        ))
    })
}

fn describe_error(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(message)) => message.clone(),
        Some(value) => value
            .get("message")
            .or_else(|| value.get("description"))
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned),
        None => String::from("unknown error"),
    }
}

fn normalize_measurement(measurement: &Measurement) -> Result<Reading, SourceError> {
    let value = measurement
        .value_in_mg_per_dl
        .filter(|value| *value > 0.0)
        .or(measurement.value)
        .ok_or_else(|| SourceError::data("librelink measurement has no value"))?;

    let timestamp = match (&measurement.factory_timestamp, &measurement.timestamp) {
        (Some(factory), _) => parse_device_timestamp(factory, UtcOffset::UTC),
        (None, Some(local)) => parse_device_timestamp(local, local_offset()),
        (None, None) => None,
    }
    .ok_or_else(|| SourceError::data("librelink measurement has no parseable timestamp"))?;

    let direction = measurement
        .trend_arrow
        .map(TrendDirection::from_librelink_arrow)
        .unwrap_or_default();

    Reading::new(value, timestamp, direction).map_err(|error| SourceError::data(error.to_string()))
}

fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Parses the US device format `M/D/YYYY h:mm:ss AM` at `offset`.
/// RFC3339 values are accepted as well.
fn parse_device_timestamp(raw: &str, offset: UtcOffset) -> Option<UtcDateTime> {
    let format = format_description!(
        "[month padding:none]/[day padding:none]/[year] [hour repr:12 padding:none]:[minute]:[second] [period]"
    );
    match PrimitiveDateTime::parse(raw.trim(), format) {
        Ok(parsed) => Some(UtcDateTime::from_offset_datetime(parsed.assume_offset(offset))),
        Err(_) => UtcDateTime::parse(raw).ok(),
    }
}
