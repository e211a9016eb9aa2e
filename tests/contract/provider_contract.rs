use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use glucotick_core::{
    HttpClient, HttpError, HttpRequest, HttpResponse, LibreLinkProvider, NightscoutProvider,
    Provider, ProviderId, SourceErrorKind,
};

/// Answers by URL path suffix; a route may also hang forever.
#[derive(Debug, Default)]
struct FakeHttpClient {
    routes: Vec<(String, Option<HttpResponse>)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttpClient {
    fn respond(mut self, suffix: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((suffix.to_owned(), Some(HttpResponse::with_status(status, body))));
        self
    }

    fn hang(mut self, suffix: &str) -> Self {
        self.routes.push((suffix.to_owned(), None));
        self
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("request store should not be poisoned").len()
    }
}

impl HttpClient for FakeHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let path = request.url.split('?').next().unwrap_or_default().to_owned();
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request);

        match self.routes.iter().find(|(suffix, _)| path.ends_with(suffix.as_str())) {
            Some((_, Some(response))) => {
                let response = response.clone();
                Box::pin(async move { Ok(response) })
            }
            Some((_, None)) => Box::pin(std::future::pending()),
            None => Box::pin(async move { Err(HttpError::new(format!("no route for {path}"))) }),
        }
    }
}

const NIGHTSCOUT_PATH: &str = "/api/v1/entries.json";
const NIGHTSCOUT_ENTRIES: &str = r#"[
    {"sgv":118,"dateString":"2024-05-01T12:10:00.000Z","direction":"Flat"},
    {"sgv":121,"dateString":"2024-05-01T12:05:00.000Z","direction":"Flat"},
    {"sgv":125,"dateString":"2024-05-01T12:00:00.000Z","direction":"FortyFiveDown"}
]"#;

const LOGIN_PATH: &str = "/llu/auth/login";
const CONNECTIONS_PATH: &str = "/llu/connections";
const GRAPH_PATH: &str = "/graph";
const LOGIN_OK: &str = r#"{"status":0,"data":{"user":{"id":"user-7"},"authTicket":{"token":"tkn","expires":4102444800,"duration":3600}}}"#;
const CONNECTIONS_OK: &str = r#"{"status":0,"data":[{"patientId":"patient-9"}]}"#;
const GRAPH_OK: &str = r#"{"status":0,"data":{
    "connection":{"glucoseMeasurement":{"ValueInMgPerDl":131,"TrendArrow":3,"FactoryTimestamp":"5/1/2024 12:10:00 PM"}},
    "graphData":[
        {"ValueInMgPerDl":128,"FactoryTimestamp":"5/1/2024 12:05:00 PM"},
        {"ValueInMgPerDl":126,"FactoryTimestamp":"5/1/2024 12:00:00 PM"}
    ]}}"#;
const GRAPH_EMPTY: &str = r#"{"status":0,"data":{"connection":{},"graphData":[]}}"#;

/// Which endpoint a status override applies to for each provider.
#[derive(Clone, Copy)]
enum Scenario {
    Healthy,
    EmptyHistory,
    Status(u16),
    Hanging,
}

struct ProviderCase {
    id: ProviderId,
    build: fn(Arc<dyn HttpClient>) -> Arc<dyn Provider>,
    unconfigured: fn() -> Arc<dyn Provider>,
    client: fn(Scenario) -> FakeHttpClient,
}

fn nightscout_client(scenario: Scenario) -> FakeHttpClient {
    match scenario {
        Scenario::Healthy => FakeHttpClient::default().respond(NIGHTSCOUT_PATH, 200, NIGHTSCOUT_ENTRIES),
        Scenario::EmptyHistory => FakeHttpClient::default().respond(NIGHTSCOUT_PATH, 200, "[]"),
        Scenario::Status(status) => FakeHttpClient::default().respond(NIGHTSCOUT_PATH, status, ""),
        Scenario::Hanging => FakeHttpClient::default().hang(NIGHTSCOUT_PATH),
    }
}

fn librelink_client(scenario: Scenario) -> FakeHttpClient {
    let base = FakeHttpClient::default()
        .respond(LOGIN_PATH, 200, LOGIN_OK)
        .respond(CONNECTIONS_PATH, 200, CONNECTIONS_OK);
    match scenario {
        Scenario::Healthy => base.respond(GRAPH_PATH, 200, GRAPH_OK),
        Scenario::EmptyHistory => base.respond(GRAPH_PATH, 200, GRAPH_EMPTY),
        Scenario::Status(status) => base.respond(GRAPH_PATH, status, ""),
        Scenario::Hanging => base.hang(GRAPH_PATH),
    }
}

fn provider_cases() -> Vec<ProviderCase> {
    vec![
        ProviderCase {
            id: ProviderId::Nightscout,
            build: |http| {
                Arc::new(NightscoutProvider::with_http_client(
                    http,
                    "cgm.example.org",
                    "reader-token",
                ))
            },
            unconfigured: || {
                Arc::new(NightscoutProvider::with_http_client(
                    Arc::new(nightscout_client(Scenario::Healthy)),
                    "",
                    "",
                ))
            },
            client: nightscout_client,
        },
        ProviderCase {
            id: ProviderId::Librelink,
            build: |http| {
                Arc::new(LibreLinkProvider::with_http_client(
                    http,
                    "follower@example.org",
                    "secret",
                    "EU",
                ))
            },
            unconfigured: || {
                Arc::new(LibreLinkProvider::with_http_client(
                    Arc::new(librelink_client(Scenario::Healthy)),
                    "",
                    "",
                    "EU",
                ))
            },
            client: librelink_client,
        },
    ]
}

fn build(case: &ProviderCase, scenario: Scenario) -> (Arc<FakeHttpClient>, Arc<dyn Provider>) {
    let client = Arc::new((case.client)(scenario));
    let provider = (case.build)(client.clone());
    (client, provider)
}

#[tokio::test]
async fn unconfigured_providers_fail_with_config_error_without_io() {
    for case in provider_cases() {
        let provider = (case.unconfigured)();
        assert_eq!(provider.id(), case.id);
        assert!(!provider.is_configured(), "{} should be unconfigured", case.id);

        let current = provider.fetch_current().await.expect_err("config error expected");
        let history = provider.fetch_history().await.expect_err("config error expected");

        for error in [current, history] {
            assert_eq!(error.kind(), SourceErrorKind::Config, "{}", case.id);
            assert!(!error.retryable(), "{}: config errors are terminal", case.id);
        }
    }
}

#[tokio::test]
async fn healthy_providers_return_valid_normalized_readings() {
    for case in provider_cases() {
        let (_, provider) = build(&case, Scenario::Healthy);
        assert!(provider.is_configured());

        let current = provider.fetch_current().await.expect("current reading");
        assert!(current.is_valid(), "{}", case.id);

        let history = provider.fetch_history().await.expect("history batch");
        assert!(!history.is_empty(), "{}", case.id);
        assert!(
            history
                .readings()
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp),
            "{}: history must be ascending",
            case.id
        );
        assert!(history.readings().iter().all(|reading| reading.is_valid()));
        assert!(provider.cgm_interval() >= 1, "{}", case.id);
    }
}

#[tokio::test]
async fn upstream_failures_are_classified() {
    for case in provider_cases() {
        let (_, provider) = build(&case, Scenario::Status(503));
        let error = provider.fetch_current().await.expect_err("503 should fail");
        assert_eq!(error.kind(), SourceErrorKind::Network, "{}", case.id);
        assert!(error.retryable());

        let (_, provider) = build(&case, Scenario::Status(401));
        let error = provider.fetch_current().await.expect_err("401 should fail");
        assert_eq!(error.kind(), SourceErrorKind::Auth, "{}", case.id);

        let (_, provider) = build(&case, Scenario::Status(200));
        let error = provider.fetch_history().await.expect_err("empty body should fail");
        assert_eq!(error.kind(), SourceErrorKind::Data, "{}", case.id);
    }
}

#[tokio::test]
async fn empty_history_is_a_retryable_data_error() {
    for case in provider_cases() {
        let (_, provider) = build(&case, Scenario::EmptyHistory);

        let error = provider
            .fetch_history()
            .await
            .expect_err("empty history must not replace good data");

        assert_eq!(error.kind(), SourceErrorKind::Data, "{}", case.id);
        assert!(error.retryable(), "{}", case.id);
    }
}

#[tokio::test]
async fn destroy_aborts_pending_requests_and_is_idempotent() {
    for case in provider_cases() {
        let (client, provider) = build(&case, Scenario::Hanging);

        let pending = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.fetch_current().await })
        };
        while client.request_count() == 0 || (case.id == ProviderId::Librelink && client.request_count() < 3) {
            tokio::task::yield_now().await;
        }

        provider.destroy();
        provider.destroy();

        let error = pending
            .await
            .expect("fetch task should not panic")
            .expect_err("destroyed provider should abort");
        assert!(!error.retryable(), "{}: aborted requests are not retried", case.id);
    }
}
