use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::models::{JiraProject, JiraSearchPage};
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_config::env::{get_var, parse_var_or};

#[derive(Debug, Clone)]
pub struct JiraClientConfig {
    /// API root, e.g. `https://jira.example.com/rest/api/2`.
    pub base_url: String,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
}

impl JiraClientConfig {
    /// Load Jira config from environment.
    ///
    /// `JIRA_BASE_URL` is required. Credentials are optional and only used
    /// when both `JIRA_EMAIL` and `JIRA_API_TOKEN` are set.
    pub fn from_env() -> MirrorResult<Self> {
        let base_url = get_var("JIRA_BASE_URL")?.trim_end_matches('/').to_owned();
        let min_sleep = Duration::from_millis(parse_var_or("JIRA_MIN_SLEEP_MS", 100u64)?);
        let max_sleep = Duration::from_millis(parse_var_or("JIRA_MAX_SLEEP_MS", 6400u64)?);

        if min_sleep.is_zero() {
            return Err(MirrorError::Config("JIRA_MIN_SLEEP_MS must be positive".into()));
        }
        if min_sleep > max_sleep {
            return Err(MirrorError::Config(format!(
                "JIRA_MIN_SLEEP_MS ({}) must not exceed JIRA_MAX_SLEEP_MS ({})",
                min_sleep.as_millis(),
                max_sleep.as_millis()
            )));
        }

        Ok(Self {
            base_url,
            email: std::env::var("JIRA_EMAIL").ok().filter(|v| !v.is_empty()),
            api_token: std::env::var("JIRA_API_TOKEN").ok().filter(|v| !v.is_empty()),
            timeout_secs: parse_var_or("JIRA_TIMEOUT_SECS", 30)?,
            min_sleep,
            max_sleep,
        })
    }
}

/// Exponential backoff: waits start at `min` and double, and a wait is only
/// taken while it stays below `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn waits(&self) -> impl Iterator<Item = Duration> {
        let max = self.max;
        std::iter::successors(Some(self.min).filter(|d| !d.is_zero()), |d| d.checked_mul(2))
            .take_while(move |d| *d < max)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} (retryable): {body}")]
    RetryableStatus { status: StatusCode, body: String },

    #[error("HTTP {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transport failures, 429 and 5xx are retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RetryableStatus { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    config: JiraClientConfig,
    backoff: Backoff,
    span: Span,
}

impl JiraClient {
    pub fn new(config: JiraClientConfig, span: Span) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let backoff = Backoff::new(config.min_sleep, config.max_sleep);
        Ok(Self {
            client,
            config,
            backoff,
            span,
        })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &JiraClientConfig {
        &self.config
    }

    pub async fn list_projects(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<JiraProject>, FetchError> {
        let url = format!("{}/project", self.config.base_url);
        self.get_with_retry(&url, &[], cancel)
            .instrument(self.span.clone())
            .await
    }

    /// One page of a project's issues, changelog included.
    pub async fn fetch_issue_page(
        &self,
        project_key: &str,
        offset: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<JiraSearchPage, FetchError> {
        let url = format!("{}/search", self.config.base_url);
        let query = [
            ("jql", format!("project={project_key}")),
            ("startAt", offset.to_string()),
            ("maxResults", page_size.to_string()),
            ("expand", "changelog".to_owned()),
        ];
        self.get_with_retry(&url, &query, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let mut waits = self.backoff.waits();
        let mut attempt: u32 = 1;

        loop {
            let err = match self.get_once(url, query, cancel).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(wait) = waits.next() else {
                tracing::error!(url, attempt, error = %err, "giving up, backoff limit reached");
                return Err(err);
            };

            tracing::warn!(
                url,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "request failed, retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(url).query(query);
        if let (Some(email), Some(token)) = (&self.config.email, &self.config.api_token) {
            request = request.basic_auth(email, Some(token));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            body = response.bytes() => body?,
        };

        if status == StatusCode::OK {
            return serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: url.to_owned(),
                source,
            });
        }

        let body = String::from_utf8_lossy(&body).into_owned();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(FetchError::RetryableStatus { status, body })
        } else {
            Err(FetchError::UnexpectedStatus { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> JiraClientConfig {
        JiraClientConfig {
            base_url: "http://localhost".to_string(),
            email: Some("test@example.com".to_string()),
            api_token: Some("fake-token".to_string()),
            timeout_secs: 5,
            min_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_millis(40),
        }
    }

    fn test_client(server: &MockServer) -> JiraClient {
        JiraClient::new(test_config(), Span::none())
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn search_body(total: u32, keys: &[&str]) -> serde_json::Value {
        let issues: Vec<serde_json::Value> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                serde_json::json!({
                    "id": (10000 + i).to_string(),
                    "key": key,
                    "fields": {"summary": "s", "status": {"name": "Open"}, "created": "2024-03-01T09:00:00.000+0000"}
                })
            })
            .collect();
        serde_json::json!({"startAt": 0, "maxResults": 50, "total": total, "issues": issues})
    }

    #[test]
    fn backoff_doubles_and_stops_below_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1600));
        let waits: Vec<u64> = backoff.waits().map(|d| d.as_millis() as u64).collect();
        assert_eq!(waits, vec![100, 200, 400, 800]);
    }

    #[test]
    fn backoff_with_min_at_max_never_waits() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(500));
        assert_eq!(backoff.waits().count(), 0);
    }

    #[test]
    fn backoff_with_zero_min_never_waits() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_millis(500));
        assert_eq!(backoff.waits().count(), 0);
    }

    #[tokio::test]
    async fn list_projects_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "10000", "key": "DEV", "name": "Development", "self": "http://x/project/10000"}
            ])))
            .mount(&server)
            .await;

        let projects = test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].key, "DEV");
    }

    #[tokio::test]
    async fn fetch_issue_page_sends_paging_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("jql", "project=DEV"))
            .and(query_param("startAt", "100"))
            .and(query_param("maxResults", "50"))
            .and(query_param("expand", "changelog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(120, &["DEV-1", "DEV-2"])))
            .expect(1)
            .mount(&server)
            .await;

        let page = test_client(&server)
            .fetch_issue_page("DEV", 100, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.total, 120);
        assert_eq!(page.issues.len(), 2);
    }

    #[tokio::test]
    async fn retries_on_500_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let projects = test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap();
        assert!(projects.is_empty());
    }

    #[tokio::test]
    async fn retries_on_429() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gives_up_once_backoff_reaches_max() {
        let server = MockServer::start().await;
        // waits of 5, 10, 20ms are below 40ms, so four attempts in total
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(4)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FetchError::RetryableStatus { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "busy");
            }
            other => panic!("expected RetryableStatus, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fails_fast_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FetchError::UnexpectedStatus { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("expected UnexpectedStatus, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_200_success_is_not_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus { .. }));
    }

    #[tokio::test]
    async fn decode_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"issues\": 3}"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .fetch_issue_page("DEV", 0, 50, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }), "got: {err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = test_client(&server).list_projects(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_aborts_backoff_sleep() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.min_sleep = Duration::from_secs(30);
        config.max_sleep = Duration::from_secs(120);
        let client = JiraClient::new(config, Span::none())
            .unwrap()
            .with_base_url(&server.uri());

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = client.list_projects(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn uses_basic_auth_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        test_client(&server)
            .list_projects(&CancellationToken::new())
            .await
            .unwrap();
    }

    // ── config tests ─────────────────────────────────────────────

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "JIRA_BASE_URL",
            "JIRA_EMAIL",
            "JIRA_API_TOKEN",
            "JIRA_MIN_SLEEP_MS",
            "JIRA_MAX_SLEEP_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn from_env_requires_base_url() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = JiraClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("JIRA_BASE_URL"), "got: {err}");
    }

    #[test]
    fn from_env_applies_defaults() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("JIRA_BASE_URL", "https://jira.example.com/rest/api/2/");
        let cfg = JiraClientConfig::from_env().unwrap();
        assert_eq!(cfg.base_url, "https://jira.example.com/rest/api/2");
        assert_eq!(cfg.min_sleep, Duration::from_millis(100));
        assert_eq!(cfg.max_sleep, Duration::from_millis(6400));
        assert!(cfg.email.is_none());
        clear_env();
    }

    #[test]
    fn from_env_rejects_inverted_sleep_bounds() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("JIRA_BASE_URL", "https://jira.example.com/rest/api/2");
        std::env::set_var("JIRA_MIN_SLEEP_MS", "5000");
        std::env::set_var("JIRA_MAX_SLEEP_MS", "100");
        assert!(matches!(
            JiraClientConfig::from_env(),
            Err(MirrorError::Config(_))
        ));
        clear_env();
    }
}
