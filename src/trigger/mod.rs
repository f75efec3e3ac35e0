//! HTTP trigger for the external archival worker.
//!
//! One body-less POST per iteration. Only the status code matters, and only
//! `200 OK` counts as success.

mod retry;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Version, header::CONNECTION};
pub use retry::with_retry;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{RetryPolicyConfig, TriggerConfig};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("trigger request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("could not connect to trigger endpoint: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("trigger request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TriggerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TriggerError::Timeout(error)
        } else if error.is_connect() {
            TriggerError::Connect(error)
        } else {
            TriggerError::Request(error)
        }
    }
}

/// Result of one trigger call that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub status: u16,
    /// Wall time including retries.
    pub elapsed: Duration,
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Hands one archival pass to the worker.
#[async_trait]
pub trait ArchiveTrigger: Send + Sync {
    async fn fire(&self) -> Result<TriggerOutcome, TriggerError>;
}

/// Pooled reqwest client pointed at the trigger URL.
pub struct TriggerClient {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicyConfig,
}

impl TriggerClient {
    pub fn from_config(config: &TriggerConfig) -> Result<Self, TriggerError> {
        let client = config.build_client().map_err(TriggerError::Client)?;
        Ok(Self {
            client,
            url: config.url.clone(),
            retry: config.retry_policy.clone(),
        })
    }

    /// Send a HEAD request and report whether the endpoint keeps connections alive.
    pub async fn check_keep_alive(&self) -> Result<KeepAliveReport, TriggerError> {
        let response = self.client.head(&self.url).send().await?;

        let connection = response
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(KeepAliveReport {
            status: response.status().as_u16(),
            version: response.version(),
            keep_alive: supports_keep_alive(response.version(), connection.as_deref()),
            connection,
        })
    }

    /// Run [`Self::check_keep_alive`] and log the verdict. A failed check is
    /// logged and otherwise ignored.
    pub async fn report_keep_alive(&self) -> Option<KeepAliveReport> {
        match self.check_keep_alive().await {
            Ok(report) => {
                let connection = report.connection.as_deref().unwrap_or("-");
                if report.keep_alive {
                    tracing::info!(
                        url = %self.url,
                        status = report.status,
                        version = ?report.version,
                        connection,
                        "Trigger endpoint keeps connections alive"
                    );
                } else {
                    tracing::warn!(
                        url = %self.url,
                        status = report.status,
                        version = ?report.version,
                        connection,
                        "Trigger endpoint does not keep connections alive; each iteration opens a new connection"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Keep-alive check failed");
                None
            }
        }
    }
}

#[async_trait]
impl ArchiveTrigger for TriggerClient {
    async fn fire(&self) -> Result<TriggerOutcome, TriggerError> {
        let started = Instant::now();
        let response = with_retry(&self.retry, &self.url, || self.client.post(&self.url).send()).await?;

        Ok(TriggerOutcome {
            status: response.status().as_u16(),
            elapsed: started.elapsed(),
        })
    }
}

/// What the HEAD request learned about the trigger endpoint.
#[derive(Debug, Clone)]
pub struct KeepAliveReport {
    pub status: u16,
    pub version: Version,
    /// Raw `Connection` header, if the server sent one.
    pub connection: Option<String>,
    pub keep_alive: bool,
}

/// HTTP/1.1 and later keep connections open unless told `close`; older
/// versions only with an explicit `keep-alive`.
pub fn supports_keep_alive(version: Version, connection: Option<&str>) -> bool {
    let connection = connection.map(|c| c.trim().to_ascii_lowercase());
    let persistent_by_default = version != Version::HTTP_09 && version != Version::HTTP_10;

    match connection.as_deref() {
        Some("keep-alive") => true,
        Some("close") => false,
        _ => persistent_by_default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    fn config(url: String) -> TriggerConfig {
        toml::from_str(&format!(
            r#"
            url = "{url}"
            timeout_secs = 1

            [retry_policy]
            total = 2
            backoff_factor = 0.0
        "#
        ))
        .unwrap()
    }

    #[rstest]
    #[case(Version::HTTP_11, None, true)]
    #[case(Version::HTTP_11, Some("close"), false)]
    #[case(Version::HTTP_11, Some("Keep-Alive"), true)]
    #[case(Version::HTTP_2, None, true)]
    #[case(Version::HTTP_10, None, false)]
    #[case(Version::HTTP_10, Some("keep-alive"), true)]
    #[case(Version::HTTP_10, Some("close"), false)]
    fn test_supports_keep_alive(
        #[case] version: Version,
        #[case] connection: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(supports_keep_alive(version, connection), expected);
    }

    #[rstest]
    #[case(200, true)]
    #[case(201, false)]
    #[case(204, false)]
    #[case(500, false)]
    fn test_only_200_is_success(#[case] status: u16, #[case] expected: bool) {
        let outcome = TriggerOutcome {
            status,
            elapsed: Duration::ZERO,
        };
        assert_eq!(outcome.is_success(), expected);
    }

    #[tokio::test]
    async fn test_fire_posts_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/archive/run"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            TriggerClient::from_config(&config(format!("{}/archive/run", server.uri()))).unwrap();
        let outcome = client.fire().await.unwrap();

        assert!(outcome.is_success());
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_fire_reports_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = TriggerClient::from_config(&config(server.uri())).unwrap();
        let outcome = client.fire().await.unwrap();

        assert_eq!(outcome.status, 202);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_fire_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.retry_policy.total = 0;
        let client = TriggerClient::from_config(&cfg).unwrap();

        let err = client.fire().await.unwrap_err();
        assert!(matches!(err, TriggerError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_fire_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/run", listener.local_addr().unwrap());
        drop(listener);

        let client = TriggerClient::from_config(&config(url)).unwrap();
        let err = client.fire().await.unwrap_err();
        assert!(matches!(err, TriggerError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_check_keep_alive() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = TriggerClient::from_config(&config(server.uri())).unwrap();
        let report = client.check_keep_alive().await.unwrap();

        assert_eq!(report.status, 200);
        assert_eq!(report.version, Version::HTTP_11);
        assert!(report.keep_alive);
    }

    #[tokio::test]
    async fn test_keep_alive_check_and_triggers_share_one_client() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = Arc::new(TriggerClient::from_config(&config(server.uri())).unwrap());
        let report = client.report_keep_alive().await.expect("keep-alive report");
        assert!(report.keep_alive);

        let trigger: Arc<dyn ArchiveTrigger> = client.clone();
        assert!(trigger.fire().await.unwrap().is_success());
        assert!(trigger.fire().await.unwrap().is_success());
        assert_eq!(Arc::strong_count(&client), 2);
    }

    #[tokio::test]
    async fn test_failed_keep_alive_check_is_not_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/run", listener.local_addr().unwrap());
        drop(listener);

        let client = TriggerClient::from_config(&config(url)).unwrap();
        assert!(client.report_keep_alive().await.is_none());
    }
}
