//! Log Insight HTTP collaborator
//!
//! Provides the concrete [`AggregateCounter`] and [`EventDownloader`] used by
//! the command line:
//! - GET requests with retry on network errors, 429 and 5xx
//! - Optional session login replayed once when the server asks for it
//! - Export bodies streamed chunk by chunk, never buffered whole
//!
//! Endpoint paths and their fixed query parameters are opaque configuration
//! ([`ServerConfig`]); only the names of the time-range and format
//! parameters are interpreted.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::downloader::config::{calculate_backoff, MAX_RETRIES};
use crate::fetcher::aggregate::AggregateParser;
use crate::fetcher::shared_resources::{
    build_http_client, connect_error, HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS,
};
use crate::fetcher::{AggregateCounter, ByteStream, EventDownloader, FetcherError, FetcherResult};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::{Bin, OutputFormat};

/// Status some server versions use for an expired session
const SESSION_EXPIRED: u16 = 440;

/// Header the UI endpoints set instead of a 401
const REQUIRES_LOGIN_HEADER: &str = "pi_requires_login";

/// Path of the session login endpoint
const SESSIONS_PATH: &str = "/api/v1/sessions";

/// Path reporting the server's product version
const VERSION_PATH: &str = "/api/v1/version";

/// Username, password and authentication provider for session login
#[derive(Clone)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
    /// Authentication provider (`Local`, `ActiveDirectory`, ...)
    pub provider: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("provider", &self.provider)
            .finish()
    }
}

/// Connection settings for a Log Insight server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Scheme, host and optional port, e.g. `https://loginsight.example.com`
    pub base_url: String,
    /// Path of the count-over-time endpoint
    pub aggregate_path: String,
    /// Fixed query parameters of the aggregate request
    pub aggregate_params: Vec<(String, String)>,
    /// Path of the event export endpoint
    pub export_path: String,
    /// Fixed query parameters of the export request
    pub export_params: Vec<(String, String)>,
    /// Name of the range start parameter (milliseconds)
    pub start_param: String,
    /// Name of the range end parameter (milliseconds)
    pub end_param: String,
    /// Name of the export format parameter
    pub format_param: String,
    /// Verify the server's TLS certificate
    pub verify_tls: bool,
    /// PEM certificate trusted in addition to the system roots
    pub ca_certificate: Option<Vec<u8>>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout for aggregate queries and login
    pub request_timeout: Duration,
    /// Whole-request timeout for exports, unbounded when `None`
    pub export_timeout: Option<Duration>,
    /// Credentials for session login
    pub credentials: Option<Credentials>,
    /// Pre-existing session id to reuse
    pub session_id: Option<String>,
}

impl ServerConfig {
    /// Configuration for the UI charting and message export endpoints
    pub fn new(base_url: impl Into<String>) -> Self {
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            aggregate_path: "/logcharting".to_string(),
            aggregate_params: pairs(&[
                ("export", "true"),
                ("exportHelper.exportFormat", "JSON"),
                ("paramsHelper.dateFilterPreset", "CUSTOM"),
                ("paramsHelper.shouldGroupByTime", "true"),
            ]),
            export_path: "/messages".to_string(),
            export_params: pairs(&[
                ("export", "true"),
                ("resultTo", "20000"),
                ("paramsHelper.dateFilterPreset", "CUSTOM"),
            ]),
            start_param: "paramsHelper.startTimeMillis".to_string(),
            end_param: "paramsHelper.endTimeMillis".to_string(),
            format_param: "exportHelper.exportFormat".to_string(),
            verify_tls: true,
            ca_certificate: None,
            connect_timeout: Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
            export_timeout: None,
            credentials: None,
            session_id: None,
        }
    }

    /// Log in with these credentials when the server asks for it
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Reuse an existing session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Toggle TLS certificate verification
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Also trust this PEM certificate, e.g. one saved with `--save`
    pub fn with_ca_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_certificate = Some(pem.into());
        self
    }

    /// Add or replace a fixed aggregate query parameter
    pub fn with_aggregate_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.aggregate_params, key.into(), value.into());
        self
    }

    /// Add or replace a fixed export query parameter
    pub fn with_export_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.export_params, key.into(), value.into());
        self
    }

    /// Bound the duration of a single export request
    pub fn with_export_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Query parameters of an aggregate request over `[start, end]`
    pub fn aggregate_query(&self, start: i64, end: i64) -> Vec<(String, String)> {
        self.ranged(&self.aggregate_params, start, end)
    }

    /// Query parameters of an export request over `[start, end]`
    pub fn export_query(&self, start: i64, end: i64, format: OutputFormat) -> Vec<(String, String)> {
        let mut params = self.ranged(&self.export_params, start, end);
        upsert(&mut params, self.format_param.clone(), format.to_string());
        params
    }

    fn ranged(&self, fixed: &[(String, String)], start: i64, end: i64) -> Vec<(String, String)> {
        let mut params = fixed.to_vec();
        upsert(&mut params, self.start_param.clone(), start.to_string());
        upsert(&mut params, self.end_param.clone(), end.to_string());
        params
    }
}

fn upsert(params: &mut Vec<(String, String)>, key: String, value: String) {
    match params.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => params.push((key, value)),
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    provider: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

/// Whether a response means our session is missing or expired
fn requires_login(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::UNAUTHORIZED
        || status.as_u16() == SESSION_EXPIRED
        || headers
            .get(REQUIRES_LOGIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// HTTP client for a single Log Insight server
pub struct LogInsightClient {
    client: Client,
    config: ServerConfig,
    session: Mutex<Option<String>>,
    warned: AtomicBool,
}

impl LogInsightClient {
    /// Create a client for `config`
    ///
    /// # Errors
    /// Returns [`FetcherError::Config`] when the HTTP client cannot be built.
    pub fn new(config: ServerConfig) -> FetcherResult<Self> {
        let client = build_http_client(
            config.verify_tls,
            config.ca_certificate.as_deref(),
            config.connect_timeout,
        )?;
        let session = Mutex::new(config.session_id.clone());
        Ok(Self {
            client,
            config,
            session,
            warned: AtomicBool::new(false),
        })
    }

    /// Connection settings
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session id currently attached to requests
    pub fn session_id(&self) -> Option<String> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn set_session_id(&self, session_id: String) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(session_id);
        }
    }

    /// Log in and attach the new session to subsequent requests
    ///
    /// # Errors
    /// [`FetcherError::Unauthorized`] without credentials or when the server
    /// rejects them.
    pub async fn login(&self) -> FetcherResult<String> {
        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            FetcherError::Unauthorized("Cannot authenticate without username/password".to_string())
        })?;
        info!("Attempting to authenticate as {}", credentials.username);

        let url = format!("{}{}", self.config.base_url, SESSIONS_PATH);
        let response = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout)
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
                provider: &credentials.provider,
            })
            .send()
            .await
            .map_err(|e| FetcherError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FetcherError::Unauthorized(format!(
                "Authentication failed with status {status}: {text}"
            )));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| FetcherError::ParseError(format!("Failed to parse login response: {e}")))?;
        debug!("Got new session id");
        self.set_session_id(body.session_id.clone());
        Ok(body.session_id)
    }

    /// Check the server answers at all, then ask for its version
    ///
    /// The first request is a plain `GET /` whose status is ignored, so an
    /// unreachable host or an untrusted certificate is reported before any
    /// planning starts.
    ///
    /// # Errors
    /// - [`FetcherError::UntrustedCertificate`] when TLS verification fails
    /// - [`FetcherError::NetworkError`] when the server cannot be reached
    /// - [`FetcherError::ParseError`] when the version body is malformed
    pub async fn server_version(&self) -> FetcherResult<String> {
        let root = format!("{}/", self.config.base_url);
        let ping = self
            .client
            .get(&root)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(connect_error)?;
        debug!(status = %ping.status(), "Server reachable");

        let response = self
            .get_with_retry(VERSION_PATH, &[], Some(self.config.request_timeout))
            .await?;
        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| FetcherError::ParseError(format!("Failed to parse version response: {e}")))?;
        Ok(body.version)
    }

    fn note_warning_header(&self, path: &str, headers: &HeaderMap) {
        if let Some(warning) = headers.get(reqwest::header::WARNING) {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(
                    endpoint = %path,
                    warning = %String::from_utf8_lossy(warning.as_bytes()),
                    "Server flagged this API as a technology preview; behaviour may change between versions"
                );
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let backoff = calculate_backoff(attempt);
        record_retry_backoff(backoff, attempt);
        debug!("Retrying after {:?}", backoff);
        tokio::time::sleep(backoff).await;
    }

    /// GET with retry on network errors, 429 and 5xx
    ///
    /// 4xx responses other than 429 are not retried. A response asking for
    /// login triggers one session login and a replay that does not count as
    /// a retry.
    async fn get_with_retry(
        &self,
        path: &str,
        params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> FetcherResult<Response> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut last_error = None;
        let mut reauthenticated = false;
        let mut attempt = 0;

        while attempt <= MAX_RETRIES {
            let request_metrics = HttpRequestMetrics::start(path, attempt);
            let mut request = self.client.get(&url).query(params);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            if let Some(session_id) = self.session_id() {
                request = request.bearer_auth(session_id);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    request_metrics.record_network_error();
                    warn!(
                        "Network error on attempt {}/{}: {}",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e
                    );
                    last_error = Some(FetcherError::NetworkError(e.to_string()));
                    if attempt < MAX_RETRIES {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            request_metrics.record_complete(status.as_u16());
            self.note_warning_header(path, response.headers());

            if requires_login(status, response.headers()) {
                if !reauthenticated && self.config.credentials.is_some() {
                    reauthenticated = true;
                    debug!("Not authenticated (got status {} @ {}), logging in", status, path);
                    self.login().await?;
                    continue;
                }
                return Err(FetcherError::Unauthorized(format!(
                    "Server answered {status} for {path}"
                )));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "Rate limit error (429) on attempt {}/{}",
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                last_error = Some(FetcherError::RateLimitExceeded);
                if attempt < MAX_RETRIES {
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                break;
            }

            if status.is_server_error() {
                warn!(
                    "Server error {} on attempt {}/{}",
                    status,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                last_error = Some(FetcherError::HttpError(format!("Server error: {status}")));
                if attempt < MAX_RETRIES {
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                break;
            }

            if status.is_redirection() {
                return Err(FetcherError::HttpError(format!(
                    "Unexpected redirect {status} from {path}; the session may have expired"
                )));
            }

            if status.is_client_error() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(FetcherError::HttpError(format!(
                    "Client error {status}: {error_text}"
                )));
            }

            debug!("Request succeeded on attempt {}", attempt + 1);
            return Ok(response);
        }

        Err(last_error
            .unwrap_or_else(|| FetcherError::NetworkError("All retries exhausted".to_string())))
    }
}

#[async_trait]
impl AggregateCounter for LogInsightClient {
    async fn query(&self, start: i64, end: i64) -> FetcherResult<Vec<Bin>> {
        let params = self.config.aggregate_query(start, end);
        let response = self
            .get_with_retry(&self.config.aggregate_path, &params, Some(self.config.request_timeout))
            .await?;

        let body: Value = response.json().await.map_err(|e| {
            FetcherError::ParseError(format!("Failed to deserialize aggregate response: {e}"))
        })?;
        AggregateParser::parse_chart(&body)
    }
}

#[async_trait]
impl EventDownloader for LogInsightClient {
    async fn fetch(
        &self,
        start: i64,
        end: i64,
        format: OutputFormat,
    ) -> FetcherResult<ByteStream> {
        let params = self.config.export_query(start, end, format);
        let response = self
            .get_with_retry(&self.config.export_path, &params, self.config.export_timeout)
            .await?;

        let stream = response
            .bytes_stream()
            .map_err(|e| FetcherError::NetworkError(format!("Export stream interrupted: {e}")));
        Ok(Box::pin(stream))
    }
}
