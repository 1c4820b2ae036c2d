//! Arguments shared by the subcommands that talk to a server

use crate::downloader::config::{DEFAULT_MAXIMUM, MAXIMUM_LIMIT};
use crate::downloader::{FetchPlanner, PlanMetrics};
use crate::fetcher::http::{Credentials, LogInsightClient, ServerConfig};
use crate::fetcher::shared_resources::{fetch_server_certificate, HTTP_CONNECT_TIMEOUT_SECS};
use crate::fetcher::AggregateCounter;
use crate::shutdown::SharedShutdown;
use crate::Bin;
use chrono::{DateTime, NaiveDate};
use clap::{Args, ValueEnum};
use reqwest::Url;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::credentials::{prompt_password, provider_api_name, read_netrc, save_certificate, NetrcEntry};
use super::CliError;

/// Try to parse a datetime from RFC3339 format
///
/// Handles both inputs with and without timezone designators:
/// - "2024-01-01T00:00:00Z" - explicit UTC
/// - "2024-01-01T00:00:00+01:00" - explicit offset
/// - "2024-01-01T00:00:00" - no timezone, assumed UTC
///
/// Returns timestamp in milliseconds, or None if parsing fails.
fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp_millis());
    }

    None
}

/// Parse a start time from milliseconds, YYYY-MM-DD or RFC3339.
///
/// For date-only format, uses start-of-day (00:00:00 UTC).
pub fn parse_start_time_flexible(input: &str) -> Result<i64, CliError> {
    let input = input.trim();
    if let Ok(ms) = input.parse::<i64>() {
        return Ok(ms);
    }
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid start time {input:?}: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument("Invalid start time".to_string()))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse an end time from milliseconds, YYYY-MM-DD or RFC3339.
///
/// For date-only format, uses end-of-day (23:59:59.999 UTC) so the specified
/// date is fully included; bins are closed intervals.
pub fn parse_end_time_flexible(input: &str) -> Result<i64, CliError> {
    let input = input.trim();
    if let Ok(ms) = input.parse::<i64>() {
        return Ok(ms);
    }
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid end time {input:?}: {e}")))?;
    let datetime = date
        .and_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| CliError::InvalidArgument("Invalid end time".to_string()))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse and validate the per-bin maximum
fn parse_maximum(s: &str) -> Result<u64, String> {
    let value: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("maximum must be at least 1".to_string());
    }
    if value > MAXIMUM_LIMIT {
        return Err(format!("maximum {value} exceeds the server limit of {MAXIMUM_LIMIT}"));
    }
    Ok(value)
}

/// Parse a `KEY=VALUE` query parameter
fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("'{s}' is not of the form KEY=VALUE")),
    }
}

/// Identity provider an account belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Accounts local to the server
    Local,
    /// Active Directory accounts
    Ad,
}

impl Provider {
    /// Name the session endpoint expects
    pub fn as_api_name(&self) -> &'static str {
        match self {
            Provider::Local => "DEFAULT",
            Provider::Ad => "ACTIVE_DIRECTORY",
        }
    }
}

/// Server connection arguments
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Server base URL, e.g. https://loginsight.example.com
    pub server: String,

    /// Login with this username
    #[arg(long, env = "LOGINSIGHT_USERNAME")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(long, env = "LOGINSIGHT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Identity provider of --username [default: local, or the netrc account]
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Reuse an existing session id instead of logging in
    #[arg(long, env = "LOGINSIGHT_SESSION", hide_env_values = true)]
    pub session: Option<String>,

    /// Read credentials from this netrc file instead of ~/.netrc
    #[arg(long, env = "NETRC")]
    pub netrc: Option<PathBuf>,

    /// Never prompt for a missing password
    #[arg(long, default_value_t = false)]
    pub no_prompt: bool,

    /// Skip TLS certificate verification
    #[arg(long, default_value_t = false, conflicts_with = "ca_cert")]
    pub insecure: bool,

    /// Trust the certificate(s) in this PEM file
    #[arg(long, value_name = "PEM")]
    pub ca_cert: Option<PathBuf>,

    /// Save the certificate the server presents to this PEM file and exit
    #[arg(long, value_name = "PEM")]
    pub save: Option<PathBuf>,

    /// Extra query parameter for both aggregate and export requests (KEY=VALUE, repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Login pieces gathered before any prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginParts {
    /// Account name
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Session API provider name
    pub provider: Option<String>,
}

impl ServerArgs {
    /// Server URL, checked for an http(s) scheme and a host
    pub fn parsed_url(&self) -> Result<Url, CliError> {
        let url = Url::parse(&self.server).map_err(|e| {
            CliError::InvalidArgument(format!("Invalid server URL {}: {e}", self.server))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(CliError::InvalidArgument(format!(
                "Server URL must start with http:// or https://: {}",
                self.server
            )));
        }
        Ok(url)
    }

    /// Combine the command line, URL userinfo and a netrc entry
    ///
    /// Earlier sources win. The netrc entry only fills in a missing password,
    /// and only when its login agrees with the username already chosen.
    pub fn login_parts(&self, url: &Url, netrc: Option<NetrcEntry>) -> LoginParts {
        let mut username = self.username.clone().or_else(|| {
            Some(url.username())
                .filter(|u| !u.is_empty())
                .map(percent_decode)
        });
        let mut password = self
            .password
            .clone()
            .or_else(|| url.password().map(percent_decode));
        let mut provider = self.provider.map(|p| p.as_api_name().to_string());

        if password.is_none() {
            if let Some(entry) = netrc {
                let agrees = match (&username, &entry.login) {
                    (Some(chosen), Some(login)) => chosen == login,
                    _ => true,
                };
                if agrees && entry.password.is_some() {
                    username = username.or(entry.login);
                    password = entry.password;
                    if provider.is_none() {
                        provider = entry.account.as_deref().map(provider_api_name);
                    }
                }
            }
        }

        LoginParts {
            username,
            password,
            provider,
        }
    }

    /// Resolve credentials, prompting for a password on a terminal
    ///
    /// # Errors
    /// - [`CliError::InvalidArgument`] when a username has no password and
    ///   prompting is not possible
    /// - [`CliError::Interrupted`] on Ctrl+C at the prompt
    pub async fn credentials(
        &self,
        url: &Url,
        shutdown: &SharedShutdown,
    ) -> Result<Option<Credentials>, CliError> {
        let host = url.host_str().unwrap_or_default();
        let netrc = if self.password.is_none() && url.password().is_none() {
            read_netrc(self.netrc.as_deref(), host)?
        } else {
            None
        };
        let parts = self.login_parts(url, netrc);

        let Some(username) = parts.username else {
            if parts.password.is_some() {
                warn!("Ignoring a password given without a username");
            }
            return Ok(None);
        };

        let password = match parts.password {
            Some(password) => Some(password),
            None if !self.no_prompt && std::io::stdin().is_terminal() => {
                prompt_password(&username, host, shutdown).await?
            }
            None => None,
        };
        let Some(password) = password else {
            return Err(CliError::InvalidArgument(format!(
                "No password for {username}; pass --password, set LOGINSIGHT_PASSWORD or add it to a netrc file"
            )));
        };

        Ok(Some(Credentials {
            username,
            password,
            provider: parts
                .provider
                .unwrap_or_else(|| Provider::Local.as_api_name().to_string()),
        }))
    }

    /// Connection settings for `url` with resolved `credentials`
    pub fn server_config(
        &self,
        url: &Url,
        credentials: Option<Credentials>,
    ) -> Result<ServerConfig, CliError> {
        let mut config = ServerConfig::new(base_url(url)).with_verify_tls(!self.insecure);
        if let Some(path) = &self.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                CliError::InvalidArgument(format!("Cannot read {}: {e}", path.display()))
            })?;
            config = config.with_ca_certificate(pem);
        }
        for (key, value) in &self.params {
            config = config
                .with_aggregate_param(key.as_str(), value.as_str())
                .with_export_param(key.as_str(), value.as_str());
        }
        if let Some(credentials) = credentials {
            config = config.with_credentials(credentials);
        }
        if let Some(session) = &self.session {
            config = config.with_session(session.as_str());
        }
        Ok(config)
    }

    /// Connect to the server and report its version
    ///
    /// With `--save`, the server certificate is written out instead and
    /// `None` is returned; the caller has nothing left to do.
    pub async fn connect(
        &self,
        shutdown: &SharedShutdown,
    ) -> Result<Option<LogInsightClient>, CliError> {
        let url = self.parsed_url()?;
        let host = url.host_str().unwrap_or_default().to_string();

        if let Some(path) = &self.save {
            let cert_url = base_url(&url);
            let der = tokio::select! {
                fetched = fetch_server_certificate(&cert_url, Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS)) => fetched?,
                _ = shutdown.wait_for_shutdown() => return Err(CliError::Interrupted),
            };
            let pem = save_certificate(path, &der)?;
            print!("{pem}");
            println!(
                "Saved the certificate of {host} to {0}. Use it by passing --ca-cert {0}",
                path.display()
            );
            return Ok(None);
        }

        let credentials = self.credentials(&url, shutdown).await?;
        let client = LogInsightClient::new(self.server_config(&url, credentials)?)?;
        let version = tokio::select! {
            version = client.server_version() => version?,
            _ = shutdown.wait_for_shutdown() => return Err(CliError::Interrupted),
        };
        info!("Connected to {host} running Log Insight {version}");
        Ok(Some(client))
    }
}

/// `scheme://host[:port][/path]` without userinfo, query or trailing slash
fn base_url(url: &Url) -> String {
    let mut stripped = url.clone();
    // Only fails for URLs that cannot carry userinfo, which have none to strip
    let _ = stripped.set_username("");
    let _ = stripped.set_password(None);
    stripped.set_query(None);
    stripped.set_fragment(None);
    stripped.as_str().trim_end_matches('/').to_string()
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

/// Time range and bin size arguments
#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// Start time: milliseconds, YYYY-MM-DD or RFC3339 (inclusive)
    #[arg(long)]
    pub start: String,

    /// End time: milliseconds, YYYY-MM-DD or RFC3339 (inclusive)
    #[arg(long)]
    pub end: String,

    /// Largest quantity of events to retrieve in a single bin [1-20000]
    #[arg(long, default_value_t = DEFAULT_MAXIMUM, value_parser = parse_maximum)]
    pub max: u64,
}

impl RangeArgs {
    /// `(start, end)` in milliseconds
    pub fn bounds(&self) -> Result<(i64, i64), CliError> {
        let start = parse_start_time_flexible(&self.start)?;
        let end = parse_end_time_flexible(&self.end)?;
        if end < start {
            return Err(CliError::InvalidArgument(format!(
                "End time {} precedes start time {}",
                self.end, self.start
            )));
        }
        Ok((start, end))
    }
}

/// Plan `range` against `counter`, giving up early on Ctrl+C
pub async fn plan_range<C>(
    planner: &FetchPlanner<'_, C>,
    range: &RangeArgs,
    shutdown: &SharedShutdown,
) -> Result<(Vec<Bin>, PlanMetrics), CliError>
where
    C: AggregateCounter + ?Sized,
{
    let (start, end) = range.bounds()?;
    info!(start = start, end = end, maximum = range.max, "Planning export");

    tokio::select! {
        planned = planner.plan(start, end, range.max) => Ok(planned?),
        _ = shutdown.wait_for_shutdown() => Err(CliError::Interrupted),
    }
}
