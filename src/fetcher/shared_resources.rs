//! HTTP client construction shared by the server collaborators
//!
//! Every request the exporter makes goes through one pooled
//! [`reqwest::Client`], so aggregate queries and exports reuse the same
//! connection to the server.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;
use reqwest::{Certificate, Client};
use std::error::Error as StdError;
use std::time::Duration;

use crate::fetcher::{FetcherError, FetcherResult};

/// HTTP connect timeout (seconds) - time to establish TCP connection
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) for aggregate queries and login
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 120;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("loginsight-export/", env!("CARGO_PKG_VERSION"));

fn base_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .redirect(Policy::none())
}

/// Build the pooled HTTP client
///
/// Redirects are not followed: the server answers unauthenticated UI
/// requests with a redirect to its login page, which must surface as an
/// error rather than a successful HTML body.
///
/// `ca_certificate` is a PEM bundle trusted in addition to the system roots.
///
/// # Errors
/// Returns [`FetcherError::Config`] when the certificate cannot be parsed or
/// the TLS backend cannot be initialised.
pub fn build_http_client(
    verify_tls: bool,
    ca_certificate: Option<&[u8]>,
    connect_timeout: Duration,
) -> FetcherResult<Client> {
    let mut builder = base_builder(connect_timeout).danger_accept_invalid_certs(!verify_tls);
    if let Some(pem) = ca_certificate {
        let certificate = Certificate::from_pem(pem)
            .map_err(|e| FetcherError::Config(format!("Invalid CA certificate: {e}")))?;
        builder = builder.add_root_certificate(certificate);
    }

    builder.build().map_err(|e| {
        FetcherError::Config(format!(
            "Failed to build HTTP client: {e}. Check system TLS configuration."
        ))
    })
}

/// DER bytes of the certificate `url` presents, trusted or not
///
/// # Errors
/// [`FetcherError::NetworkError`] when the server cannot be reached, and
/// [`FetcherError::Config`] when the connection carried no certificate
/// (plain `http://`).
pub async fn fetch_server_certificate(url: &str, connect_timeout: Duration) -> FetcherResult<Vec<u8>> {
    let client = base_builder(connect_timeout)
        .danger_accept_invalid_certs(true)
        .tls_info(true)
        .build()
        .map_err(|e| FetcherError::Config(format!("Failed to build HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetcherError::NetworkError(format!("{e:#}")))?;

    response
        .extensions()
        .get::<TlsInfo>()
        .and_then(TlsInfo::peer_certificate)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            FetcherError::Config(format!("{url} presented no certificate; is it an https:// URL?"))
        })
}

/// Whether `err` or one of its sources is a certificate rejection
pub fn is_certificate_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Map a failed connection attempt to a fetcher error
pub fn connect_error(err: reqwest::Error) -> FetcherError {
    let message = format!("{err:#}");
    if is_certificate_error(&err) {
        FetcherError::UntrustedCertificate(message)
    } else {
        FetcherError::NetworkError(message)
    }
}
