//! LogInsightClient against a scripted local HTTP server

use futures_util::TryStreamExt;
use loginsight_export::fetcher::http::{Credentials, LogInsightClient, ServerConfig};
use loginsight_export::fetcher::{AggregateCounter, EventDownloader, FetcherError};
use loginsight_export::{Bin, OutputFormat};
use tokio::net::TcpListener;

use super::scripted_server::{serve, Canned, CHART};

#[tokio::test]
async fn test_aggregate_query() {
    let (base, seen) = serve(vec![Canned::ok(CHART)]).await;
    let client = LogInsightClient::new(ServerConfig::new(base)).unwrap();

    let bins = client.query(0, 999).await.unwrap();
    assert_eq!(bins, vec![Bin::new(0, 499, 7), Bin::new(500, 999, 3)]);

    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("GET /logcharting?"));
    assert!(requests[0].contains("paramsHelper.startTimeMillis=0"));
    assert!(requests[0].contains("paramsHelper.endTimeMillis=999"));
}

#[tokio::test]
async fn test_login_then_replay() {
    let (base, seen) = serve(vec![
        Canned::status("401 Unauthorized"),
        Canned::ok(r#"{"userId":"u","sessionId":"fresh-session","ttl":1800}"#),
        Canned::ok(CHART),
    ])
    .await;
    let config = ServerConfig::new(base).with_credentials(Credentials {
        username: "admin".to_string(),
        password: "secret".to_string(),
        provider: "DEFAULT".to_string(),
    });
    let client = LogInsightClient::new(config).unwrap();

    let bins = client.query(0, 999).await.unwrap();
    assert_eq!(bins.len(), 2);
    assert_eq!(client.session_id().as_deref(), Some("fresh-session"));

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].starts_with("POST /api/v1/sessions"));
    assert!(requests[1].contains(r#""provider":"DEFAULT""#));
    assert!(requests[2].to_ascii_lowercase().contains("authorization: bearer fresh-session"));
}

#[tokio::test]
async fn test_unauthorized_without_credentials() {
    let (base, _) = serve(vec![Canned::status("401 Unauthorized")]).await;
    let client = LogInsightClient::new(ServerConfig::new(base)).unwrap();
    assert!(matches!(
        client.query(0, 999).await,
        Err(FetcherError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let (base, seen) = serve(vec![Canned::status("404 Not Found")]).await;
    let client = LogInsightClient::new(ServerConfig::new(base)).unwrap();
    assert!(matches!(
        client.query(0, 999).await,
        Err(FetcherError::HttpError(_))
    ));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_export_streams_body() {
    let body = r#"{"from":0,"to":1,"hasMoreResults":false,"messages":[{"text":"x","timestamp":5}]}"#;
    let (base, seen) = serve(vec![Canned::ok(body)]).await;
    let client = LogInsightClient::new(ServerConfig::new(base)).unwrap();

    let stream = client.fetch(0, 9, OutputFormat::Json).await.unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), body.as_bytes());

    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("GET /messages?"));
    assert!(requests[0].contains("exportHelper.exportFormat=JSON"));
}

#[tokio::test]
async fn test_server_version_after_ping() {
    let (base, seen) = serve(vec![
        Canned {
            status: "302 Found",
            headers: vec![("Location", "/login")],
            body: String::new(),
        },
        Canned::ok(r#"{"releaseName":"GA","version":"8.1.0-12345"}"#),
    ])
    .await;
    let client = LogInsightClient::new(ServerConfig::new(base)).unwrap();

    assert_eq!(client.server_version().await.unwrap(), "8.1.0-12345");

    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("GET / "));
    assert!(requests[1].starts_with("GET /api/v1/version"));
}

#[tokio::test]
async fn test_server_version_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = LogInsightClient::new(ServerConfig::new(format!("http://{addr}"))).unwrap();
    assert!(matches!(
        client.server_version().await,
        Err(FetcherError::NetworkError(_))
    ));
}
