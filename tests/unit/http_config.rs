//! Request construction for the Log Insight HTTP client

use loginsight_export::fetcher::http::{Credentials, LogInsightClient, ServerConfig};
use loginsight_export::OutputFormat;
use std::time::Duration;

fn value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[test]
fn test_base_url_trailing_slash_trimmed() {
    let config = ServerConfig::new("https://li.example.com/");
    assert_eq!(config.base_url, "https://li.example.com");
}

#[test]
fn test_export_query_carries_range_and_format() {
    let config = ServerConfig::new("https://li.example.com");
    let params = config.export_query(1483228800000, 1483228899999, OutputFormat::Raw);

    assert_eq!(value(&params, "paramsHelper.startTimeMillis"), Some("1483228800000"));
    assert_eq!(value(&params, "paramsHelper.endTimeMillis"), Some("1483228899999"));
    assert_eq!(value(&params, "exportHelper.exportFormat"), Some("RAW"));
    assert_eq!(value(&params, "export"), Some("true"));
}

#[test]
fn test_user_params_shared_by_both_queries() {
    let config = ServerConfig::new("https://li.example.com")
        .with_aggregate_param("paramsHelper.query", "error")
        .with_export_param("paramsHelper.query", "error");

    assert_eq!(value(&config.aggregate_query(0, 9), "paramsHelper.query"), Some("error"));
    assert_eq!(
        value(&config.export_query(0, 9, OutputFormat::Json), "paramsHelper.query"),
        Some("error")
    );
}

#[test]
fn test_client_builds_without_network() {
    let config = ServerConfig::new("https://li.example.com")
        .with_verify_tls(false)
        .with_export_timeout(Some(Duration::from_secs(600)))
        .with_credentials(Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
            provider: "DEFAULT".to_string(),
        })
        .with_session("abc");

    let client = LogInsightClient::new(config).unwrap();
    assert_eq!(client.session_id().as_deref(), Some("abc"));
    assert!(!client.config().verify_tls);
    assert_eq!(client.config().export_timeout, Some(Duration::from_secs(600)));
}
