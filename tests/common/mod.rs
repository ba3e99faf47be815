//! Common utilities for the enrichment integration tests

#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;

use std::collections::HashMap;
use tracksys_enrich::Config;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Environment for a worker pointed at `server`, with the metadata cache on
pub fn test_env(server: &MockServer) -> HashMap<String, String> {
    let uri = server.uri();
    [
        ("IN_QUEUE", "virgo4-ingest-tracksys-enrich".to_string()),
        ("OUT_QUEUE", "virgo4-ingest-solr-update".to_string()),
        ("QUEUE_POLL_TIMEOUT", "1".to_string()),
        ("WORK_QUEUE_SIZE", "10".to_string()),
        ("WORKERS", "1".to_string()),
        ("SERVICE_URL", uri.clone()),
        ("SERVICE_TIMEOUT", "5".to_string()),
        ("MODE", "sirsi".to_string()),
        ("CACHE_AGE", "3600".to_string()),
        ("RIGHTS_URL", format!("{uri}/api/rights")),
        ("CONTENT_CACHE_BUCKET", "virgo4-content".to_string()),
        ("CONTENT_CACHE_ROOT", "https://s3.example.org".to_string()),
        ("OCR_ROOT", "https://ocr.example.org".to_string()),
        ("OEMBED_ROOT", "https://oembed.example.org".to_string()),
        ("REWRITE_FIELDS", "data_source_f_stored=tracksys".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (format!("VIRGO4_TRACKSYS_ENRICH_{k}"), v))
    .chain([(
        "VIRGO4_SQS_MESSAGE_BUCKET".to_string(),
        "virgo4-messages".to_string(),
    )])
    .collect()
}

/// Parse a [`Config`] from a test environment
pub fn config_from(env: &HashMap<String, String>) -> Config {
    Config::from_lookup(|key| env.get(key).cloned()).expect("test configuration is valid")
}

/// Serve a fixed JSON body at `route`
pub async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve a fixed text body at `route`
pub async fn mount_text(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serve a bare status code at `route`
pub async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
