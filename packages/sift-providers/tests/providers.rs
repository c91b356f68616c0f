use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

use sift_providers::web::{self, WebSearchOptions};

fn provider(kind: &str) -> sift_config::ExternalProvider {
	sift_config::ExternalProvider {
		provider_id: format!("{kind}-test"),
		kind: kind.to_string(),
		api_base: None,
		api_key: None,
		cx: None,
		priority: 0,
		enabled: true,
		timeout_ms: Some(500),
		default_headers: Map::new(),
	}
}

fn options() -> WebSearchOptions {
	WebSearchOptions { count: 5, timeout: Duration::from_secs(1) }
}

#[test]
fn builds_bearer_auth_header() {
	let headers =
		sift_providers::auth_headers("secret", &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn rejects_non_string_default_headers() {
	let mut defaults = Map::new();

	defaults.insert("x-retries".to_string(), Value::from(3));

	let err = sift_providers::header_map(&defaults).expect_err("Expected header error.");

	assert!(err.to_string().contains("must be strings"), "Unexpected error: {err}");
}

#[tokio::test]
async fn brave_without_api_key_fails_before_sending() {
	let err = web::search(&provider("brave"), "tokio retries", options())
		.await
		.expect_err("Expected config error.");

	assert_eq!(err.to_string(), "Provider brave-test requires api_key.");
}

#[tokio::test]
async fn google_requires_engine_id() {
	let mut cfg = provider("google");

	cfg.api_key = Some("key".to_string());

	let err =
		web::search(&cfg, "tokio retries", options()).await.expect_err("Expected config error.");

	assert_eq!(err.to_string(), "Provider google-test requires cx.");
}

#[tokio::test]
async fn searxng_requires_instance_url() {
	let err = web::search(&provider("searxng"), "tokio retries", options())
		.await
		.expect_err("Expected config error.");

	assert_eq!(err.to_string(), "Provider searxng-test requires api_base.");
}

#[tokio::test]
async fn unknown_kind_is_a_config_error() {
	let err = web::search(&provider("altavista"), "tokio retries", options())
		.await
		.expect_err("Expected config error.");

	assert!(matches!(err, sift_providers::Error::InvalidConfig { .. }));
}
