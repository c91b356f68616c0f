use std::{sync::Arc, time::Duration};

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode, header},
};
use serde_json::Value;
use tower::util::ServiceExt;

use sift_api::{routes, state::AppState};
use sift_config::Config;
use sift_service::{DecisionKind, SiftService};
use sift_testkit::{
	FakeCompletion, FakeSearchProvider, FakeVectorBackend, capabilities, test_config, vector_hit,
};

fn app(cfg: Config) -> Router {
	let completion = Arc::new(FakeCompletion::new());
	let vector = Arc::new(FakeVectorBackend::new());
	let provider =
		Arc::new(FakeSearchProvider::new("brave", 0, Duration::from_millis(5), &["Retry guide"]));

	vector.set_hits("rust-docs", vec![vector_hit("rust-docs", "retry", "Use tokio-retry.", 0.9)]);
	completion
		.respond(DecisionKind::AnalyzeQuery, r#"{"suggested_workspaces":["rust-docs"]}"#)
		.respond(DecisionKind::EvaluateRelevance, r#"{"relevance_score":0.9}"#);

	let service = SiftService::new(cfg, capabilities(completion, vector, None, vec![provider]));

	routes::router(AppState::from_service(service))
}

fn search_request(payload: Value, user_id: Option<&str>) -> Request<Body> {
	let mut builder = Request::builder()
		.method("POST")
		.uri("/v1/search")
		.header("content-type", "application/json");

	if let Some(user_id) = user_id {
		builder = builder.header("X-Sift-User-Id", user_id);
	}

	builder.body(Body::from(payload.to_string())).expect("Failed to build request.")
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).expect("Failed to build request.")
}

async fn json_body(response: axum::response::Response) -> Value {
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");

	serde_json::from_slice(&body).expect("Failed to parse response.")
}

#[tokio::test]
async fn health_ok() {
	let response =
		app(test_config()).oneshot(get("/health")).await.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json["status"], "ok");
	assert_eq!(json["admission"]["in_flight"], 0);
}

#[tokio::test]
async fn search_returns_documents_and_metadata() {
	let payload = serde_json::json!({ "query": "How do I retry with tokio?" });
	let response = app(test_config())
		.oneshot(search_request(payload, None))
		.await
		.expect("Failed to call search.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json["response_type"], "raw");
	assert_eq!(json["documents"][0]["title"], "retry");
	assert_eq!(json["documents"][0]["origin"], "vector");
	assert_eq!(
		json["execution_metadata"]["search_path"],
		serde_json::json!(["cache_miss", "vector_search"])
	);
	assert_eq!(json["execution_metadata"]["degraded"], false);
}

#[tokio::test]
async fn blank_query_is_a_bad_request() {
	let response = app(test_config())
		.oneshot(search_request(serde_json::json!({ "query": "   " }), None))
		.await
		.expect("Failed to call search.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let json = json_body(response).await;

	assert_eq!(json["error_code"], "INVALID_QUERY");
	assert!(json["retry_after_ms"].is_null());
}

#[tokio::test]
async fn rate_limited_callers_get_a_retry_hint() {
	let mut cfg = test_config();

	cfg.admission.rate_limit_per_minute = Some(1);

	let app = app(cfg);
	let payload = serde_json::json!({ "query": "tokio retry" });
	let first = app
		.clone()
		.oneshot(search_request(payload.clone(), Some("ada")))
		.await
		.expect("Failed to call search.");

	assert_eq!(first.status(), StatusCode::OK);

	let second = app
		.oneshot(search_request(payload, Some("ada")))
		.await
		.expect("Failed to call search.");

	assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
	assert!(second.headers().contains_key(header::RETRY_AFTER));

	let json = json_body(second).await;

	assert_eq!(json["error_code"], "RATE_LIMIT_EXCEEDED");
	assert!(json["retry_after_ms"].as_u64().is_some_and(|ms| ms > 0));
}

#[tokio::test]
async fn provider_health_lists_each_provider() {
	let response = app(test_config())
		.oneshot(get("/v1/providers/health"))
		.await
		.expect("Failed to call provider health.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json[0]["provider_id"], "brave");
	assert_eq!(json[0]["status"], "healthy");
	assert_eq!(json[0]["circuit"], "closed");
}

#[tokio::test]
async fn cache_stats_reflect_traffic() {
	let app = app(test_config());
	let payload = serde_json::json!({ "query": "tokio retry" });

	for _ in 0..2 {
		let response = app
			.clone()
			.oneshot(search_request(payload.clone(), None))
			.await
			.expect("Failed to call search.");

		assert_eq!(response.status(), StatusCode::OK);
	}

	let json = json_body(
		app.oneshot(get("/v1/cache/stats")).await.expect("Failed to call cache stats."),
	)
	.await;

	assert_eq!(json["misses"], 1);
	assert_eq!(json["l1_hits"], 1);
	assert_eq!(json["l1_entries"], 1);
}
