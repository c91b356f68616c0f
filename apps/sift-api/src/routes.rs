use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, HeaderValue, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;
use sift_service::{
	AdmissionSnapshot, CacheStats, Error, ProviderHealthSnapshot, SearchInput, SearchResponse,
};

use crate::state::AppState;

const HEADER_USER_ID: &str = "x-sift-user-id";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/search", post(search))
		.route("/v1/providers/health", get(provider_health))
		.route("/v1/cache/stats", get(cache_stats))
		.with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthBody {
	status: &'static str,
	version: &'static str,
	admission: AdmissionSnapshot,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
	Json(HealthBody {
		status: "ok",
		version: sift_cli::VERSION,
		admission: state.service.admission.snapshot(),
	})
}

async fn search(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(mut payload): Json<SearchInput>,
) -> Result<Json<SearchResponse>, ApiError> {
	if let Some(user_id) = user_id_header(&headers) {
		payload.user.user_id = Some(user_id);
	}

	let response = state.service.search(payload).await?;

	Ok(Json(response))
}

async fn provider_health(State(state): State<AppState>) -> Json<Vec<ProviderHealthSnapshot>> {
	Json(state.service.provider_health())
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
	Json(state.service.cache_stats())
}

fn user_id_header(headers: &HeaderMap) -> Option<String> {
	let raw = headers.get(HEADER_USER_ID)?.to_str().ok()?.trim();

	(!raw.is_empty()).then(|| raw.to_string())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: &'static str,
	message: String,
	retry_after_ms: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
	retry_after_ms: Option<u64>,
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let status = match &err {
			Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
			Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
			Error::QueueOverflow { .. } => StatusCode::SERVICE_UNAVAILABLE,
			Error::SearchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};

		if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
			tracing::error!(error = %err, error_code = err.error_code(), "Search request failed.");
		}

		Self {
			status,
			error_code: err.error_code(),
			message: err.to_string(),
			retry_after_ms: err.retry_after_ms(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let retry_after = self
			.retry_after_ms
			.map(|ms| ms.div_ceil(1_000).max(1))
			.and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok());
		let body = ErrorBody {
			error_code: self.error_code,
			message: self.message,
			retry_after_ms: self.retry_after_ms,
		};
		let mut response = (self.status, Json(body)).into_response();

		if let Some(value) = retry_after {
			response.headers_mut().insert(header::RETRY_AFTER, value);
		}

		response
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn queue_overflow_is_retryable() {
		let response =
			ApiError::from(Error::QueueOverflow { retry_after_ms: 1_500 }).into_response();

		assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(response.headers()[header::RETRY_AFTER], "2");
	}

	#[test]
	fn timeouts_map_to_gateway_timeout() {
		let response = ApiError::from(Error::SearchTimeout { elapsed_ms: 30_000 }).into_response();

		assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
		assert!(response.headers().get(header::RETRY_AFTER).is_none());
	}

	#[test]
	fn storage_errors_are_internal() {
		let err = ApiError::from(Error::Storage { message: "down".to_string() });

		assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(err.error_code, "STORAGE_ERROR");
	}

	#[test]
	fn blank_user_header_is_ignored() {
		let mut headers = HeaderMap::new();

		headers.insert(HEADER_USER_ID, HeaderValue::from_static("  "));

		assert_eq!(user_id_header(&headers), None);

		headers.insert(HEADER_USER_ID, HeaderValue::from_static("ada"));

		assert_eq!(user_id_header(&headers).as_deref(), Some("ada"));
	}
}
