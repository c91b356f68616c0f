use sift_domain::query::InvalidQuery;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid query: {0}")]
	InvalidQuery(#[from] InvalidQuery),
	#[error("Search queue is full. Retry after {retry_after_ms} ms.")]
	QueueOverflow { retry_after_ms: u64 },
	#[error("Rate limit exceeded. Retry after {retry_after_ms} ms.")]
	RateLimitExceeded { retry_after_ms: u64 },
	#[error("Search timed out after {elapsed_ms} ms without results.")]
	SearchTimeout { elapsed_ms: u64 },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Decision service error: {message}")]
	DecisionService { message: String },
	#[error("Configuration error: {message}")]
	Configuration { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub fn error_code(&self) -> &'static str {
		match self {
			Self::InvalidQuery(_) => "INVALID_QUERY",
			Self::QueueOverflow { .. } => "QUEUE_OVERFLOW",
			Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
			Self::SearchTimeout { .. } => "SEARCH_TIMEOUT",
			Self::Provider { .. } => "PROVIDER_ERROR",
			Self::DecisionService { .. } => "DECISION_SERVICE_ERROR",
			Self::Configuration { .. } => "CONFIGURATION_ERROR",
			Self::Storage { .. } => "STORAGE_ERROR",
		}
	}

	pub fn retry_after_ms(&self) -> Option<u64> {
		match self {
			Self::QueueOverflow { retry_after_ms } | Self::RateLimitExceeded { retry_after_ms } =>
				Some(*retry_after_ms),
			_ => None,
		}
	}
}

impl From<sift_storage::Error> for Error {
	fn from(err: sift_storage::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<sift_providers::Error> for Error {
	fn from(err: sift_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<sift_config::Error> for Error {
	fn from(err: sift_config::Error) -> Self {
		Self::Configuration { message: err.to_string() }
	}
}
