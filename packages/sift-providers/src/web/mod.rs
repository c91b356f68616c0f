//! Web search vendors behind one request/response shape.

pub mod brave;
pub mod duckduckgo;
pub mod google;
pub mod searxng;

use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
	pub title: String,
	pub url: String,
	pub snippet: String,
	/// Vendor-side result category such as "web", "abstract", or "related".
	pub source_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
	pub limit: Option<u64>,
	pub remaining: Option<u64>,
	pub reset_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct WebSearchPage {
	pub hits: Vec<WebHit>,
	pub rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct WebSearchOptions {
	pub count: u32,
	pub timeout: Duration,
}

pub async fn search(
	cfg: &sift_config::ExternalProvider,
	query: &str,
	options: WebSearchOptions,
) -> Result<WebSearchPage> {
	let timeout = cfg.timeout_ms.map(Duration::from_millis).unwrap_or(options.timeout);
	let client = Client::builder().timeout(timeout).build()?;

	match cfg.kind.as_str() {
		"brave" => brave::search(&client, cfg, query, options.count).await,
		"google" => google::search(&client, cfg, query, options.count).await,
		"duckduckgo" => duckduckgo::search(&client, cfg, query, options.count).await,
		"searxng" => searxng::search(&client, cfg, query, options.count).await,
		other => Err(Error::InvalidConfig { message: format!("Unknown provider kind {other}.") }),
	}
}

/// Reads `x-ratelimit-*` headers. Vendors that report several windows ("1, 15000") are read by
/// their first, shortest window.
pub fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
	let read = |name: &str| {
		headers
			.get(name)
			.and_then(|value| value.to_str().ok())
			.and_then(|raw| raw.split(',').next())
			.and_then(|first| first.trim().parse::<u64>().ok())
	};
	let info = RateLimitInfo {
		limit: read("x-ratelimit-limit"),
		remaining: read("x-ratelimit-remaining"),
		reset_secs: read("x-ratelimit-reset"),
	};

	if info == RateLimitInfo::default() { None } else { Some(info) }
}

pub(crate) fn required<'a>(
	value: Option<&'a String>,
	provider_id: &str,
	field: &str,
) -> Result<&'a str> {
	value.map(String::as_str).filter(|value| !value.is_empty()).ok_or_else(|| Error::InvalidConfig {
		message: format!("Provider {provider_id} requires {field}."),
	})
}

pub(crate) fn text_field(item: &serde_json::Value, keys: &[&str]) -> String {
	keys.iter()
		.find_map(|key| item.get(*key).and_then(|v| v.as_str()))
		.unwrap_or_default()
		.trim()
		.to_string()
}

#[cfg(test)]
mod tests {
	use reqwest::header::HeaderValue;

	use super::*;

	#[test]
	fn reads_first_rate_limit_window() {
		let mut headers = HeaderMap::new();

		headers.insert("x-ratelimit-limit", HeaderValue::from_static("1, 15000"));
		headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0, 14321"));
		headers.insert("x-ratelimit-reset", HeaderValue::from_static("1, 1419704"));

		let info = rate_limit_from_headers(&headers).expect("missing rate limit info");

		assert_eq!(info, RateLimitInfo { limit: Some(1), remaining: Some(0), reset_secs: Some(1) });
	}

	#[test]
	fn missing_headers_yield_none() {
		assert!(rate_limit_from_headers(&HeaderMap::new()).is_none());
	}
}
