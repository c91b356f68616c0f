use reqwest::Client;
use serde_json::Value;

use crate::{
	Result,
	web::{self, WebHit, WebSearchPage},
};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
// Custom Search rejects num > 10.
const MAX_NUM: u32 = 10;

pub async fn search(
	client: &Client,
	cfg: &sift_config::ExternalProvider,
	query: &str,
	count: u32,
) -> Result<WebSearchPage> {
	let api_key = web::required(cfg.api_key.as_ref(), &cfg.provider_id, "api_key")?;
	let cx = web::required(cfg.cx.as_ref(), &cfg.provider_id, "cx")?;
	let base = cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
	let num = count.clamp(1, MAX_NUM).to_string();
	let res = client
		.get(format!("{base}/customsearch/v1"))
		.headers(crate::header_map(&cfg.default_headers)?)
		.query(&[("key", api_key), ("cx", cx), ("q", query), ("num", num.as_str())])
		.send()
		.await?
		.error_for_status()?;
	let rate_limit = web::rate_limit_from_headers(res.headers());
	let json: Value = res.json().await?;

	Ok(WebSearchPage { hits: parse_google_response(&json), rate_limit })
}

fn parse_google_response(json: &Value) -> Vec<WebHit> {
	// No "items" key means zero results, not an error.
	let Some(items) = json.get("items").and_then(|v| v.as_array()) else {
		return Vec::new();
	};

	items
		.iter()
		.filter_map(|item| {
			let url = web::text_field(item, &["link"]);

			if url.is_empty() {
				return None;
			}

			Some(WebHit {
				title: web::text_field(item, &["title"]),
				url,
				snippet: web::text_field(item, &["snippet"]),
				source_type: "web".to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_items() {
		let json = serde_json::json!({
			"items": [
				{ "title": "Tokio", "link": "https://tokio.rs", "snippet": "An async runtime." }
			]
		});
		let hits = parse_google_response(&json);

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].url, "https://tokio.rs");
	}

	#[test]
	fn no_items_means_no_hits() {
		let json = serde_json::json!({ "searchInformation": { "totalResults": "0" } });

		assert!(parse_google_response(&json).is_empty());
	}
}
