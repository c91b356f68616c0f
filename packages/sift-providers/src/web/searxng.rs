use reqwest::Client;
use serde_json::Value;

use crate::{
	Result,
	web::{self, WebHit, WebSearchPage},
};

pub async fn search(
	client: &Client,
	cfg: &sift_config::ExternalProvider,
	query: &str,
	count: u32,
) -> Result<WebSearchPage> {
	let base = web::required(cfg.api_base.as_ref(), &cfg.provider_id, "api_base")?;
	let mut request = client
		.get(format!("{}/search", base.trim_end_matches('/')))
		.headers(crate::header_map(&cfg.default_headers)?)
		.query(&[("q", query), ("format", "json")]);

	if let Some(api_key) = cfg.api_key.as_deref() {
		request = request.bearer_auth(api_key);
	}

	let res = request.send().await?.error_for_status()?;
	let rate_limit = web::rate_limit_from_headers(res.headers());
	let json: Value = res.json().await?;
	let mut hits = parse_searxng_response(&json);

	hits.truncate(count.max(1) as usize);

	Ok(WebSearchPage { hits, rate_limit })
}

fn parse_searxng_response(json: &Value) -> Vec<WebHit> {
	let Some(results) = json.get("results").and_then(|v| v.as_array()) else {
		return Vec::new();
	};

	results
		.iter()
		.filter_map(|item| {
			let url = web::text_field(item, &["url"]);

			if url.is_empty() {
				return None;
			}

			let category = web::text_field(item, &["category"]);

			Some(WebHit {
				title: web::text_field(item, &["title"]),
				url,
				snippet: web::text_field(item, &["content"]),
				source_type: if category.is_empty() { "web".to_string() } else { category },
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_results_with_categories() {
		let json = serde_json::json!({
			"results": [
				{ "title": "A", "url": "https://a.example", "content": "alpha", "category": "it" },
				{ "title": "B", "url": "https://b.example", "content": "beta" }
			]
		});
		let hits = parse_searxng_response(&json);

		assert_eq!(hits[0].source_type, "it");
		assert_eq!(hits[1].source_type, "web");
	}
}
