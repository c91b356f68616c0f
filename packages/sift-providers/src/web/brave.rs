use reqwest::{Client, header::ACCEPT};
use serde_json::Value;

use crate::{
	Result,
	web::{self, WebHit, WebSearchPage},
};

const DEFAULT_API_BASE: &str = "https://api.search.brave.com";

pub async fn search(
	client: &Client,
	cfg: &sift_config::ExternalProvider,
	query: &str,
	count: u32,
) -> Result<WebSearchPage> {
	let api_key = web::required(cfg.api_key.as_ref(), &cfg.provider_id, "api_key")?;
	let base = cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
	let count = count.clamp(1, 20).to_string();
	let mut headers = crate::header_map(&cfg.default_headers)?;

	headers.insert(ACCEPT, "application/json".parse()?);
	headers.insert("x-subscription-token", api_key.parse()?);

	let res = client
		.get(format!("{base}/res/v1/web/search"))
		.headers(headers)
		.query(&[("q", query), ("count", count.as_str())])
		.send()
		.await?
		.error_for_status()?;
	let rate_limit = web::rate_limit_from_headers(res.headers());
	let json: Value = res.json().await?;

	Ok(WebSearchPage { hits: parse_brave_response(&json), rate_limit })
}

fn parse_brave_response(json: &Value) -> Vec<WebHit> {
	let Some(results) =
		json.get("web").and_then(|web| web.get("results")).and_then(|v| v.as_array())
	else {
		return Vec::new();
	};

	results
		.iter()
		.filter_map(|item| {
			let url = web::text_field(item, &["url"]);

			if url.is_empty() {
				return None;
			}

			Some(WebHit {
				title: web::text_field(item, &["title"]),
				url,
				snippet: web::text_field(item, &["description", "snippet"]),
				source_type: "web".to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_web_results() {
		let json = serde_json::json!({
			"web": {
				"results": [
					{ "title": "Retries", "url": "https://docs.example.com/retries", "description": "Configure retries." },
					{ "title": "No url" }
				]
			}
		});
		let hits = parse_brave_response(&json);

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].snippet, "Configure retries.");
		assert_eq!(hits[0].source_type, "web");
	}

	#[test]
	fn missing_web_section_is_empty() {
		assert!(parse_brave_response(&serde_json::json!({ "type": "search" })).is_empty());
	}
}
