use reqwest::Client;
use serde_json::Value;

use crate::{
	Result,
	web::{self, WebHit, WebSearchPage},
};

const DEFAULT_API_BASE: &str = "https://api.duckduckgo.com";

/// Queries the keyless Instant Answer API. It returns an abstract plus related topics rather than a
/// ranked result list, so hits are assembled from those sections.
pub async fn search(
	client: &Client,
	cfg: &sift_config::ExternalProvider,
	query: &str,
	count: u32,
) -> Result<WebSearchPage> {
	let base = cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
	let res = client
		.get(format!("{base}/"))
		.headers(crate::header_map(&cfg.default_headers)?)
		.query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
		.send()
		.await?
		.error_for_status()?;
	let json: Value = res.json().await?;
	let mut hits = parse_instant_answer(&json);

	hits.truncate(count.max(1) as usize);

	Ok(WebSearchPage { hits, rate_limit: None })
}

fn parse_instant_answer(json: &Value) -> Vec<WebHit> {
	let mut hits = Vec::new();
	let abstract_url = web::text_field(json, &["AbstractURL"]);
	let abstract_text = web::text_field(json, &["AbstractText"]);

	if !abstract_url.is_empty() && !abstract_text.is_empty() {
		hits.push(WebHit {
			title: web::text_field(json, &["Heading"]),
			url: abstract_url,
			snippet: abstract_text,
			source_type: "abstract".to_string(),
		});
	}

	for key in ["Results", "RelatedTopics"] {
		if let Some(topics) = json.get(key).and_then(|v| v.as_array()) {
			collect_topics(topics, &mut hits);
		}
	}

	hits
}

fn collect_topics(topics: &[Value], hits: &mut Vec<WebHit>) {
	for topic in topics {
		// Category groups nest their own topic lists.
		if let Some(nested) = topic.get("Topics").and_then(|v| v.as_array()) {
			collect_topics(nested, hits);

			continue;
		}

		let url = web::text_field(topic, &["FirstURL"]);
		let text = web::text_field(topic, &["Text"]);

		if url.is_empty() || text.is_empty() {
			continue;
		}

		let title = text.split(" - ").next().unwrap_or(text.as_str()).to_string();

		hits.push(WebHit { title, url, snippet: text, source_type: "related".to_string() });
	}
}
