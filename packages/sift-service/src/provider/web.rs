use std::time::Duration;

use parking_lot::Mutex;
use sift_config::ExternalProvider;
use sift_providers::web::{self, WebHit, WebSearchOptions};
use tokio::time::Instant;

use crate::{
	BoxFuture, ExternalSearchOptions, ExternalSearchProvider, HealthProbe, RateLimitInfo, Result,
	WebResult,
};

const HEALTH_QUERY: &str = "rust programming language";

/// A configured web search vendor.
pub struct WebSearchProvider {
	cfg: ExternalProvider,
	rate_limit: Mutex<Option<RateLimitInfo>>,
}
impl WebSearchProvider {
	pub fn new(cfg: ExternalProvider) -> Self {
		Self { cfg, rate_limit: Mutex::new(None) }
	}

	async fn fetch(&self, query: &str, count: u32, timeout: Duration) -> Result<Vec<WebHit>> {
		let page = web::search(&self.cfg, query, WebSearchOptions { count, timeout }).await?;

		if page.rate_limit.is_some() {
			*self.rate_limit.lock() = page.rate_limit;
		}

		Ok(page.hits)
	}
}

impl ExternalSearchProvider for WebSearchProvider {
	fn id(&self) -> &str {
		&self.cfg.provider_id
	}

	fn priority(&self) -> u32 {
		self.cfg.priority
	}

	fn search<'a>(
		&'a self,
		query: &'a str,
		options: ExternalSearchOptions,
	) -> BoxFuture<'a, Result<Vec<WebResult>>> {
		Box::pin(async move {
			let hits = self.fetch(query, options.max_results, options.timeout).await?;

			Ok(to_results(hits, self.id()))
		})
	}

	fn check_health<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, HealthProbe> {
		Box::pin(async move {
			let started = Instant::now();

			match self.fetch(HEALTH_QUERY, 1, timeout).await {
				Ok(_) => HealthProbe { ok: true, latency: started.elapsed(), message: None },
				Err(err) => HealthProbe {
					ok: false,
					latency: started.elapsed(),
					message: Some(err.to_string()),
				},
			}
		})
	}

	fn rate_limit_info(&self) -> Option<RateLimitInfo> {
		*self.rate_limit.lock()
	}
}

// Vendors return results best first; the estimate decays with rank.
fn to_results(hits: Vec<WebHit>, provider_id: &str) -> Vec<WebResult> {
	let total = hits.len().max(1) as f32;

	hits.into_iter()
		.filter(|hit| !hit.url.is_empty())
		.enumerate()
		.map(|(rank, hit)| WebResult {
			title: hit.title,
			url: hit.url,
			snippet: hit.snippet,
			source_type: hit.source_type,
			relevance_estimate: 1.0 - (rank as f32 / total) * 0.5,
			provider_id: provider_id.to_string(),
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hit(url: &str) -> WebHit {
		WebHit {
			title: url.to_string(),
			url: url.to_string(),
			snippet: String::new(),
			source_type: "web".to_string(),
		}
	}

	#[test]
	fn relevance_decays_with_rank() {
		let results = to_results(vec![hit("https://a"), hit(""), hit("https://b")], "brave");

		assert_eq!(results.len(), 2);
		assert_eq!(results[0].relevance_estimate, 1.0);
		assert!(results[1].relevance_estimate < results[0].relevance_estimate);
		assert!(results.iter().all(|result| result.provider_id == "brave"));
	}
}
