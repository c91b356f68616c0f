//! External web search: provider adapters, health tracking and hedged failover.

pub mod health;
pub mod registry;
pub mod strategy;
pub mod web;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use sift_providers::web::RateLimitInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
	pub title: String,
	pub url: String,
	pub snippet: String,
	pub source_type: String,
	/// Provider-side rank mapped into [0, 1].
	pub relevance_estimate: f32,
	pub provider_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalSearchOptions {
	pub max_results: u32,
	pub timeout: Duration,
}

/// Outcome of one active health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
	pub ok: bool,
	pub latency: Duration,
	pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalSearchResults {
	pub results: Vec<WebResult>,
	/// The provider whose answer was used.
	pub provider_id: Option<String>,
	/// Providers started, in start order.
	pub attempted: Vec<String>,
	pub failed: Vec<String>,
	/// Every circuit was open and providers were tried anyway.
	pub degraded_mode: bool,
}
