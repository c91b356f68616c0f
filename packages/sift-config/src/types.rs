use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	#[serde(default)]
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub workspaces: Vec<Workspace>,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub decision: Decision,
	#[serde(default)]
	pub external: External,
	#[serde(default)]
	pub admission: Admission,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

/// Both stores are optional. Without them the caller must inject an L2 store and a vector backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
	pub postgres: Option<Postgres>,
	pub qdrant: Option<Qdrant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: Option<EmbeddingProviderConfig>,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// A logically partitioned slice of the vector index.
#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
	pub slug: String,
	#[serde(default)]
	pub description: Option<String>,
	/// Lower-case technology names routed to this workspace first, e.g. "rust" or "kubernetes".
	#[serde(default)]
	pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Search {
	pub max_concurrent_workspaces: u32,
	pub workspace_timeout_ms: u64,
	pub per_workspace_limit: u32,
	pub max_results: u32,
	pub total_timeout_ms: u64,
	/// Evaluation score at or above which vector results are considered sufficient.
	pub relevance_threshold: f32,
	/// Evaluation score below which the heuristic fallback goes to external search.
	pub external_threshold: f32,
	pub max_refinements: u32,
	pub max_extractions: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			max_concurrent_workspaces: 5,
			workspace_timeout_ms: 2_000,
			per_workspace_limit: 20,
			max_results: 50,
			total_timeout_ms: 30_000,
			relevance_threshold: 0.7,
			external_threshold: 0.4,
			max_refinements: 1,
			max_extractions: 5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreaker {
	pub failure_threshold: u32,
	pub cooldown_ms: u64,
}
impl Default for CircuitBreaker {
	fn default() -> Self {
		Self { failure_threshold: 5, cooldown_ms: 300_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub l1_max_entries: u32,
	pub l2_enabled: bool,
	pub l2_timeout_ms: u64,
	pub default_ttl_secs: u64,
	pub volatile_ttl_secs: u64,
	pub stable_ttl_secs: u64,
	pub max_payload_bytes: Option<u64>,
	pub breaker: CircuitBreaker,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			enabled: true,
			l1_max_entries: 1_024,
			l2_enabled: true,
			l2_timeout_ms: 250,
			default_ttl_secs: 3_600,
			volatile_ttl_secs: 600,
			stable_ttl_secs: 86_400,
			max_payload_bytes: Some(262_144),
			breaker: CircuitBreaker { failure_threshold: 3, cooldown_ms: 30_000 },
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Decision {
	pub timeout_ms: u64,
	pub max_completion_tokens: u32,
	pub max_snippets: u32,
	pub max_snippet_chars: u32,
	pub max_prompt_chars: u32,
	pub max_extract_chars: u32,
}
impl Default for Decision {
	fn default() -> Self {
		Self {
			timeout_ms: 5_000,
			max_completion_tokens: 1_024,
			max_snippets: 10,
			max_snippet_chars: 500,
			max_prompt_chars: 12_000,
			max_extract_chars: 4_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct External {
	pub enabled: bool,
	/// One of priority, round_robin, least_loaded, fastest, or random.
	pub strategy: String,
	pub hedge: bool,
	pub hedge_delay_ms: u64,
	pub max_providers: u32,
	pub request_timeout_ms: u64,
	pub results_per_provider: u32,
	pub breaker: CircuitBreaker,
	pub health: HealthCheck,
	pub providers: Vec<ExternalProvider>,
}
impl Default for External {
	fn default() -> Self {
		Self {
			enabled: true,
			strategy: "priority".to_string(),
			hedge: true,
			hedge_delay_ms: 200,
			max_providers: 2,
			request_timeout_ms: 8_000,
			results_per_provider: 8,
			breaker: CircuitBreaker::default(),
			health: HealthCheck::default(),
			providers: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
	pub interval_ms: u64,
	pub timeout_ms: u64,
	pub window: u32,
	pub degraded_below: f32,
	pub unhealthy_below: f32,
}
impl Default for HealthCheck {
	fn default() -> Self {
		Self {
			interval_ms: 60_000,
			timeout_ms: 5_000,
			window: 100,
			degraded_below: 0.95,
			unhealthy_below: 0.80,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalProvider {
	pub provider_id: String,
	/// One of brave, google, duckduckgo, or searxng.
	pub kind: String,
	pub api_base: Option<String>,
	pub api_key: Option<String>,
	/// Google programmable search engine id.
	pub cx: Option<String>,
	/// Lower values are tried first under the priority strategy.
	#[serde(default)]
	pub priority: u32,
	#[serde(default = "default_true")]
	pub enabled: bool,
	pub timeout_ms: Option<u64>,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Admission {
	pub max_concurrent: u32,
	pub max_queue_depth: u32,
	pub queue_retry_after_ms: u64,
	pub rate_limit_per_minute: Option<u32>,
}
impl Default for Admission {
	fn default() -> Self {
		Self {
			max_concurrent: 10,
			max_queue_depth: 100,
			queue_retry_after_ms: 1_000,
			rate_limit_per_minute: None,
		}
	}
}

fn default_true() -> bool {
	true
}
