mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Admission, Cache, CircuitBreaker, Config, Decision, EmbeddingProviderConfig, External,
	ExternalProvider, HealthCheck, LlmProviderConfig, Postgres, Providers, Qdrant, Search, Service,
	Storage, Workspace,
};

use std::{collections::HashSet, fs, path::Path};

pub const SELECTION_STRATEGIES: [&str; 5] =
	["priority", "round_robin", "least_loaded", "fastest", "random"];
pub const PROVIDER_KINDS: [&str; 4] = ["brave", "google", "duckduckgo", "searxng"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.providers.llm.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.llm.api_key must be non-empty.".to_string(),
		});
	}
	if cfg.providers.llm.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.llm.timeout_ms must be greater than zero.".to_string(),
		});
	}

	validate_storage(cfg)?;
	validate_workspaces(cfg)?;
	validate_search(cfg)?;
	validate_cache(cfg)?;

	if cfg.decision.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "decision.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.decision.max_completion_tokens == 0 {
		return Err(Error::Validation {
			message: "decision.max_completion_tokens must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("decision.max_snippets", cfg.decision.max_snippets),
		("decision.max_snippet_chars", cfg.decision.max_snippet_chars),
		("decision.max_prompt_chars", cfg.decision.max_prompt_chars),
		("decision.max_extract_chars", cfg.decision.max_extract_chars),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	validate_external(cfg)?;

	if cfg.admission.max_concurrent == 0 {
		return Err(Error::Validation {
			message: "admission.max_concurrent must be greater than zero.".to_string(),
		});
	}
	if let Some(limit) = cfg.admission.rate_limit_per_minute
		&& limit == 0
	{
		return Err(Error::Validation {
			message: "admission.rate_limit_per_minute must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_storage(cfg: &Config) -> Result<()> {
	if let Some(postgres) = cfg.storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}

	let Some(qdrant) = cfg.storage.qdrant.as_ref() else {
		return Ok(());
	};
	let Some(embedding) = cfg.providers.embedding.as_ref() else {
		return Err(Error::Validation {
			message: "providers.embedding is required when storage.qdrant is set.".to_string(),
		});
	};

	if embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if embedding.dimensions != qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.embedding.api_key must be non-empty.".to_string(),
		});
	}

	Ok(())
}

fn validate_workspaces(cfg: &Config) -> Result<()> {
	let mut seen = HashSet::new();

	for workspace in &cfg.workspaces {
		if workspace.slug.is_empty() {
			return Err(Error::Validation {
				message: "workspaces.slug must be non-empty.".to_string(),
			});
		}
		if !seen.insert(workspace.slug.as_str()) {
			return Err(Error::Validation {
				message: format!("workspaces.slug {} is duplicated.", workspace.slug),
			});
		}
	}

	Ok(())
}

fn validate_search(cfg: &Config) -> Result<()> {
	let search = &cfg.search;

	for (label, value) in [
		("search.max_concurrent_workspaces", search.max_concurrent_workspaces as u64),
		("search.workspace_timeout_ms", search.workspace_timeout_ms),
		("search.per_workspace_limit", search.per_workspace_limit as u64),
		("search.max_results", search.max_results as u64),
		("search.total_timeout_ms", search.total_timeout_ms),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	for (label, value) in [
		("search.relevance_threshold", search.relevance_threshold),
		("search.external_threshold", search.external_threshold),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if search.workspace_timeout_ms >= search.total_timeout_ms {
		return Err(Error::Validation {
			message: "search.workspace_timeout_ms must be less than search.total_timeout_ms."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_cache(cfg: &Config) -> Result<()> {
	let cache = &cfg.cache;

	if !cache.enabled {
		return Ok(());
	}
	if cache.l1_max_entries == 0 {
		return Err(Error::Validation {
			message: "cache.l1_max_entries must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("cache.l2_timeout_ms", cache.l2_timeout_ms),
		("cache.default_ttl_secs", cache.default_ttl_secs),
		("cache.volatile_ttl_secs", cache.volatile_ttl_secs),
		("cache.stable_ttl_secs", cache.stable_ttl_secs),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cache.volatile_ttl_secs > cache.stable_ttl_secs {
		return Err(Error::Validation {
			message: "cache.volatile_ttl_secs must not exceed cache.stable_ttl_secs.".to_string(),
		});
	}
	if let Some(max) = cache.max_payload_bytes
		&& max == 0
	{
		return Err(Error::Validation {
			message: "cache.max_payload_bytes must be greater than zero.".to_string(),
		});
	}

	validate_breaker("cache.breaker", &cache.breaker)
}

fn validate_external(cfg: &Config) -> Result<()> {
	let external = &cfg.external;

	if !SELECTION_STRATEGIES.contains(&external.strategy.as_str()) {
		return Err(Error::Validation {
			message: "external.strategy must be one of priority, round_robin, least_loaded, fastest, or random."
				.to_string(),
		});
	}
	if external.max_providers == 0 {
		return Err(Error::Validation {
			message: "external.max_providers must be greater than zero.".to_string(),
		});
	}
	if external.request_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "external.request_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if external.results_per_provider == 0 {
		return Err(Error::Validation {
			message: "external.results_per_provider must be greater than zero.".to_string(),
		});
	}
	if external.hedge && external.hedge_delay_ms >= external.request_timeout_ms {
		return Err(Error::Validation {
			message: "external.hedge_delay_ms must be less than external.request_timeout_ms."
				.to_string(),
		});
	}

	validate_breaker("external.breaker", &external.breaker)?;

	let health = &external.health;

	if health.interval_ms == 0 || health.timeout_ms == 0 || health.window == 0 {
		return Err(Error::Validation {
			message: "external.health interval_ms, timeout_ms, and window must be greater than zero."
				.to_string(),
		});
	}
	if !(0.0..=1.0).contains(&health.degraded_below)
		|| !(0.0..=1.0).contains(&health.unhealthy_below)
	{
		return Err(Error::Validation {
			message: "external.health thresholds must be in the range 0.0-1.0.".to_string(),
		});
	}
	if health.unhealthy_below > health.degraded_below {
		return Err(Error::Validation {
			message:
				"external.health.unhealthy_below must not exceed external.health.degraded_below."
					.to_string(),
		});
	}

	let mut seen = HashSet::new();

	for provider in &external.providers {
		if provider.provider_id.is_empty() {
			return Err(Error::Validation {
				message: "external.providers.provider_id must be non-empty.".to_string(),
			});
		}
		if !seen.insert(provider.provider_id.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"external.providers.provider_id {} is duplicated.",
					provider.provider_id
				),
			});
		}
		if !PROVIDER_KINDS.contains(&provider.kind.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"external.providers.kind for {} must be one of brave, google, duckduckgo, or searxng.",
					provider.provider_id
				),
			});
		}
		if matches!(provider.kind.as_str(), "brave" | "google") && provider.api_key.is_none() {
			return Err(Error::Validation {
				message: format!("Provider {} api_key must be non-empty.", provider.provider_id),
			});
		}
		if provider.kind == "google" && provider.cx.is_none() {
			return Err(Error::Validation {
				message: format!("Provider {} requires cx.", provider.provider_id),
			});
		}
		if provider.kind == "searxng" && provider.api_base.is_none() {
			return Err(Error::Validation {
				message: format!("Provider {} requires api_base.", provider.provider_id),
			});
		}
		if let Some(timeout) = provider.timeout_ms
			&& timeout == 0
		{
			return Err(Error::Validation {
				message: format!(
					"Provider {} timeout_ms must be greater than zero.",
					provider.provider_id
				),
			});
		}
	}

	if external.enabled && !external.providers.iter().any(|provider| provider.enabled) {
		return Err(Error::Validation {
			message: "external.providers must contain an enabled provider when external.enabled is true."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_breaker(label: &str, breaker: &CircuitBreaker) -> Result<()> {
	if breaker.failure_threshold == 0 {
		return Err(Error::Validation {
			message: format!("{label}.failure_threshold must be greater than zero."),
		});
	}
	if breaker.cooldown_ms == 0 {
		return Err(Error::Validation {
			message: format!("{label}.cooldown_ms must be greater than zero."),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for workspace in &mut cfg.workspaces {
		workspace.slug = workspace.slug.trim().to_string();
		workspace.technologies =
			workspace.technologies.iter().map(|tech| tech.trim().to_lowercase()).collect();

		if workspace.description.as_deref().map(|text| text.trim().is_empty()).unwrap_or(false) {
			workspace.description = None;
		}
	}

	for provider in &mut cfg.external.providers {
		provider.provider_id = provider.provider_id.trim().to_string();
		provider.kind = provider.kind.trim().to_lowercase();

		if provider.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
			provider.api_key = None;
		}
		if provider.api_base.as_deref().map(|base| base.trim().is_empty()).unwrap_or(false) {
			provider.api_base = None;
		}
		if provider.cx.as_deref().map(|cx| cx.trim().is_empty()).unwrap_or(false) {
			provider.cx = None;
		}
	}
}
