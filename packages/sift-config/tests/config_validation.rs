use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use sift_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_value() -> Value {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.")
}

fn table_mut<'a>(value: &'a mut Value, path: &[&str]) -> &'a mut toml::Table {
	let mut current = value;

	for key in path {
		current = current
			.as_table_mut()
			.and_then(|table| table.get_mut(*key))
			.unwrap_or_else(|| panic!("Template config must include [{key}]."));
	}

	current.as_table_mut().expect("Template section must be a table.")
}

fn render(value: &Value) -> String {
	toml::to_string(value).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("sift_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> sift_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = sift_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

fn expect_validation(cfg: &Config, needle: &str) {
	let err = sift_config::validate(cfg).expect_err("Expected validation error.");

	assert!(matches!(err, Error::Validation { .. }), "Unexpected error kind: {err:?}");
	assert!(err.to_string().contains(needle), "Unexpected error message: {err}");
}

#[test]
fn sample_config_loads() {
	let cfg = load_payload(render(&sample_value())).expect("Sample config must load.");

	assert_eq!(cfg.workspaces.len(), 3);
	assert_eq!(cfg.external.providers.len(), 2);
	assert_eq!(cfg.admission.rate_limit_per_minute, Some(60));
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
	let mut value = sample_value();
	let root = value.as_table_mut().expect("Template config must be a table.");

	root.remove("search");
	root.remove("decision");

	let cfg = load_payload(render(&value)).expect("Config without optional sections must load.");

	assert_eq!(cfg.search.max_concurrent_workspaces, 5);
	assert_eq!(cfg.search.workspace_timeout_ms, 2_000);
	assert_eq!(cfg.search.max_results, 50);
	assert_eq!(cfg.search.total_timeout_ms, 30_000);
	assert_eq!(cfg.decision.timeout_ms, 5_000);
	assert_eq!(cfg.external.hedge_delay_ms, 200);
}

#[test]
fn blank_provider_key_is_normalized_away() {
	let mut value = sample_value();
	let providers = table_mut(&mut value, &["external"])
		.get_mut("providers")
		.and_then(Value::as_array_mut)
		.expect("Template config must include [[external.providers]].");
	let ddg = providers[1].as_table_mut().expect("Provider must be a table.");

	ddg.insert("api_key".to_string(), Value::String("   ".to_string()));

	let cfg = load_payload(render(&value)).expect("Config must load.");

	assert!(cfg.external.providers[1].api_key.is_none());
}

#[test]
fn brave_provider_requires_api_key() {
	let mut value = sample_value();
	let providers = table_mut(&mut value, &["external"])
		.get_mut("providers")
		.and_then(Value::as_array_mut)
		.expect("Template config must include [[external.providers]].");

	providers[0].as_table_mut().expect("Provider must be a table.").remove("api_key");

	let err = load_payload(render(&value)).expect_err("Expected api_key validation error.");

	assert!(
		err.to_string().contains("Provider brave api_key must be non-empty."),
		"Unexpected error message: {err}"
	);
}

#[test]
fn unknown_strategy_is_rejected() {
	let mut cfg = base_config();

	cfg.external.strategy = "cheapest".to_string();

	expect_validation(&cfg, "external.strategy must be one of");
}

#[test]
fn unknown_provider_kind_is_rejected() {
	let mut cfg = base_config();

	cfg.external.providers[1].kind = "altavista".to_string();

	expect_validation(&cfg, "external.providers.kind for ddg");
}

#[test]
fn duplicate_workspace_slugs_are_rejected() {
	let mut cfg = base_config();

	cfg.workspaces[2].slug = "rust-docs".to_string();

	expect_validation(&cfg, "workspaces.slug rust-docs is duplicated.");
}

#[test]
fn thresholds_must_be_in_unit_range() {
	let mut cfg = base_config();

	cfg.search.relevance_threshold = 1.5;

	expect_validation(&cfg, "search.relevance_threshold must be in the range 0.0-1.0.");
}

#[test]
fn workspace_timeout_must_fit_total_budget() {
	let mut cfg = base_config();

	cfg.search.workspace_timeout_ms = cfg.search.total_timeout_ms;

	expect_validation(&cfg, "search.workspace_timeout_ms must be less than");
}

#[test]
fn embedding_dimensions_must_match_qdrant() {
	let mut cfg = base_config();

	if let Some(embedding) = cfg.providers.embedding.as_mut() {
		embedding.dimensions = 768;
	}

	expect_validation(&cfg, "providers.embedding.dimensions must match storage.qdrant.vector_dim.");
}

#[test]
fn qdrant_requires_embedding_provider() {
	let mut cfg = base_config();

	cfg.providers.embedding = None;

	expect_validation(&cfg, "providers.embedding is required when storage.qdrant is set.");
}

#[test]
fn breaker_threshold_must_be_positive() {
	let mut cfg = base_config();

	cfg.cache.breaker.failure_threshold = 0;

	expect_validation(&cfg, "cache.breaker.failure_threshold must be greater than zero.");
}

#[test]
fn external_enabled_requires_enabled_provider() {
	let mut cfg = base_config();

	for provider in &mut cfg.external.providers {
		provider.enabled = false;
	}

	expect_validation(&cfg, "external.providers must contain an enabled provider");

	cfg.external.enabled = false;

	assert!(sift_config::validate(&cfg).is_ok());
}

#[test]
fn hedge_delay_must_be_below_request_timeout() {
	let mut cfg = base_config();

	cfg.external.hedge_delay_ms = cfg.external.request_timeout_ms;

	expect_validation(&cfg, "external.hedge_delay_ms must be less than");
}

#[test]
fn zero_rate_limit_is_rejected() {
	let mut cfg = base_config();

	cfg.admission.rate_limit_per_minute = Some(0);

	expect_validation(&cfg, "admission.rate_limit_per_minute must be greater than zero.");
}
