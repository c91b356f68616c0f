pub mod admission;
pub mod cache;
pub mod decision;
pub mod provider;
pub mod search;
pub mod storage;
pub mod workspace;

mod error;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;

pub use admission::{Admission, AdmissionPermit, AdmissionSnapshot, CallerPriority, RateLimiter};
pub use cache::{CacheManager, CacheStats, StoredEntry};
pub use decision::{Decided, DecisionKind, DecisionService, DecisionSource, Prompt};
pub use error::{Error, Result};
pub use provider::{
	ExternalSearchOptions, ExternalSearchResults, HealthProbe, RateLimitInfo, WebResult,
	health::{HealthStatus, ProviderHealthMonitor, ProviderHealthSnapshot, ProviderHealthStore},
	registry::ProviderRegistry,
	web::WebSearchProvider,
};
pub use search::{
	Citation, DocumentOrigin, ExecutionMetadata, Phase, PhaseTiming, ResponseDocument, ResponseType,
	SearchInput, SearchRequest, SearchResponse, SearchStep, UserContext,
};
pub use storage::{PgCacheStore, QdrantBackend};
pub use workspace::{
	IngestDocument, VectorHit, VectorSearchResults, WorkspaceFailure, WorkspaceSearchCoordinator,
};
use sift_config::{Config, LlmProviderConfig};
use sift_storage::{db::Db, qdrant::QdrantStore};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text completion used by every decision. `timeout` is an upper bound the caller also enforces.
pub trait CompletionProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		prompt: &'a Prompt,
		max_tokens: u32,
		timeout: Duration,
	) -> BoxFuture<'a, Result<String>>;
}

/// Workspace-partitioned document index. Searches must be idempotent.
pub trait VectorSearchBackend
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		workspace: &'a str,
		query: &'a str,
		limit: u32,
		timeout: Duration,
	) -> BoxFuture<'a, Result<Vec<VectorHit>>>;

	fn ingest<'a>(
		&'a self,
		workspace: &'a str,
		documents: &'a [IngestDocument],
	) -> BoxFuture<'a, Result<usize>> {
		let _ = (workspace, documents);

		Box::pin(async { Ok(0) })
	}
}

pub trait ExternalSearchProvider
where
	Self: Send + Sync,
{
	fn id(&self) -> &str;

	/// Lower values rank first.
	fn priority(&self) -> u32;

	fn search<'a>(
		&'a self,
		query: &'a str,
		options: ExternalSearchOptions,
	) -> BoxFuture<'a, Result<Vec<WebResult>>>;

	fn check_health<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, HealthProbe>;

	fn rate_limit_info(&self) -> Option<RateLimitInfo>;
}

/// Shared key-value store behind the L2 cache tier.
pub trait CacheStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry>>>;

	fn set<'a>(
		&'a self,
		key: &'a str,
		payload: &'a Value,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>>;
}

/// Everything the orchestrator reaches over the network.
#[derive(Clone)]
pub struct Capabilities {
	pub completion: Arc<dyn CompletionProvider>,
	pub vector: Arc<dyn VectorSearchBackend>,
	pub cache_store: Option<Arc<dyn CacheStore>>,
	pub external: Vec<Arc<dyn ExternalSearchProvider>>,
}
impl Capabilities {
	/// Builds the production adapters described by `cfg`.
	pub async fn connect(cfg: &Config) -> Result<Self> {
		let (Some(qdrant), Some(embedding)) = (&cfg.storage.qdrant, &cfg.providers.embedding) else {
			return Err(Error::Configuration {
				message: "storage.qdrant and providers.embedding are required for the vector backend."
					.to_string(),
			});
		};
		let vector = QdrantBackend::new(QdrantStore::new(qdrant)?, embedding.clone());
		let cache_store: Option<Arc<dyn CacheStore>> = match &cfg.storage.postgres {
			Some(postgres) if cfg.cache.enabled && cfg.cache.l2_enabled => {
				let db = Db::connect(postgres).await?;

				db.ensure_schema().await?;

				let store = PgCacheStore::new(db);

				match store.purge_expired().await {
					Ok(purged) => tracing::info!(purged, "Purged expired cache rows."),
					Err(err) => tracing::warn!(error = %err, "Purging expired cache rows failed."),
				}

				Some(Arc::new(store))
			},
			_ => None,
		};
		let external = cfg
			.external
			.providers
			.iter()
			.filter(|provider| provider.enabled)
			.map(|provider| {
				let provider = WebSearchProvider::new(provider.clone());

				Arc::new(provider) as Arc<dyn ExternalSearchProvider>
			})
			.collect();

		Ok(Self {
			completion: Arc::new(DefaultCompletion { cfg: cfg.providers.llm.clone() }),
			vector: Arc::new(vector),
			cache_store,
			external,
		})
	}
}

pub struct SiftService {
	pub cfg: Arc<Config>,
	pub cache: CacheManager<SearchResponse>,
	pub coordinator: WorkspaceSearchCoordinator,
	pub decisions: DecisionService,
	pub registry: Arc<ProviderRegistry>,
	pub admission: Admission,
	pub rate_limiter: Option<RateLimiter>,
	pub vector: Arc<dyn VectorSearchBackend>,
}
impl SiftService {
	pub fn new(cfg: Config, capabilities: Capabilities) -> Self {
		let cfg = Arc::new(cfg);
		let cache = CacheManager::new(&cfg.cache, capabilities.cache_store);
		let coordinator = WorkspaceSearchCoordinator::new(capabilities.vector.clone(), &cfg.search);
		let decisions = DecisionService::new(capabilities.completion, &cfg.decision, &cfg.search);
		let registry =
			Arc::new(ProviderRegistry::from_config(capabilities.external, &cfg.external));
		let admission = Admission::new(&cfg.admission);
		let rate_limiter = cfg.admission.rate_limit_per_minute.map(RateLimiter::per_minute);

		Self {
			cfg,
			cache,
			coordinator,
			decisions,
			registry,
			admission,
			rate_limiter,
			vector: capabilities.vector,
		}
	}

	pub async fn connect(cfg: Config) -> Result<Self> {
		let capabilities = Capabilities::connect(&cfg).await?;

		Ok(Self::new(cfg, capabilities))
	}

	pub fn provider_health(&self) -> Vec<ProviderHealthSnapshot> {
		self.registry.health_snapshot()
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Starts periodic provider health checks. Checks stop when the monitor is dropped.
	pub fn spawn_health_monitor(&self) -> Option<ProviderHealthMonitor> {
		if !self.cfg.external.enabled || self.registry.is_empty() {
			return None;
		}

		let health = &self.cfg.external.health;

		Some(ProviderHealthMonitor::spawn(
			self.registry.clone(),
			Duration::from_millis(health.interval_ms),
			Duration::from_millis(health.timeout_ms),
		))
	}
}

struct DefaultCompletion {
	cfg: LlmProviderConfig,
}

impl CompletionProvider for DefaultCompletion {
	fn complete<'a>(
		&'a self,
		prompt: &'a Prompt,
		max_tokens: u32,
		timeout: Duration,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			let mut cfg = self.cfg.clone();

			cfg.timeout_ms = cfg.timeout_ms.min(timeout.as_millis() as u64).max(1);

			let messages = [
				serde_json::json!({ "role": "system", "content": prompt.system }),
				serde_json::json!({ "role": "user", "content": prompt.user }),
			];

			Ok(sift_providers::completion::complete(&cfg, &messages, max_tokens).await?)
		})
	}
}

/// Clock reading shared by breakers and windows. Tokio's clock so paused-time tests drive it.
pub(crate) fn now() -> std::time::Instant {
	tokio::time::Instant::now().into_std()
}

pub(crate) fn key_prefix(key: &str) -> &str {
	key.get(..12).unwrap_or(key)
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((end, _)) => text[..end].to_string(),
		None => text.to_string(),
	}
}
