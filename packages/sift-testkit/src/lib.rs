//! In-memory stand-ins for every capability the search service reaches over the network.
//!
//! Each fake is scripted per call site (latency, failure, canned answers) and counts what it saw,
//! so tests can assert on cancellation and fan-out without any external service.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use sift_config::{
	Admission, Cache, Config, Decision, External, LlmProviderConfig, Providers, Search, Service,
	Storage, Workspace,
};
use sift_service::{
	BoxFuture, CacheStore, Capabilities, CompletionProvider, DecisionKind, Error,
	ExternalSearchOptions, ExternalSearchProvider, HealthProbe, IngestDocument, Prompt,
	RateLimitInfo, Result, StoredEntry, VectorHit, VectorSearchBackend, WebResult,
};
use tokio::time::Instant;

/// A config with no stores, three workspaces and external search on. Tests adjust fields in place.
pub fn test_config() -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage::default(),
		providers: Providers {
			embedding: None,
			llm: LlmProviderConfig {
				provider_id: "fake".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/chat/completions".to_string(),
				model: "fake-model".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		workspaces: vec![
			workspace("rust-docs", &["rust"]),
			workspace("python-docs", &["python"]),
			workspace("general", &[]),
		],
		search: Search::default(),
		cache: Cache::default(),
		decision: Decision::default(),
		external: External::default(),
		admission: Admission::default(),
	}
}

pub fn workspace(slug: &str, technologies: &[&str]) -> Workspace {
	Workspace {
		slug: slug.to_string(),
		description: Some(format!("{slug} documentation")),
		technologies: technologies.iter().map(|tech| tech.to_string()).collect(),
	}
}

/// Capabilities built from the given fakes.
pub fn capabilities(
	completion: Arc<FakeCompletion>,
	vector: Arc<FakeVectorBackend>,
	cache_store: Option<Arc<MemoryCacheStore>>,
	external: Vec<Arc<FakeSearchProvider>>,
) -> Capabilities {
	Capabilities {
		completion,
		vector,
		cache_store: cache_store.map(|store| store as Arc<dyn CacheStore>),
		external: external
			.into_iter()
			.map(|provider| provider as Arc<dyn ExternalSearchProvider>)
			.collect(),
	}
}

#[derive(Debug, Clone)]
enum Reply {
	Text(String),
	Fail,
	Slow(Duration, String),
}

/// Completion scripted per decision kind. Unscripted kinds fail, which drives the fallback path.
#[derive(Default)]
pub struct FakeCompletion {
	once: Mutex<HashMap<DecisionKind, VecDeque<Reply>>>,
	always: Mutex<HashMap<DecisionKind, Reply>>,
	prompts: Mutex<Vec<Prompt>>,
}
impl FakeCompletion {
	pub fn new() -> Self {
		Self::default()
	}

	/// Answers every call of `kind` with `text`.
	pub fn respond(&self, kind: DecisionKind, text: impl Into<String>) -> &Self {
		self.always.lock().insert(kind, Reply::Text(text.into()));

		self
	}

	/// Answers the next call of `kind` with `text`, ahead of any standing reply.
	pub fn respond_once(&self, kind: DecisionKind, text: impl Into<String>) -> &Self {
		self.once.lock().entry(kind).or_default().push_back(Reply::Text(text.into()));

		self
	}

	pub fn fail(&self, kind: DecisionKind) -> &Self {
		self.always.lock().insert(kind, Reply::Fail);

		self
	}

	pub fn respond_slowly(
		&self,
		kind: DecisionKind,
		delay: Duration,
		text: impl Into<String>,
	) -> &Self {
		self.always.lock().insert(kind, Reply::Slow(delay, text.into()));

		self
	}

	pub fn calls(&self, kind: DecisionKind) -> usize {
		self.prompts.lock().iter().filter(|prompt| prompt.kind == kind).count()
	}

	pub fn prompts(&self) -> Vec<Prompt> {
		self.prompts.lock().clone()
	}

	fn next_reply(&self, kind: DecisionKind) -> Option<Reply> {
		if let Some(reply) = self.once.lock().get_mut(&kind).and_then(VecDeque::pop_front) {
			return Some(reply);
		}

		self.always.lock().get(&kind).cloned()
	}
}

impl CompletionProvider for FakeCompletion {
	fn complete<'a>(
		&'a self,
		prompt: &'a Prompt,
		_max_tokens: u32,
		_timeout: Duration,
	) -> BoxFuture<'a, Result<String>> {
		self.prompts.lock().push(prompt.clone());

		let reply = self.next_reply(prompt.kind);

		Box::pin(async move {
			match reply {
				Some(Reply::Text(text)) => Ok(text),
				Some(Reply::Slow(delay, text)) => {
					tokio::time::sleep(delay).await;

					Ok(text)
				},
				Some(Reply::Fail) => Err(Error::DecisionService {
					message: format!("Scripted failure for {}.", prompt.kind.as_str()),
				}),
				None => Err(Error::DecisionService {
					message: format!("No scripted reply for {}.", prompt.kind.as_str()),
				}),
			}
		})
	}
}

#[derive(Debug, Clone, Default)]
struct WorkspaceScript {
	hits: Vec<VectorHit>,
	latency: Duration,
	fail: bool,
}

/// Vector index keyed by workspace. Unknown workspaces return no hits.
#[derive(Default)]
pub struct FakeVectorBackend {
	workspaces: Mutex<HashMap<String, WorkspaceScript>>,
	queries: Mutex<Vec<(String, String)>>,
	ingested: Mutex<Vec<(String, IngestDocument)>>,
	fail_ingest: AtomicBool,
}
impl FakeVectorBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_hits(&self, workspace: &str, hits: Vec<VectorHit>) -> &Self {
		self.workspaces.lock().entry(workspace.to_string()).or_default().hits = hits;

		self
	}

	pub fn set_latency(&self, workspace: &str, latency: Duration) -> &Self {
		self.workspaces.lock().entry(workspace.to_string()).or_default().latency = latency;

		self
	}

	pub fn set_failing(&self, workspace: &str) -> &Self {
		self.workspaces.lock().entry(workspace.to_string()).or_default().fail = true;

		self
	}

	pub fn fail_ingest(&self) -> &Self {
		self.fail_ingest.store(true, Ordering::SeqCst);

		self
	}

	/// `(workspace, query)` pairs in call order.
	pub fn queries(&self) -> Vec<(String, String)> {
		self.queries.lock().clone()
	}

	pub fn ingested(&self) -> Vec<(String, IngestDocument)> {
		self.ingested.lock().clone()
	}
}

impl VectorSearchBackend for FakeVectorBackend {
	fn search<'a>(
		&'a self,
		workspace: &'a str,
		query: &'a str,
		limit: u32,
		_timeout: Duration,
	) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
		self.queries.lock().push((workspace.to_string(), query.to_string()));

		let script = self.workspaces.lock().get(workspace).cloned().unwrap_or_default();

		Box::pin(async move {
			if !script.latency.is_zero() {
				tokio::time::sleep(script.latency).await;
			}
			if script.fail {
				return Err(Error::Storage { message: format!("Workspace {workspace} is down.") });
			}

			Ok(script.hits.into_iter().take(limit as usize).collect())
		})
	}

	fn ingest<'a>(
		&'a self,
		workspace: &'a str,
		documents: &'a [IngestDocument],
	) -> BoxFuture<'a, Result<usize>> {
		Box::pin(async move {
			if self.fail_ingest.load(Ordering::SeqCst) {
				return Err(Error::Storage { message: "Ingestion is down.".to_string() });
			}

			let mut ingested = self.ingested.lock();

			for document in documents {
				ingested.push((workspace.to_string(), document.clone()));
			}

			Ok(documents.len())
		})
	}
}

pub fn vector_hit(workspace: &str, title: &str, content: &str, score: f32) -> VectorHit {
	VectorHit {
		id: format!("{workspace}/{title}"),
		workspace: workspace.to_string(),
		title: title.to_string(),
		url: Some(format!("https://docs.example/{workspace}/{title}")),
		content: content.to_string(),
		score,
	}
}

#[derive(Debug, Clone)]
pub enum FakeOutcome {
	Results(Vec<WebResult>),
	Fail,
}

#[derive(Debug, Default)]
struct ProviderCounters {
	calls: AtomicUsize,
	completed: AtomicUsize,
	/// Calls dropped before they finished.
	cancelled: AtomicUsize,
}

pub struct FakeSearchProvider {
	id: String,
	priority: u32,
	latency: Mutex<Duration>,
	outcome: Mutex<FakeOutcome>,
	rate_limit: Mutex<Option<RateLimitInfo>>,
	counters: ProviderCounters,
}
impl FakeSearchProvider {
	/// A provider that answers after `latency` with one result per title.
	pub fn new(id: &str, priority: u32, latency: Duration, titles: &[&str]) -> Self {
		let results = titles.iter().map(|title| web_result(id, title)).collect();

		Self {
			id: id.to_string(),
			priority,
			latency: Mutex::new(latency),
			outcome: Mutex::new(FakeOutcome::Results(results)),
			rate_limit: Mutex::new(None),
			counters: ProviderCounters::default(),
		}
	}

	pub fn failing(id: &str, priority: u32, latency: Duration) -> Self {
		let provider = Self::new(id, priority, latency, &[]);

		provider.set_outcome(FakeOutcome::Fail);

		provider
	}

	pub fn set_outcome(&self, outcome: FakeOutcome) {
		*self.outcome.lock() = outcome;
	}

	pub fn set_latency(&self, latency: Duration) {
		*self.latency.lock() = latency;
	}

	pub fn set_rate_limit(&self, info: RateLimitInfo) {
		*self.rate_limit.lock() = Some(info);
	}

	pub fn calls(&self) -> usize {
		self.counters.calls.load(Ordering::SeqCst)
	}

	pub fn completed(&self) -> usize {
		self.counters.completed.load(Ordering::SeqCst)
	}

	pub fn cancelled(&self) -> usize {
		self.counters.cancelled.load(Ordering::SeqCst)
	}
}

impl ExternalSearchProvider for FakeSearchProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn priority(&self) -> u32 {
		self.priority
	}

	fn search<'a>(
		&'a self,
		_query: &'a str,
		options: ExternalSearchOptions,
	) -> BoxFuture<'a, Result<Vec<WebResult>>> {
		self.counters.calls.fetch_add(1, Ordering::SeqCst);

		let latency = *self.latency.lock();
		let outcome = self.outcome.lock().clone();

		Box::pin(async move {
			let mut guard = CallGuard { counters: &self.counters, finished: false };

			tokio::time::sleep(latency).await;

			guard.finished = true;
			self.counters.completed.fetch_add(1, Ordering::SeqCst);

			match outcome {
				FakeOutcome::Results(results) =>
					Ok(results.into_iter().take(options.max_results as usize).collect()),
				FakeOutcome::Fail => {
					Err(Error::Provider { message: format!("{} is failing.", self.id) })
				},
			}
		})
	}

	fn check_health<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, HealthProbe> {
		let latency = *self.latency.lock();
		let ok = !matches!(*self.outcome.lock(), FakeOutcome::Fail);

		Box::pin(async move {
			let started = Instant::now();

			tokio::time::sleep(latency).await;

			HealthProbe {
				ok,
				latency: started.elapsed(),
				message: (!ok).then(|| "Scripted failure.".to_string()),
			}
		})
	}

	fn rate_limit_info(&self) -> Option<RateLimitInfo> {
		*self.rate_limit.lock()
	}
}

struct CallGuard<'a> {
	counters: &'a ProviderCounters,
	finished: bool,
}
impl Drop for CallGuard<'_> {
	fn drop(&mut self) {
		if !self.finished {
			self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
		}
	}
}

fn web_result(provider_id: &str, title: &str) -> WebResult {
	WebResult {
		title: title.to_string(),
		url: format!("https://{provider_id}.example/{}", title.replace(' ', "-")),
		snippet: format!("{title} from {provider_id}."),
		source_type: "web".to_string(),
		relevance_estimate: 0.8,
		provider_id: provider_id.to_string(),
	}
}

/// L2 store in a map, with a switch to make every call fail.
#[derive(Default)]
pub struct MemoryCacheStore {
	entries: Mutex<HashMap<String, (Value, Instant)>>,
	failing: AtomicBool,
	gets: AtomicUsize,
	sets: AtomicUsize,
}
impl MemoryCacheStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn gets(&self) -> usize {
		self.gets.load(Ordering::SeqCst)
	}

	pub fn sets(&self) -> usize {
		self.sets.load(Ordering::SeqCst)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn check(&self) -> Result<()> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Storage { message: "Cache store is down.".to_string() });
		}

		Ok(())
	}
}

impl CacheStore for MemoryCacheStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry>>> {
		Box::pin(async move {
			self.gets.fetch_add(1, Ordering::SeqCst);
			self.check()?;

			let now = Instant::now();
			let entries = self.entries.lock();

			Ok(entries.get(key).filter(|(_, expires_at)| *expires_at > now).map(
				|(payload, expires_at)| StoredEntry {
					payload: payload.clone(),
					ttl_remaining: *expires_at - now,
				},
			))
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		payload: &'a Value,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.sets.fetch_add(1, Ordering::SeqCst);
			self.check()?;
			self.entries.lock().insert(key.to_string(), (payload.clone(), Instant::now() + ttl));

			Ok(())
		})
	}
}
