//! Provider selection and hedged, failover-capable external search.

use std::{
	collections::VecDeque,
	future::Future,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use futures::{StreamExt, future, stream::FuturesUnordered};
use tokio::time::Instant;

use crate::{
	Error, ExternalSearchOptions, ExternalSearchProvider, ExternalSearchResults, Result, WebResult,
	decision::ProviderCandidate,
	provider::{
		health::{HealthPolicy, ProviderHealthSnapshot, ProviderHealthStore},
		strategy::{RankInput, SelectionStrategy},
	},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySettings {
	pub strategy: SelectionStrategy,
	pub hedge: bool,
	pub hedge_delay: Duration,
	pub request_timeout: Duration,
	pub results_per_provider: u32,
}
impl RegistrySettings {
	pub fn from_config(cfg: &sift_config::External) -> Self {
		let strategy = SelectionStrategy::parse(&cfg.strategy).unwrap_or_else(|| {
			tracing::warn!(strategy = %cfg.strategy, "Unknown provider strategy. Using priority.");

			SelectionStrategy::Priority
		});

		Self {
			strategy,
			hedge: cfg.hedge,
			hedge_delay: Duration::from_millis(cfg.hedge_delay_ms),
			request_timeout: Duration::from_millis(cfg.request_timeout_ms),
			results_per_provider: cfg.results_per_provider,
		}
	}
}

pub struct ProviderRegistry {
	providers: Vec<Arc<dyn ExternalSearchProvider>>,
	health: Arc<ProviderHealthStore>,
	settings: RegistrySettings,
	cursor: AtomicUsize,
}
impl ProviderRegistry {
	pub fn from_config(
		providers: Vec<Arc<dyn ExternalSearchProvider>>,
		cfg: &sift_config::External,
	) -> Self {
		let ids = providers.iter().map(|provider| provider.id().to_string());
		let health = Arc::new(ProviderHealthStore::new(HealthPolicy::from_config(cfg), ids));

		Self::new(providers, health, RegistrySettings::from_config(cfg))
	}

	pub fn new(
		providers: Vec<Arc<dyn ExternalSearchProvider>>,
		health: Arc<ProviderHealthStore>,
		settings: RegistrySettings,
	) -> Self {
		Self { providers, health, settings, cursor: AtomicUsize::new(0) }
	}

	pub fn is_empty(&self) -> bool {
		self.providers.is_empty()
	}

	pub fn health(&self) -> &Arc<ProviderHealthStore> {
		&self.health
	}

	pub fn health_snapshot(&self) -> Vec<ProviderHealthSnapshot> {
		self.providers.iter().filter_map(|provider| self.health.snapshot(provider.id())).collect()
	}

	/// Providers eligible for selection, best static priority first. Open circuits are left out
	/// unless every circuit is open.
	pub fn candidates(&self) -> Vec<ProviderCandidate> {
		let (eligible, _) = self.eligible(self.by_priority());

		eligible
			.into_iter()
			.map(|index| {
				let provider = &self.providers[index];

				ProviderCandidate {
					id: provider.id().to_string(),
					priority: provider.priority(),
					status: self.health.status(provider.id()),
				}
			})
			.collect()
	}

	/// Runs one active check per provider and records it in the health window.
	pub async fn run_health_checks(&self, timeout: Duration) {
		let checks = self.providers.iter().map(|provider| async move {
			let started = Instant::now();
			let probe = match tokio::time::timeout(timeout, provider.check_health(timeout)).await {
				Ok(probe) => probe,
				Err(_) => crate::HealthProbe {
					ok: false,
					latency: started.elapsed(),
					message: Some("Health check timed out.".to_string()),
				},
			};

			if !probe.ok {
				tracing::debug!(
					provider_id = provider.id(),
					message = probe.message.as_deref().unwrap_or(""),
					"Provider health check failed."
				);
			}

			self.health.record_probe(provider.id(), probe.latency, probe.ok);
			self.health.set_rate_limit(provider.id(), provider.rate_limit_info());
		});

		future::join_all(checks).await;
	}

	/// Searches providers in strategy order. With hedging on, the next candidate starts after
	/// the hedge delay if nothing has finished; a failure starts the next candidate at once. The
	/// first non-empty answer wins and every other attempt is dropped.
	pub async fn search_with_failover(
		&self,
		query: &str,
		max_providers: usize,
		preferred: Option<&str>,
	) -> ExternalSearchResults {
		let mut ranked = self.ranked();

		if let Some(preferred) = preferred
			&& let Some(pos) = ranked.iter().position(|i| self.providers[*i].id() == preferred)
		{
			let index = ranked.remove(pos);

			ranked.insert(0, index);
		}

		let (order, degraded_mode) = self.eligible(ranked);
		let mut queue: VecDeque<usize> = order.into_iter().take(max_providers.max(1)).collect();
		let mut results = ExternalSearchResults { degraded_mode, ..Default::default() };
		let mut in_flight = FuturesUnordered::new();

		loop {
			if in_flight.is_empty() {
				match self.next_attempt(&mut queue, &mut results, degraded_mode) {
					Some((index, acquired)) => in_flight.push(self.attempt(index, query, acquired)),
					None => break,
				}
			}

			let hedge_armed = self.settings.hedge && !queue.is_empty();

			tokio::select! {
				Some((index, outcome)) = in_flight.next() => {
					let provider_id = self.providers[index].id();

					match outcome {
						Ok(hits) if !hits.is_empty() => {
							results.provider_id = Some(provider_id.to_string());
							results.results = hits;

							return results;
						},
						Ok(_) => tracing::info!(
							provider_id,
							"Provider returned no results. Trying the next one."
						),
						Err(err) => {
							tracing::warn!(error = %err, provider_id, "Provider search failed.");
							results.failed.push(provider_id.to_string());
						},
					}

					if let Some((next, acquired)) =
						self.next_attempt(&mut queue, &mut results, degraded_mode)
					{
						in_flight.push(self.attempt(next, query, acquired));
					}
				},
				_ = tokio::time::sleep(self.settings.hedge_delay), if hedge_armed => {
					if let Some((next, acquired)) =
						self.next_attempt(&mut queue, &mut results, degraded_mode)
					{
						tracing::debug!(
							provider_id = self.providers[next].id(),
							hedge_delay_ms = self.settings.hedge_delay.as_millis() as u64,
							"Hedging external search."
						);
						in_flight.push(self.attempt(next, query, acquired));
					}
				},
				else => break,
			}
		}

		if !results.attempted.is_empty() {
			tracing::warn!(
				attempted = ?results.attempted,
				failed = ?results.failed,
				"External search found nothing on any provider."
			);
		}

		results
	}

	fn by_priority(&self) -> Vec<usize> {
		SelectionStrategy::Priority.rank(self.rank_inputs(), 0)
	}

	fn ranked(&self) -> Vec<usize> {
		let rotation = self.cursor.fetch_add(1, Ordering::Relaxed);

		self.settings.strategy.rank(self.rank_inputs(), rotation)
	}

	fn rank_inputs(&self) -> Vec<RankInput> {
		self.providers
			.iter()
			.enumerate()
			.map(|(index, provider)| RankInput {
				index,
				priority: provider.priority(),
				in_flight: self.health.in_flight(provider.id()),
				mean_latency: self.health.mean_latency(provider.id()),
			})
			.collect()
	}

	fn eligible(&self, ranked: Vec<usize>) -> (Vec<usize>, bool) {
		let available: Vec<usize> = ranked
			.iter()
			.copied()
			.filter(|index| self.health.is_available(self.providers[*index].id()))
			.collect();

		if available.is_empty() && !ranked.is_empty() {
			tracing::warn!(
				providers = ranked.len(),
				"Every provider circuit is open. Searching in degraded mode."
			);

			return (ranked, true);
		}

		(available, false)
	}

	fn next_attempt(
		&self,
		queue: &mut VecDeque<usize>,
		results: &mut ExternalSearchResults,
		degraded_mode: bool,
	) -> Option<(usize, bool)> {
		while let Some(index) = queue.pop_front() {
			let provider_id = self.providers[index].id();
			let acquired = self.health.try_acquire(provider_id);

			if !acquired && !degraded_mode {
				tracing::debug!(provider_id, "Provider circuit refused the call. Skipping.");

				continue;
			}

			results.attempted.push(provider_id.to_string());

			return Some((index, acquired));
		}

		None
	}

	// Guarded before the first poll: an attempt dropped unpolled still returns its probe slot.
	fn attempt<'a>(
		&'a self,
		index: usize,
		query: &'a str,
		acquired: bool,
	) -> impl Future<Output = (usize, Result<Vec<WebResult>>)> + Send + 'a {
		let provider = &self.providers[index];
		let provider_id = provider.id();

		self.health.begin_request(provider_id);

		let mut guard =
			AttemptGuard { health: &self.health, provider_id, probe: acquired, settled: false };
		let options = ExternalSearchOptions {
			max_results: self.settings.results_per_provider,
			timeout: self.settings.request_timeout,
		};
		let request_timeout = self.settings.request_timeout;

		async move {
			let started = Instant::now();
			let search = provider.search(query, options);
			let outcome = match tokio::time::timeout(request_timeout, search).await {
				Ok(outcome) => outcome,
				Err(_) => Err(Error::Provider {
					message: format!(
						"{provider_id} timed out after {} ms.",
						request_timeout.as_millis()
					),
				}),
			};

			guard.settle(started.elapsed(), outcome.is_ok());
			self.health.set_rate_limit(provider_id, provider.rate_limit_info());

			(index, outcome)
		}
	}
}

// Keeps the in-flight count and half-open probe slot honest when an attempt is cancelled.
struct AttemptGuard<'a> {
	health: &'a ProviderHealthStore,
	provider_id: &'a str,
	probe: bool,
	settled: bool,
}
impl AttemptGuard<'_> {
	fn settle(&mut self, latency: Duration, success: bool) {
		self.settled = true;
		self.health.record(self.provider_id, latency, success);
	}
}

impl Drop for AttemptGuard<'_> {
	fn drop(&mut self) {
		if !self.settled && self.probe {
			self.health.release_probe(self.provider_id);
		}

		self.health.end_request(self.provider_id);
	}
}
