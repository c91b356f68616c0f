//! Per-provider health: circuit breaker, rolling latency/success window, in-flight count.

use std::{
	collections::{HashMap, VecDeque},
	sync::Arc,
	time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sift_domain::breaker::{BreakerPolicy, CircuitBreaker, CircuitState, Transition};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{RateLimitInfo, provider::registry::ProviderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	Healthy,
	Degraded,
	Unhealthy,
}
impl HealthStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Healthy => "healthy",
			Self::Degraded => "degraded",
			Self::Unhealthy => "unhealthy",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
	pub breaker: BreakerPolicy,
	pub window: usize,
	pub degraded_below: f32,
	pub unhealthy_below: f32,
}
impl HealthPolicy {
	pub fn from_config(cfg: &sift_config::External) -> Self {
		Self {
			breaker: BreakerPolicy {
				failure_threshold: cfg.breaker.failure_threshold,
				cooldown: Duration::from_millis(cfg.breaker.cooldown_ms),
			},
			window: cfg.health.window.max(1) as usize,
			degraded_below: cfg.health.degraded_below,
			unhealthy_below: cfg.health.unhealthy_below,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthSnapshot {
	pub provider_id: String,
	pub status: HealthStatus,
	pub circuit: CircuitState,
	pub consecutive_failures: u32,
	pub samples: usize,
	pub success_rate: Option<f32>,
	pub mean_latency_ms: Option<u64>,
	pub p95_latency_ms: Option<u64>,
	pub in_flight: usize,
	pub last_checked: Option<String>,
	pub rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
	latency: Duration,
	success: bool,
}

struct ProviderHealth {
	status: HealthStatus,
	breaker: CircuitBreaker,
	window: VecDeque<Sample>,
	in_flight: usize,
	last_checked: Option<OffsetDateTime>,
	rate_limit: Option<RateLimitInfo>,
}
impl ProviderHealth {
	fn push(&mut self, sample: Sample, capacity: usize) {
		if self.window.len() == capacity {
			self.window.pop_front();
		}

		self.window.push_back(sample);
	}

	fn success_rate(&self) -> Option<f32> {
		if self.window.is_empty() {
			return None;
		}

		let ok = self.window.iter().filter(|sample| sample.success).count();

		Some(ok as f32 / self.window.len() as f32)
	}

	fn mean_latency(&self) -> Option<Duration> {
		let n = self.window.len() as u32;

		if n == 0 {
			return None;
		}

		Some(self.window.iter().map(|sample| sample.latency).sum::<Duration>() / n)
	}

	fn p95_latency(&self) -> Option<Duration> {
		let mut latencies: Vec<Duration> =
			self.window.iter().map(|sample| sample.latency).collect();

		if latencies.is_empty() {
			return None;
		}

		latencies.sort_unstable();

		let rank = ((latencies.len() as f64) * 0.95).ceil() as usize;

		latencies.get(rank.saturating_sub(1)).copied()
	}
}

/// Shared health state for a fixed set of providers, one mutex per provider.
pub struct ProviderHealthStore {
	policy: HealthPolicy,
	providers: HashMap<String, Mutex<ProviderHealth>>,
}
impl ProviderHealthStore {
	pub fn new(policy: HealthPolicy, provider_ids: impl IntoIterator<Item = String>) -> Self {
		let providers = provider_ids
			.into_iter()
			.map(|id| {
				let health = ProviderHealth {
					status: HealthStatus::Healthy,
					breaker: CircuitBreaker::new(policy.breaker),
					window: VecDeque::with_capacity(policy.window),
					in_flight: 0,
					last_checked: None,
					rate_limit: None,
				};

				(id, Mutex::new(health))
			})
			.collect();

		Self { policy, providers }
	}

	/// Claims a call slot from the provider's breaker, including the single half-open probe.
	pub fn try_acquire(&self, provider_id: &str) -> bool {
		self.with(provider_id, |health| health.breaker.try_acquire(crate::now())).unwrap_or(false)
	}

	pub fn is_available(&self, provider_id: &str) -> bool {
		self.with(provider_id, |health| health.breaker.is_available(crate::now())).unwrap_or(false)
	}

	pub fn circuit(&self, provider_id: &str) -> Option<CircuitState> {
		self.with(provider_id, |health| health.breaker.state())
	}

	/// Effective status: an open circuit reads as unhealthy regardless of the window.
	pub fn status(&self, provider_id: &str) -> HealthStatus {
		self.with(provider_id, |health| match health.breaker.state() {
			CircuitState::Open => HealthStatus::Unhealthy,
			_ => health.status,
		})
		.unwrap_or(HealthStatus::Unhealthy)
	}

	/// Records a search outcome. Drives both the breaker and the rolling window.
	pub fn record(&self, provider_id: &str, latency: Duration, success: bool) {
		let Some(entry) = self.providers.get(provider_id) else {
			return;
		};
		let mut health = entry.lock();
		let transition = if success {
			health.breaker.record_success()
		} else {
			health.breaker.record_failure(crate::now())
		};

		match transition {
			Transition::Opened => tracing::warn!(
				provider_id,
				consecutive_failures = health.breaker.consecutive_failures(),
				"Provider circuit opened."
			),
			Transition::Reopened =>
				tracing::warn!(provider_id, "Provider probe failed. Circuit re-opened."),
			Transition::Closed => tracing::info!(provider_id, "Provider circuit closed."),
			Transition::Unchanged => {},
		}

		health.push(Sample { latency, success }, self.policy.window);
		self.refresh_status(provider_id, &mut health);
	}

	/// Records an active health check. Only the window and status move; the breaker follows
	/// traffic.
	pub fn record_probe(&self, provider_id: &str, latency: Duration, success: bool) {
		let Some(entry) = self.providers.get(provider_id) else {
			return;
		};
		let mut health = entry.lock();

		health.push(Sample { latency, success }, self.policy.window);
		health.last_checked = Some(OffsetDateTime::now_utc());
		self.refresh_status(provider_id, &mut health);
	}

	pub fn release_probe(&self, provider_id: &str) {
		self.with(provider_id, |health| health.breaker.release_probe());
	}

	pub fn begin_request(&self, provider_id: &str) {
		self.with(provider_id, |health| health.in_flight += 1);
	}

	pub fn end_request(&self, provider_id: &str) {
		self.with(provider_id, |health| health.in_flight = health.in_flight.saturating_sub(1));
	}

	pub fn in_flight(&self, provider_id: &str) -> usize {
		self.with(provider_id, |health| health.in_flight).unwrap_or(0)
	}

	pub fn mean_latency(&self, provider_id: &str) -> Option<Duration> {
		self.with(provider_id, |health| health.mean_latency()).flatten()
	}

	pub fn set_rate_limit(&self, provider_id: &str, info: Option<RateLimitInfo>) {
		if info.is_some() {
			self.with(provider_id, |health| health.rate_limit = info);
		}
	}

	pub fn snapshot(&self, provider_id: &str) -> Option<ProviderHealthSnapshot> {
		let entry = self.providers.get(provider_id)?;
		let health = entry.lock();
		let status = match health.breaker.state() {
			CircuitState::Open => HealthStatus::Unhealthy,
			_ => health.status,
		};

		Some(ProviderHealthSnapshot {
			provider_id: provider_id.to_string(),
			status,
			circuit: health.breaker.state(),
			consecutive_failures: health.breaker.consecutive_failures(),
			samples: health.window.len(),
			success_rate: health.success_rate(),
			mean_latency_ms: health.mean_latency().map(|d| d.as_millis() as u64),
			p95_latency_ms: health.p95_latency().map(|d| d.as_millis() as u64),
			in_flight: health.in_flight,
			last_checked: health.last_checked.and_then(|at| at.format(&Rfc3339).ok()),
			rate_limit: health.rate_limit,
		})
	}

	fn with<T>(&self, provider_id: &str, f: impl FnOnce(&mut ProviderHealth) -> T) -> Option<T> {
		self.providers.get(provider_id).map(|entry| f(&mut entry.lock()))
	}

	fn refresh_status(&self, provider_id: &str, health: &mut ProviderHealth) {
		let next = match health.success_rate() {
			Some(rate) if rate < self.policy.unhealthy_below => HealthStatus::Unhealthy,
			Some(rate) if rate < self.policy.degraded_below => HealthStatus::Degraded,
			_ => HealthStatus::Healthy,
		};

		if next != health.status {
			tracing::info!(
				provider_id,
				from = health.status.as_str(),
				to = next.as_str(),
				success_rate = health.success_rate().unwrap_or(1.0),
				"Provider health status changed."
			);

			health.status = next;
		}
	}
}

/// Background health checks on a fixed interval. Checks stop when this is dropped.
pub struct ProviderHealthMonitor {
	handle: tokio::task::JoinHandle<()>,
}
impl ProviderHealthMonitor {
	pub fn spawn(registry: Arc<ProviderRegistry>, interval: Duration, timeout: Duration) -> Self {
		let handle = tokio::spawn(async move {
			loop {
				registry.run_health_checks(timeout).await;
				tokio::time::sleep(interval).await;
			}
		});

		Self { handle }
	}
}

impl Drop for ProviderHealthMonitor {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store(threshold: u32) -> ProviderHealthStore {
		let policy = HealthPolicy {
			breaker: BreakerPolicy {
				failure_threshold: threshold,
				cooldown: Duration::from_secs(300),
			},
			window: 10,
			degraded_below: 0.95,
			unhealthy_below: 0.8,
		};

		ProviderHealthStore::new(policy, ["brave".to_string()])
	}

	#[test]
	fn status_follows_window_success_rate() {
		let store = store(100);

		for _ in 0..9 {
			store.record_probe("brave", Duration::from_millis(10), true);
		}

		assert_eq!(store.status("brave"), HealthStatus::Healthy);

		store.record_probe("brave", Duration::from_millis(10), false);

		assert_eq!(store.status("brave"), HealthStatus::Degraded);

		store.record_probe("brave", Duration::from_millis(10), false);
		store.record_probe("brave", Duration::from_millis(10), false);

		assert_eq!(store.status("brave"), HealthStatus::Unhealthy);
	}

	#[test]
	fn window_is_bounded() {
		let store = store(100);

		for _ in 0..25 {
			store.record_probe("brave", Duration::from_millis(10), false);
		}

		assert_eq!(store.snapshot("brave").expect("snapshot").samples, 10);
	}

	#[tokio::test(start_paused = true)]
	async fn request_failures_open_the_circuit() {
		let store = store(2);

		store.record("brave", Duration::from_millis(5), false);

		assert!(store.is_available("brave"));

		store.record("brave", Duration::from_millis(5), false);

		assert!(!store.is_available("brave"));
		assert_eq!(store.circuit("brave"), Some(CircuitState::Open));
		assert_eq!(store.status("brave"), HealthStatus::Unhealthy);

		tokio::time::advance(Duration::from_secs(300)).await;

		assert!(store.try_acquire("brave"));
		assert_eq!(store.circuit("brave"), Some(CircuitState::HalfOpen));
	}

	#[test]
	fn reports_mean_and_p95_latency() {
		let store = store(100);

		for ms in 1..=20 {
			store.record_probe("brave", Duration::from_millis(ms * 10), true);
		}

		let snapshot = store.snapshot("brave").expect("snapshot");

		// Window holds 110..=200 ms.
		assert_eq!(snapshot.mean_latency_ms, Some(155));
		assert_eq!(snapshot.p95_latency_ms, Some(200));
		assert!(snapshot.last_checked.is_some());
	}

	#[test]
	fn unknown_providers_are_unavailable() {
		let store = store(1);

		assert!(!store.try_acquire("bing"));
		assert!(store.snapshot("bing").is_none());
	}
}
