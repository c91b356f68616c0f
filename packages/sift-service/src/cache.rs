//! Two-tier response cache: an in-process LRU in front of a shared store.
//!
//! The shared tier is optional and never on the error path. Every call to it goes through a
//! circuit breaker and a per-call timeout; failures only count against the breaker.

use std::{
	num::NonZeroUsize,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sift_domain::{
	breaker::{BreakerPolicy, CircuitBreaker, CircuitState, Transition},
	ttl::TtlPolicy,
};
use tokio::time::Instant;

use crate::{BoxFuture, CacheStore, Result};

/// An L2 payload together with the time it has left to live.
#[derive(Debug, Clone)]
pub struct StoredEntry {
	pub payload: Value,
	pub ttl_remaining: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
	pub l1_hits: u64,
	pub l2_hits: u64,
	pub misses: u64,
	pub l2_errors: u64,
	pub l2_breaker_skips: u64,
	pub l2_writes: u64,
	pub l2_oversized: u64,
	pub l1_entries: usize,
	pub l2_circuit: Option<CircuitState>,
}

struct L1Entry<V> {
	value: V,
	expires_at: Instant,
}

#[derive(Default)]
struct Counters {
	l1_hits: AtomicU64,
	l2_hits: AtomicU64,
	misses: AtomicU64,
	l2_errors: AtomicU64,
	l2_breaker_skips: AtomicU64,
	l2_writes: AtomicU64,
	l2_oversized: AtomicU64,
}

pub struct CacheManager<V> {
	enabled: bool,
	l1: Mutex<LruCache<String, L1Entry<V>>>,
	l2: Option<Arc<dyn CacheStore>>,
	l2_timeout: Duration,
	breaker: Mutex<CircuitBreaker>,
	ttl: TtlPolicy,
	max_payload_bytes: Option<u64>,
	counters: Counters,
}
impl<V> CacheManager<V>
where
	V: Clone + Serialize + DeserializeOwned,
{
	pub fn new(cfg: &sift_config::Cache, l2: Option<Arc<dyn CacheStore>>) -> Self {
		let capacity = NonZeroUsize::new(cfg.l1_max_entries as usize).unwrap_or(NonZeroUsize::MIN);
		let policy = BreakerPolicy {
			failure_threshold: cfg.breaker.failure_threshold,
			cooldown: Duration::from_millis(cfg.breaker.cooldown_ms),
		};

		Self {
			enabled: cfg.enabled,
			l1: Mutex::new(LruCache::new(capacity)),
			l2: if cfg.l2_enabled { l2 } else { None },
			l2_timeout: Duration::from_millis(cfg.l2_timeout_ms),
			breaker: Mutex::new(CircuitBreaker::new(policy)),
			ttl: TtlPolicy {
				volatile: Duration::from_secs(cfg.volatile_ttl_secs),
				default: Duration::from_secs(cfg.default_ttl_secs),
				stable: Duration::from_secs(cfg.stable_ttl_secs),
			},
			max_payload_bytes: cfg.max_payload_bytes,
			counters: Counters::default(),
		}
	}

	/// TTL for a response to a query with these tokens.
	pub fn ttl_for(&self, tokens: &[String]) -> Duration {
		self.ttl.resolve(tokens)
	}

	pub async fn get(&self, key: &str) -> Option<V> {
		if !self.enabled {
			return None;
		}
		if let Some(value) = self.l1_get(key) {
			self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);

			return Some(value);
		}

		if let Some(store) = self.l2.as_ref()
			&& let Some(Some(entry)) = self.l2_call("get", key, store.get(key)).await
		{
			match serde_json::from_value::<V>(entry.payload) {
				Ok(value) => {
					self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
					self.l1_put(key, value.clone(), entry.ttl_remaining);

					return Some(value);
				},
				Err(err) => {
					tracing::warn!(
						error = %err,
						cache_key = crate::key_prefix(key),
						"Cached payload decode failed. Treating as miss."
					);
				},
			}
		}

		self.counters.misses.fetch_add(1, Ordering::Relaxed);

		None
	}

	pub async fn put(&self, key: &str, value: &V, ttl: Duration) {
		if !self.enabled || ttl.is_zero() {
			return;
		}

		self.l1_put(key, value.clone(), ttl);

		let Some(store) = self.l2.as_ref() else {
			return;
		};
		let payload = match serde_json::to_value(value) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::warn!(
					error = %err,
					cache_key = crate::key_prefix(key),
					"Cache payload encode failed."
				);

				return;
			},
		};

		if let Some(max) = self.max_payload_bytes {
			let size =
				serde_json::to_vec(&payload).map(|bytes| bytes.len() as u64).unwrap_or(u64::MAX);

			if size > max {
				self.counters.l2_oversized.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(
					cache_key = crate::key_prefix(key),
					size_bytes = size,
					max_bytes = max,
					"Cache payload exceeds the L2 limit. Skipping L2 write."
				);

				return;
			}
		}

		if self.l2_call("set", key, store.set(key, &payload, ttl)).await.is_some() {
			self.counters.l2_writes.fetch_add(1, Ordering::Relaxed);
		}
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
			l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
			misses: self.counters.misses.load(Ordering::Relaxed),
			l2_errors: self.counters.l2_errors.load(Ordering::Relaxed),
			l2_breaker_skips: self.counters.l2_breaker_skips.load(Ordering::Relaxed),
			l2_writes: self.counters.l2_writes.load(Ordering::Relaxed),
			l2_oversized: self.counters.l2_oversized.load(Ordering::Relaxed),
			l1_entries: self.l1.lock().len(),
			l2_circuit: self.l2_state(),
		}
	}

	pub fn l2_state(&self) -> Option<CircuitState> {
		self.l2.as_ref().map(|_| self.breaker.lock().state())
	}

	fn l1_get(&self, key: &str) -> Option<V> {
		let mut l1 = self.l1.lock();

		match l1.get(key) {
			Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
			Some(_) => {},
			None => return None,
		}

		l1.pop(key);

		None
	}

	fn l1_put(&self, key: &str, value: V, ttl: Duration) {
		if ttl.is_zero() {
			return;
		}

		self.l1.lock().put(key.to_string(), L1Entry { value, expires_at: Instant::now() + ttl });
	}

	async fn l2_call<T>(
		&self,
		op: &'static str,
		key: &str,
		call: BoxFuture<'_, Result<T>>,
	) -> Option<T> {
		if !self.breaker.lock().try_acquire(crate::now()) {
			self.counters.l2_breaker_skips.fetch_add(1, Ordering::Relaxed);
			tracing::debug!(
				op,
				cache_key = crate::key_prefix(key),
				"L2 cache circuit is open. Skipping."
			);

			return None;
		}

		let mut guard = ProbeGuard { breaker: &self.breaker, settled: false };

		match tokio::time::timeout(self.l2_timeout, call).await {
			Ok(Ok(value)) => {
				guard.settle(true);

				Some(value)
			},
			Ok(Err(err)) => {
				self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(
					error = %err,
					op,
					cache_key = crate::key_prefix(key),
					"L2 cache call failed."
				);
				guard.settle(false);

				None
			},
			Err(_) => {
				self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(
					op,
					cache_key = crate::key_prefix(key),
					timeout_ms = self.l2_timeout.as_millis() as u64,
					"L2 cache call timed out."
				);
				guard.settle(false);

				None
			},
		}
	}
}

// Frees a half-open probe slot if the caller is dropped mid-call.
struct ProbeGuard<'a> {
	breaker: &'a Mutex<CircuitBreaker>,
	settled: bool,
}
impl ProbeGuard<'_> {
	fn settle(&mut self, success: bool) {
		self.settled = true;

		let transition = {
			let mut breaker = self.breaker.lock();

			if success { breaker.record_success() } else { breaker.record_failure(crate::now()) }
		};

		match transition {
			Transition::Opened => tracing::warn!("L2 cache circuit opened."),
			Transition::Reopened => tracing::warn!("L2 cache probe failed. Circuit re-opened."),
			Transition::Closed => tracing::info!("L2 cache circuit closed."),
			Transition::Unchanged => {},
		}
	}
}

impl Drop for ProbeGuard<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.lock().release_probe();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn manager(l1_max_entries: u32) -> CacheManager<String> {
		let cfg = sift_config::Cache { l1_max_entries, ..Default::default() };

		CacheManager::new(&cfg, None)
	}

	#[tokio::test(start_paused = true)]
	async fn l1_entries_expire_on_read() {
		let cache = manager(8);

		cache.put("k", &"v".to_string(), Duration::from_secs(10)).await;

		assert_eq!(cache.get("k").await.as_deref(), Some("v"));

		tokio::time::advance(Duration::from_secs(11)).await;

		assert!(cache.get("k").await.is_none());
		assert_eq!(cache.stats().l1_entries, 0);
	}

	#[tokio::test]
	async fn l1_evicts_least_recently_used() {
		let cache = manager(2);
		let ttl = Duration::from_secs(60);

		cache.put("a", &"1".to_string(), ttl).await;
		cache.put("b", &"2".to_string(), ttl).await;

		assert!(cache.get("a").await.is_some());

		cache.put("c", &"3".to_string(), ttl).await;

		assert!(cache.get("b").await.is_none());
		assert!(cache.get("a").await.is_some());
		assert!(cache.get("c").await.is_some());
	}

	#[tokio::test]
	async fn disabled_cache_stores_nothing() {
		let cfg = sift_config::Cache { enabled: false, ..Default::default() };
		let cache: CacheManager<String> = CacheManager::new(&cfg, None);

		cache.put("k", &"v".to_string(), Duration::from_secs(60)).await;

		assert!(cache.get("k").await.is_none());
		assert!(cache.l2_state().is_none());
	}

	#[test]
	fn ttl_follows_query_volatility() {
		let cache = manager(8);
		let tokens = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();

		assert_eq!(
			cache.ttl_for(&tokens(&["latest", "tokio", "release"])),
			Duration::from_secs(600)
		);
		assert_eq!(cache.ttl_for(&tokens(&["rust", "syntax"])), Duration::from_secs(86_400));
		assert_eq!(cache.ttl_for(&tokens(&["tokio", "retries"])), Duration::from_secs(3_600));
	}
}
