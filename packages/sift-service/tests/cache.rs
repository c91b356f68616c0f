use std::{sync::Arc, time::Duration};

use sift_domain::breaker::CircuitState;
use sift_service::{CacheManager, CacheStore};
use sift_testkit::MemoryCacheStore;

fn cache_cfg() -> sift_config::Cache {
	let mut cfg = sift_config::Cache::default();

	cfg.breaker.failure_threshold = 3;
	cfg.breaker.cooldown_ms = 30_000;

	cfg
}

fn manager(store: &Arc<MemoryCacheStore>) -> CacheManager<String> {
	CacheManager::new(&cache_cfg(), Some(Arc::clone(store) as Arc<dyn CacheStore>))
}

#[tokio::test(start_paused = true)]
async fn stored_value_is_served_until_its_ttl_expires() {
	let store = Arc::new(MemoryCacheStore::new());
	let writer = manager(&store);

	writer.put("key", &"answer".to_string(), Duration::from_secs(60)).await;

	// A second process shares only the L2 tier.
	let reader = manager(&store);

	assert_eq!(reader.get("key").await.as_deref(), Some("answer"));
	assert_eq!(reader.stats().l2_hits, 1);
	assert_eq!(reader.get("key").await.as_deref(), Some("answer"));
	assert_eq!(reader.stats().l1_hits, 1);

	tokio::time::advance(Duration::from_secs(61)).await;

	assert!(reader.get("key").await.is_none());
	assert!(writer.get("key").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn consecutive_l2_failures_open_the_breaker_for_the_cooldown() {
	let store = Arc::new(MemoryCacheStore::new());
	let cache = manager(&store);

	store.set_failing(true);

	for _ in 0..3 {
		assert!(cache.get("missing").await.is_none());
	}

	assert_eq!(store.gets(), 3);
	assert_eq!(cache.l2_state(), Some(CircuitState::Open));

	assert!(cache.get("missing").await.is_none());
	cache.put("other", &"v".to_string(), Duration::from_secs(60)).await;

	let stats = cache.stats();

	assert_eq!(store.gets(), 3);
	assert_eq!(store.sets(), 0);
	assert_eq!(stats.l2_errors, 3);
	assert_eq!(stats.l2_breaker_skips, 2);
	// L1 still works while L2 is skipped.
	assert_eq!(cache.get("other").await.as_deref(), Some("v"));

	store.set_failing(false);
	tokio::time::advance(Duration::from_secs(30)).await;

	assert!(cache.get("missing").await.is_none());
	assert_eq!(store.gets(), 4);
	assert_eq!(cache.l2_state(), Some(CircuitState::Closed));
}

#[tokio::test]
async fn oversized_payloads_stay_out_of_l2() {
	let store = Arc::new(MemoryCacheStore::new());
	let cfg = sift_config::Cache { max_payload_bytes: Some(16), ..cache_cfg() };
	let cache: CacheManager<String> =
		CacheManager::new(&cfg, Some(Arc::clone(&store) as Arc<dyn CacheStore>));

	cache.put("big", &"x".repeat(64), Duration::from_secs(60)).await;

	assert!(store.is_empty());
	assert_eq!(cache.stats().l2_oversized, 1);
	assert!(cache.get("big").await.is_some());
}
