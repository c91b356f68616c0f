//! Production adapters over `sift-storage`.

use std::time::Duration;

use serde_json::Value;
use sift_config::EmbeddingProviderConfig;
use sift_storage::{
	cache,
	db::Db,
	qdrant::{IndexedDocument, QdrantStore},
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, CacheStore, Error, IngestDocument, Result, StoredEntry, VectorHit,
	VectorSearchBackend,
};

/// Qdrant search with query embedding through the configured embedding provider.
pub struct QdrantBackend {
	store: QdrantStore,
	embedding: EmbeddingProviderConfig,
}
impl QdrantBackend {
	pub fn new(store: QdrantStore, embedding: EmbeddingProviderConfig) -> Self {
		Self { store, embedding }
	}

	async fn embed(&self, texts: &[String], timeout: Option<Duration>) -> Result<Vec<Vec<f32>>> {
		let mut cfg = self.embedding.clone();

		if let Some(timeout) = timeout {
			cfg.timeout_ms = cfg.timeout_ms.min(timeout.as_millis() as u64).max(1);
		}

		Ok(sift_providers::embedding::embed(&cfg, texts).await?)
	}
}

impl VectorSearchBackend for QdrantBackend {
	fn search<'a>(
		&'a self,
		workspace: &'a str,
		query: &'a str,
		limit: u32,
		timeout: Duration,
	) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
		Box::pin(async move {
			let vector = self
				.embed(&[query.to_string()], Some(timeout))
				.await?
				.into_iter()
				.next()
				.ok_or_else(|| Error::Provider {
					message: "Embedding provider returned no vectors.".to_string(),
				})?;
			let hits = self.store.search(workspace, vector, limit).await?;

			Ok(hits
				.into_iter()
				.map(|hit| VectorHit {
					id: hit.id,
					workspace: workspace.to_string(),
					title: hit.title,
					url: hit.url,
					content: hit.content,
					score: hit.score,
				})
				.collect())
		})
	}

	fn ingest<'a>(
		&'a self,
		workspace: &'a str,
		documents: &'a [IngestDocument],
	) -> BoxFuture<'a, Result<usize>> {
		Box::pin(async move {
			if documents.is_empty() {
				return Ok(0);
			}

			let texts: Vec<String> = documents.iter().map(|doc| doc.content.clone()).collect();
			let vectors = self.embed(&texts, None).await?;
			let indexed = documents
				.iter()
				.zip(vectors)
				.map(|(doc, vector)| IndexedDocument {
					id: content_id(workspace, &doc.content),
					title: doc.title.clone(),
					url: doc.url.clone(),
					content: doc.content.clone(),
					source: doc.source.clone(),
					vector,
				})
				.collect();

			Ok(self.store.upsert(workspace, indexed).await?)
		})
	}
}

/// L2 cache rows in Postgres.
pub struct PgCacheStore {
	db: Db,
}
impl PgCacheStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	pub async fn purge_expired(&self) -> Result<u64> {
		Ok(cache::purge_expired(&self.db.pool, OffsetDateTime::now_utc()).await?)
	}
}

impl CacheStore for PgCacheStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry>>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let Some(row) = cache::fetch(&self.db.pool, key, now).await? else {
				return Ok(None);
			};

			Ok(Some(StoredEntry {
				payload: row.payload,
				ttl_remaining: (row.expires_at - now).max(time::Duration::ZERO).unsigned_abs(),
			}))
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		payload: &'a Value,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();

			cache::store(&self.db.pool, key, payload, now, now + ttl).await?;

			Ok(())
		})
	}
}

// Re-ingesting the same text into a workspace overwrites one point instead of adding another.
fn content_id(workspace: &str, content: &str) -> Uuid {
	let mut hasher = blake3::Hasher::new();

	hasher.update(workspace.as_bytes());
	hasher.update(&[0]);
	hasher.update(content.trim().as_bytes());

	let digest = hasher.finalize();
	let mut bytes = [0_u8; 16];

	bytes.copy_from_slice(&digest.as_bytes()[..16]);

	Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn content_ids_are_stable_per_workspace() {
		let a = content_id("rust-docs", "Tokio retries.");
		let b = content_id("rust-docs", "  Tokio retries.\n");
		let c = content_id("python-docs", "Tokio retries.");

		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
