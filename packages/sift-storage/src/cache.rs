//! Rows of the shared `search_cache` table that backs the L2 cache tier.

use serde_json::Value;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CacheRow {
	pub payload: Value,
	pub expires_at: OffsetDateTime,
	pub hit_count: i64,
}

/// Returns the live row for `key` and bumps its access bookkeeping. Expired rows read as absent.
pub async fn fetch(pool: &PgPool, key: &str, now: OffsetDateTime) -> Result<Option<CacheRow>> {
	let row = sqlx::query(
		"\
UPDATE search_cache
SET last_accessed_at = $2, hit_count = hit_count + 1
WHERE cache_key = $1 AND expires_at > $2
RETURNING payload, expires_at, hit_count",
	)
	.bind(key)
	.bind(now)
	.fetch_optional(pool)
	.await?;
	let Some(row) = row else {
		return Ok(None);
	};

	Ok(Some(CacheRow {
		payload: row.try_get("payload")?,
		expires_at: row.try_get("expires_at")?,
		hit_count: row.try_get("hit_count")?,
	}))
}

/// Upserts `payload` under `key`, resetting the hit count. Returns the encoded payload size.
pub async fn store(
	pool: &PgPool,
	key: &str,
	payload: &Value,
	now: OffsetDateTime,
	expires_at: OffsetDateTime,
) -> Result<usize> {
	if expires_at <= now {
		return Err(Error::InvalidArgument("Cache entry expires before it is written.".to_string()));
	}

	let payload_bytes = serde_json::to_vec(payload)?.len();
	let payload_size = i32::try_from(payload_bytes)
		.map_err(|_| Error::InvalidArgument("Cache payload is too large.".to_string()))?;

	sqlx::query(
		"\
INSERT INTO search_cache
	(cache_key, payload, payload_bytes, created_at, last_accessed_at, expires_at, hit_count)
VALUES ($1, $2, $3, $4, $4, $5, 0)
ON CONFLICT (cache_key) DO UPDATE SET
	payload = EXCLUDED.payload,
	payload_bytes = EXCLUDED.payload_bytes,
	last_accessed_at = EXCLUDED.last_accessed_at,
	expires_at = EXCLUDED.expires_at,
	hit_count = 0",
	)
	.bind(key)
	.bind(payload)
	.bind(payload_size)
	.bind(now)
	.bind(expires_at)
	.execute(pool)
	.await?;

	Ok(payload_bytes)
}

pub async fn purge_expired(pool: &PgPool, now: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query("DELETE FROM search_cache WHERE expires_at <= $1")
		.bind(now)
		.execute(pool)
		.await?;

	Ok(result.rows_affected())
}
