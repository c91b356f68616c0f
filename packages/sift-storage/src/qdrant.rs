use std::collections::HashMap;

use qdrant_client::{
	Payload,
	qdrant::{
		Condition, Filter, PointId, PointStruct, Query, QueryPointsBuilder, UpsertPointsBuilder,
		Value, Vector, point_id::PointIdOptions, value::Kind,
	},
};
use uuid::Uuid;

use crate::{Error, Result};

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const WORKSPACE_FIELD: &str = "workspace";

#[derive(Debug, Clone)]
pub struct IndexedHit {
	pub id: String,
	pub score: f32,
	pub title: String,
	pub url: Option<String>,
	pub content: String,
	pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
	pub id: Uuid,
	pub title: String,
	pub url: Option<String>,
	pub content: String,
	pub source: String,
	pub vector: Vec<f32>,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &sift_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Nearest-neighbour search restricted to one workspace partition.
	pub async fn search(
		&self,
		workspace: &str,
		vector: Vec<f32>,
		limit: u32,
	) -> Result<Vec<IndexedHit>> {
		self.check_dim(vector.len())?;

		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.filter(Filter::all([Condition::matches(WORKSPACE_FIELD, workspace.to_string())]))
			.limit(limit as u64)
			.with_payload(true);
		let response = self.client.query(search).await?;

		Ok(response
			.result
			.into_iter()
			.filter_map(|point| {
				let content = payload_string(&point.payload, "content")?;

				Some(IndexedHit {
					id: point.id.as_ref().map(point_id_string).unwrap_or_default(),
					score: point.score,
					title: payload_string(&point.payload, "title").unwrap_or_default(),
					url: payload_string(&point.payload, "url"),
					content,
					source: payload_string(&point.payload, "source"),
				})
			})
			.collect())
	}

	pub async fn upsert(&self, workspace: &str, documents: Vec<IndexedDocument>) -> Result<usize> {
		if documents.is_empty() {
			return Ok(0);
		}

		let mut points = Vec::with_capacity(documents.len());

		for doc in documents {
			self.check_dim(doc.vector.len())?;

			let mut payload = Payload::new();

			payload.insert(WORKSPACE_FIELD, workspace.to_string());
			payload.insert("title", doc.title);
			payload.insert(
				"url",
				doc.url.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
			);
			payload.insert("content", doc.content);
			payload.insert("source", doc.source);

			let mut vectors = HashMap::new();

			vectors.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(doc.vector));
			points.push(PointStruct::new(doc.id.to_string(), vectors, payload));
		}

		let count = points.len();

		self.client
			.upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
			.await?;

		Ok(count)
	}

	fn check_dim(&self, len: usize) -> Result<()> {
		if len != self.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Vector has {len} dimensions, collection expects {}.",
				self.vector_dim
			)));
		}

		Ok(())
	}
}

fn point_id_string(point_id: &PointId) -> String {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => id.clone(),
		Some(PointIdOptions::Num(num)) => num.to_string(),
		None => String::new(),
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) if !text.is_empty() => Some(text.to_string()),
		_ => None,
	}
}
