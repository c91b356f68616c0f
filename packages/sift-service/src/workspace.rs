//! Parallel, timeout-bounded fan-out over workspace partitions of the vector index.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::{StreamExt, stream::FuturesUnordered};
use serde::{Deserialize, Serialize};

use crate::VectorSearchBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
	pub id: String,
	pub workspace: String,
	pub title: String,
	pub url: Option<String>,
	pub content: String,
	pub score: f32,
}

/// Extracted external content handed back to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestDocument {
	pub title: String,
	pub url: Option<String>,
	pub content: String,
	pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFailure {
	pub workspace: String,
	pub timed_out: bool,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResults {
	pub hits: Vec<VectorHit>,
	pub succeeded: Vec<String>,
	pub failed: Vec<WorkspaceFailure>,
	pub partial_failure: bool,
}
impl VectorSearchResults {
	pub fn is_empty(&self) -> bool {
		self.hits.is_empty()
	}

	/// Folds a follow-up search in: newer hits first, then older ones not already present.
	pub fn absorb(&mut self, newer: VectorSearchResults, max_results: usize) {
		let older = std::mem::take(&mut self.hits);
		let mut seen = HashSet::new();

		self.hits = newer
			.hits
			.into_iter()
			.chain(older)
			.filter(|hit| seen.insert(content_hash(&hit.content)))
			.take(max_results)
			.collect();

		for workspace in newer.succeeded {
			if !self.succeeded.contains(&workspace) {
				self.succeeded.push(workspace);
			}
		}

		self.failed.extend(newer.failed);
		self.partial_failure |= newer.partial_failure;
	}
}

pub struct WorkspaceSearchCoordinator {
	backend: Arc<dyn VectorSearchBackend>,
	max_concurrent: usize,
	per_workspace_limit: u32,
	max_results: usize,
}
impl WorkspaceSearchCoordinator {
	pub fn new(backend: Arc<dyn VectorSearchBackend>, cfg: &sift_config::Search) -> Self {
		Self {
			backend,
			max_concurrent: cfg.max_concurrent_workspaces.max(1) as usize,
			per_workspace_limit: cfg.per_workspace_limit,
			max_results: cfg.max_results as usize,
		}
	}

	pub fn max_results(&self) -> usize {
		self.max_results
	}

	/// Searches each workspace concurrently. A branch that errors or outlives
	/// `per_workspace_timeout` is dropped and reported in `failed`; this never fails as a whole.
	pub async fn search(
		&self,
		query: &str,
		workspace_ids: &[String],
		per_workspace_timeout: Duration,
	) -> VectorSearchResults {
		let mut selected: Vec<&str> = Vec::new();

		for id in workspace_ids {
			if !selected.contains(&id.as_str()) {
				selected.push(id.as_str());
			}
		}

		if selected.len() > self.max_concurrent {
			tracing::warn!(
				requested = selected.len(),
				max = self.max_concurrent,
				dropped = ?&selected[self.max_concurrent..],
				"Too many workspaces selected. Dropping the extra ones."
			);
			selected.truncate(self.max_concurrent);
		}

		let mut branches: FuturesUnordered<_> = selected
			.iter()
			.enumerate()
			.map(|(index, workspace)| async move {
				let outcome = tokio::time::timeout(
					per_workspace_timeout,
					self.backend.search(
						workspace,
						query,
						self.per_workspace_limit,
						per_workspace_timeout,
					),
				)
				.await;

				(index, outcome)
			})
			.collect();
		let mut per_workspace: Vec<Option<Vec<VectorHit>>> = vec![None; selected.len()];
		let mut failed = Vec::new();

		while let Some((index, outcome)) = branches.next().await {
			let workspace = selected[index];

			match outcome {
				Ok(Ok(mut hits)) => {
					for hit in &mut hits {
						if hit.workspace.is_empty() {
							hit.workspace = workspace.to_string();
						}
					}

					per_workspace[index] = Some(hits);
				},
				Ok(Err(err)) => {
					tracing::warn!(error = %err, workspace, "Workspace search failed.");
					failed.push(WorkspaceFailure {
						workspace: workspace.to_string(),
						timed_out: false,
						message: err.to_string(),
					});
				},
				Err(_) => {
					tracing::warn!(
						workspace,
						timeout_ms = per_workspace_timeout.as_millis() as u64,
						"Workspace search timed out."
					);
					failed.push(WorkspaceFailure {
						workspace: workspace.to_string(),
						timed_out: true,
						message: "Timed out.".to_string(),
					});
				},
			}
		}

		let succeeded = selected
			.iter()
			.zip(&per_workspace)
			.filter(|(_, hits)| hits.is_some())
			.map(|(workspace, _)| workspace.to_string())
			.collect();
		let hits = interleave(per_workspace.into_iter().flatten().collect(), self.max_results);

		VectorSearchResults { hits, succeeded, partial_failure: !failed.is_empty(), failed }
	}
}

// Round-robin across workspaces keeps each backend's own ranking and gives every workspace a
// share of the truncated list.
fn interleave(lists: Vec<Vec<VectorHit>>, max_results: usize) -> Vec<VectorHit> {
	let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	while out.len() < max_results {
		let mut progressed = false;

		for iter in &mut iters {
			let Some(hit) = iter.next() else {
				continue;
			};

			progressed = true;

			if seen.insert(content_hash(&hit.content)) {
				out.push(hit);

				if out.len() == max_results {
					break;
				}
			}
		}

		if !progressed {
			break;
		}
	}

	out
}

pub(crate) fn content_hash(content: &str) -> blake3::Hash {
	let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

	blake3::hash(normalized.as_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hit(workspace: &str, content: &str) -> VectorHit {
		VectorHit {
			id: format!("{workspace}:{content}"),
			workspace: workspace.to_string(),
			title: content.to_string(),
			url: None,
			content: content.to_string(),
			score: 0.5,
		}
	}

	#[test]
	fn interleaves_and_dedupes_by_content() {
		let lists = vec![
			vec![hit("a", "one"), hit("a", "two"), hit("a", "three")],
			vec![hit("b", "One "), hit("b", "four")],
		];
		let merged = interleave(lists, 10);
		let contents: Vec<&str> = merged.iter().map(|hit| hit.content.as_str()).collect();

		assert_eq!(contents, vec!["one", "two", "four", "three"]);
	}

	#[test]
	fn interleave_truncates() {
		let lists = vec![vec![hit("a", "1"), hit("a", "2")], vec![hit("b", "3"), hit("b", "4")]];

		assert_eq!(interleave(lists, 3).len(), 3);
	}

	#[test]
	fn absorb_puts_newer_hits_first() {
		let mut current = VectorSearchResults {
			hits: vec![hit("a", "old"), hit("a", "shared")],
			succeeded: vec!["a".to_string()],
			..Default::default()
		};
		let newer = VectorSearchResults {
			hits: vec![hit("b", "shared"), hit("b", "new")],
			succeeded: vec!["b".to_string()],
			..Default::default()
		};

		current.absorb(newer, 10);

		let contents: Vec<&str> = current.hits.iter().map(|hit| hit.content.as_str()).collect();

		assert_eq!(contents, vec!["shared", "new", "old"]);
		assert_eq!(current.succeeded, vec!["a".to_string(), "b".to_string()]);
	}
}
