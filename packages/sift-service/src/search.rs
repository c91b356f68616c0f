//! The search orchestrator.
//!
//! One request runs normalize → cache → workspace selection → vector search → evaluation, then
//! optionally refinement, external search, extraction and ingestion, and finally formatting and
//! cache population. The whole run lives under one deadline; whatever it recorded before the
//! deadline is still returned as a degraded response.

use std::time::Duration;

use futures::future;
use serde::{Deserialize, Serialize};
use sift_domain::query::NormalizedQuery;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
	CallerPriority, Error, IngestDocument, Result, SiftService, VectorHit, VectorSearchResults,
	WebResult,
	decision::{
		Decided, DecisionKind, DecisionSource, ExtractedContent, FailureAnalysis, FormattedResponse,
		LearningOpportunity, Recommendation,
	},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
	#[default]
	Raw,
	Answer,
}
impl ResponseType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Raw => "raw",
			Self::Answer => "answer",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
	pub user_id: Option<String>,
	#[serde(default)]
	pub priority: CallerPriority,
}

/// The inbound search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInput {
	pub query: String,
	#[serde(default)]
	pub response_type: ResponseType,
	pub technology: Option<String>,
	pub max_results: Option<u32>,
	#[serde(default)]
	pub user: UserContext,
	/// Skip the cache lookup. The response is still cached.
	#[serde(default)]
	pub no_cache: bool,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
	pub request_id: Uuid,
	pub query: NormalizedQuery,
	pub response_type: ResponseType,
	pub max_results: usize,
	pub user: UserContext,
	pub no_cache: bool,
	pub created_at: OffsetDateTime,
}
impl SearchRequest {
	pub fn new(query: NormalizedQuery, input: &SearchInput, max_results: usize) -> Self {
		let max_results = input
			.max_results
			.map(|requested| (requested as usize).clamp(1, max_results.max(1)))
			.unwrap_or(max_results);

		Self {
			request_id: Uuid::new_v4(),
			query,
			response_type: input.response_type,
			max_results,
			user: input.user.clone(),
			no_cache: input.no_cache,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	/// Cache key over everything that shapes the response.
	pub fn cache_key(&self) -> String {
		let material = format!(
			"{}|{}|{}|{}",
			self.query.hash,
			self.response_type.as_str(),
			self.max_results,
			self.query.technology.as_deref().unwrap_or("")
		);

		blake3::hash(material.as_bytes()).to_hex().to_string()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStep {
	CacheHit,
	CacheMiss,
	VectorSearch,
	Refine,
	ExternalSearch,
}
impl SearchStep {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::CacheHit => "cache_hit",
			Self::CacheMiss => "cache_miss",
			Self::VectorSearch => "vector_search",
			Self::Refine => "refine",
			Self::ExternalSearch => "external_search",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
	CacheCheck,
	WorkspaceSelection,
	VectorSearch,
	Evaluation,
	Refinement,
	ExternalDecision,
	ProviderSearch,
	ContentExtraction,
	Ingestion,
	Formatting,
}
impl Phase {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::CacheCheck => "cache_check",
			Self::WorkspaceSelection => "workspace_selection",
			Self::VectorSearch => "vector_search",
			Self::Evaluation => "evaluation",
			Self::Refinement => "refinement",
			Self::ExternalDecision => "external_decision",
			Self::ProviderSearch => "provider_search",
			Self::ContentExtraction => "content_extraction",
			Self::Ingestion => "ingestion",
			Self::Formatting => "formatting",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
	pub phase: Phase,
	pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
	Vector,
	External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDocument {
	pub title: String,
	pub url: Option<String>,
	pub content: String,
	pub origin: DocumentOrigin,
	/// Workspace slug or provider id.
	pub source: String,
	pub score: f32,
}
impl ResponseDocument {
	fn from_hit(hit: &VectorHit) -> Self {
		Self {
			title: hit.title.clone(),
			url: hit.url.clone(),
			content: hit.content.clone(),
			origin: DocumentOrigin::Vector,
			source: hit.workspace.clone(),
			score: hit.score,
		}
	}

	fn from_extracted(extracted: &ExtractedContent) -> Self {
		Self {
			title: extracted.title.clone(),
			url: Some(extracted.url.clone()),
			content: extracted.content.clone(),
			origin: DocumentOrigin::External,
			source: extracted.provider_id.clone(),
			score: extracted.relevance,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
	/// 1-based position in `documents`.
	pub index: u32,
	pub title: String,
	pub url: Option<String>,
}
impl Citation {
	pub fn of(position: usize, document: &ResponseDocument) -> Self {
		Self {
			index: position as u32 + 1,
			title: document.title.clone(),
			url: document.url.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
	pub request_id: Uuid,
	pub search_path: Vec<SearchStep>,
	pub timings: Vec<PhaseTiming>,
	pub total_ms: u64,
	pub cached: bool,
	pub workspaces_searched: Vec<String>,
	pub workspaces_failed: Vec<String>,
	pub providers_attempted: Vec<String>,
	pub provider_used: Option<String>,
	pub relevance_score: Option<f32>,
	pub refined_query: Option<String>,
	pub degraded: bool,
	pub failed_phases: Vec<Phase>,
	/// Decisions answered by their deterministic fallback.
	pub decision_fallbacks: Vec<DecisionKind>,
	pub learning_opportunities: Vec<LearningOpportunity>,
	pub documents_ingested: usize,
	pub diagnostics: Option<FailureAnalysis>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
	pub query: String,
	pub response_type: ResponseType,
	pub answer: Option<String>,
	pub documents: Vec<ResponseDocument>,
	pub citations: Vec<Citation>,
	pub execution_metadata: ExecutionMetadata,
}

// Everything a run has learned so far. Survives the run future being dropped at the deadline.
struct Run {
	started: Instant,
	phase: Phase,
	phase_started: Instant,
	documents: Vec<ResponseDocument>,
	metadata: ExecutionMetadata,
}
impl Run {
	fn new(request: &SearchRequest, started: Instant) -> Self {
		Self {
			started,
			phase: Phase::CacheCheck,
			phase_started: Instant::now(),
			documents: Vec::new(),
			metadata: ExecutionMetadata {
				request_id: request.request_id,
				search_path: Vec::new(),
				timings: Vec::new(),
				total_ms: 0,
				cached: false,
				workspaces_searched: Vec::new(),
				workspaces_failed: Vec::new(),
				providers_attempted: Vec::new(),
				provider_used: None,
				relevance_score: None,
				refined_query: None,
				degraded: false,
				failed_phases: Vec::new(),
				decision_fallbacks: Vec::new(),
				learning_opportunities: Vec::new(),
				documents_ingested: 0,
				diagnostics: None,
				created_at: request.created_at,
			},
		}
	}

	fn enter(&mut self, phase: Phase) {
		self.close_phase();

		self.phase = phase;
		self.phase_started = Instant::now();
	}

	fn close_phase(&mut self) {
		let elapsed_ms = self.phase_started.elapsed().as_millis() as u64;

		match self.metadata.timings.last_mut() {
			Some(timing) if timing.phase == self.phase => timing.elapsed_ms += elapsed_ms,
			_ => self.metadata.timings.push(PhaseTiming { phase: self.phase, elapsed_ms }),
		}

		self.phase_started = Instant::now();
	}

	fn step(&mut self, step: SearchStep) {
		self.metadata.search_path.push(step);
	}

	fn fail(&mut self, phase: Phase) {
		self.metadata.degraded = true;

		if !self.metadata.failed_phases.contains(&phase) {
			self.metadata.failed_phases.push(phase);
		}
	}

	fn note<T>(&mut self, kind: DecisionKind, decided: &Decided<T>) {
		if decided.fell_back() && !self.metadata.decision_fallbacks.contains(&kind) {
			self.metadata.decision_fallbacks.push(kind);
		}
	}

	fn record_vector(&mut self, vector: &VectorSearchResults, max_results: usize) {
		self.documents =
			vector.hits.iter().take(max_results).map(ResponseDocument::from_hit).collect();
		self.metadata.workspaces_searched = vector.succeeded.clone();

		for failure in &vector.failed {
			if !self.metadata.workspaces_failed.contains(&failure.workspace) {
				self.metadata.workspaces_failed.push(failure.workspace.clone());
			}
		}

		if vector.partial_failure {
			self.fail(Phase::VectorSearch);
		}
	}

	fn elapsed_ms(&self) -> u64 {
		self.started.elapsed().as_millis() as u64
	}

	fn respond(&mut self, request: &SearchRequest, formatted: FormattedResponse) -> SearchResponse {
		self.close_phase();
		self.metadata.total_ms = self.elapsed_ms();

		SearchResponse {
			query: request.query.original.clone(),
			response_type: formatted.response_type,
			answer: formatted.answer,
			documents: formatted.documents,
			citations: formatted.citations,
			execution_metadata: self.metadata.clone(),
		}
	}
}

impl SiftService {
	pub async fn search(&self, input: SearchInput) -> Result<SearchResponse> {
		let started = Instant::now();
		let query = sift_domain::query::normalize(&input.query)?
			.with_technology(input.technology.as_deref());

		if let (Some(limiter), Some(user_id)) =
			(&self.rate_limiter, input.user.user_id.as_deref())
		{
			limiter.check(user_id, crate::now())?;
		}

		let request = SearchRequest::new(query, &input, self.coordinator.max_results());
		let deadline = started + Duration::from_millis(self.cfg.search.total_timeout_ms);
		let _permit =
			match tokio::time::timeout_at(deadline, self.admission.acquire(request.user.priority))
				.await
			{
				Ok(permit) => permit?,
				Err(_) =>
					return Err(Error::SearchTimeout {
						elapsed_ms: started.elapsed().as_millis() as u64,
					}),
			};
		let mut run = Run::new(&request, started);

		match tokio::time::timeout_at(deadline, self.orchestrate(&request, &mut run)).await {
			Ok(response) => Ok(response),
			Err(_) => self.finish_after_deadline(&request, run),
		}
	}

	async fn orchestrate(&self, request: &SearchRequest, run: &mut Run) -> SearchResponse {
		let key = request.cache_key();
		let query = request.query.cleaned.as_str();

		if !request.no_cache
			&& let Some(cached) = self.cache.get(&key).await
		{
			tracing::debug!(cache_key = crate::key_prefix(&key), "Search cache hit.");
			run.step(SearchStep::CacheHit);
			run.metadata.cached = true;
			run.metadata.relevance_score = cached.execution_metadata.relevance_score;
			run.enter(Phase::Formatting);

			return run.respond(
				request,
				FormattedResponse {
					response_type: cached.response_type,
					answer: cached.answer,
					documents: cached.documents,
					citations: cached.citations,
				},
			);
		}

		run.step(SearchStep::CacheMiss);
		run.enter(Phase::WorkspaceSelection);

		let search_cfg = &self.cfg.search;
		let analysis = self
			.decisions
			.analyze_query(
				&request.query,
				&self.cfg.workspaces,
				search_cfg.max_concurrent_workspaces as usize,
			)
			.await;

		run.note(DecisionKind::AnalyzeQuery, &analysis);

		let workspaces = analysis.value.suggested_workspaces;
		let per_workspace_timeout = Duration::from_millis(search_cfg.workspace_timeout_ms);

		run.enter(Phase::VectorSearch);
		run.step(SearchStep::VectorSearch);

		let mut vector = self.coordinator.search(query, &workspaces, per_workspace_timeout).await;

		run.record_vector(&vector, request.max_results);
		run.enter(Phase::Evaluation);

		let mut current_query = query.to_string();
		let mut evaluation = self.decisions.evaluate_relevance(&current_query, &vector.hits).await;
		let mut refinements = 0;

		run.note(DecisionKind::EvaluateRelevance, &evaluation);

		while evaluation.value.recommendation == Recommendation::Refine
			&& refinements < search_cfg.max_refinements
		{
			refinements += 1;

			run.enter(Phase::Refinement);
			run.step(SearchStep::Refine);

			let refined =
				self.decisions.refine_query(&current_query, &evaluation.value, &vector.hits).await;

			run.note(DecisionKind::RefineQuery, &refined);

			if refined.value.trim().eq_ignore_ascii_case(current_query.trim()) {
				break;
			}

			current_query = refined.value;
			run.metadata.refined_query = Some(current_query.clone());
			run.enter(Phase::VectorSearch);

			let again =
				self.coordinator.search(&current_query, &workspaces, per_workspace_timeout).await;

			vector.absorb(again, self.coordinator.max_results());
			run.record_vector(&vector, request.max_results);
			run.enter(Phase::Evaluation);

			evaluation = self.decisions.evaluate_relevance(&current_query, &vector.hits).await;

			run.note(DecisionKind::EvaluateRelevance, &evaluation);
		}

		run.metadata.relevance_score = Some(evaluation.value.relevance_score);

		if evaluation.value.recommendation != Recommendation::Sufficient
			&& self.cfg.external.enabled
			&& !self.registry.is_empty()
		{
			run.enter(Phase::ExternalDecision);

			let decision = self.decisions.decide_external_search(query, &evaluation.value).await;

			run.note(DecisionKind::DecideExternalSearch, &decision);

			if decision.value.use_external {
				tracing::info!(
					request_id = %request.request_id,
					relevance = evaluation.value.relevance_score,
					reason = %decision.value.reason,
					"Falling back to external search."
				);
				self.external_search(request, run, &workspaces).await;
			}
		}

		run.enter(Phase::Formatting);

		let formatted = self
			.decisions
			.select_response_format(query, request.response_type, run.documents.clone())
			.await;

		run.note(DecisionKind::SelectResponseFormat, &formatted);

		if formatted.value.documents.is_empty() {
			let path: Vec<String> =
				run.metadata.search_path.iter().map(|step| step.as_str().to_string()).collect();
			let diagnosis =
				self.decisions.analyze_failure(query, &run.metadata.failed_phases, &path).await;

			run.note(DecisionKind::AnalyzeFailure, &diagnosis);
			run.metadata.diagnostics = Some(diagnosis.value);
		}

		let response = run.respond(request, formatted.value);

		if !response.execution_metadata.degraded && !response.documents.is_empty() {
			let ttl = self.cache.ttl_for(&request.query.tokens);

			self.cache.put(&key, &response, ttl).await;
		}

		response
	}

	async fn external_search(&self, request: &SearchRequest, run: &mut Run, workspaces: &[String]) {
		let query = request.query.cleaned.as_str();

		run.step(SearchStep::ExternalSearch);
		run.enter(Phase::ProviderSearch);

		let provider_query = self
			.decisions
			.generate_provider_query(query, request.query.technology.as_deref())
			.await;

		run.note(DecisionKind::GenerateProviderQuery, &provider_query);

		let candidates = self.registry.candidates();
		let preferred = self.decisions.select_provider(&provider_query.value, &candidates).await;

		run.note(DecisionKind::SelectProvider, &preferred);

		// Only a model pick overrides the configured strategy order.
		let preferred = match preferred.source {
			DecisionSource::Model => preferred.value,
			DecisionSource::Rule | DecisionSource::Fallback => None,
		};
		let external = self
			.registry
			.search_with_failover(
				&provider_query.value,
				self.cfg.external.max_providers as usize,
				preferred.as_deref(),
			)
			.await;

		run.metadata.providers_attempted = external.attempted.clone();
		run.metadata.provider_used = external.provider_id.clone();

		if external.degraded_mode
			|| (!external.failed.is_empty() && external.provider_id.is_none())
		{
			run.fail(Phase::ProviderSearch);
		}
		if external.results.is_empty() {
			return;
		}

		run.enter(Phase::ContentExtraction);

		let extracted = self.extract_all(query, &external.results).await;
		let mut documents: Vec<ResponseDocument> =
			extracted.iter().map(ResponseDocument::from_extracted).collect();

		documents.append(&mut run.documents);
		documents.truncate(request.max_results);
		run.documents = documents;
		run.enter(Phase::Ingestion);

		let opportunities =
			self.decisions.identify_learning_opportunities(query, &extracted, workspaces).await;

		run.note(DecisionKind::IdentifyLearningOpportunities, &opportunities);

		let target = opportunities
			.value
			.iter()
			.find_map(|opportunity| opportunity.suggested_workspace.clone())
			.or_else(|| workspaces.first().cloned());

		run.metadata.learning_opportunities = opportunities.value;

		if let Some(workspace) = target {
			run.metadata.documents_ingested = self.ingest(&workspace, &extracted).await;
		}
	}

	async fn extract_all(&self, query: &str, results: &[WebResult]) -> Vec<ExtractedContent> {
		let limit = self.cfg.search.max_extractions as usize;
		let extractions =
			results.iter().take(limit).map(|result| self.decisions.extract_content(query, result));

		future::join_all(extractions)
			.await
			.into_iter()
			.map(|decided| decided.value)
			.filter(|extracted| !extracted.content.is_empty())
			.collect()
	}

	// Best effort. The response never depends on ingestion succeeding.
	async fn ingest(&self, workspace: &str, extracted: &[ExtractedContent]) -> usize {
		if extracted.is_empty() {
			return 0;
		}

		let documents: Vec<IngestDocument> = extracted
			.iter()
			.map(|item| IngestDocument {
				title: item.title.clone(),
				url: Some(item.url.clone()),
				content: item.content.clone(),
				source: item.provider_id.clone(),
			})
			.collect();
		let timeout = Duration::from_millis(self.cfg.search.workspace_timeout_ms);

		match tokio::time::timeout(timeout, self.vector.ingest(workspace, &documents)).await {
			Ok(Ok(count)) => {
				tracing::debug!(workspace, count, "Ingested external content.");

				count
			},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, workspace, "Ingesting external content failed.");

				0
			},
			Err(_) => {
				tracing::warn!(workspace, "Ingesting external content timed out.");

				0
			},
		}
	}

	fn finish_after_deadline(
		&self,
		request: &SearchRequest,
		mut run: Run,
	) -> Result<SearchResponse> {
		let elapsed_ms = run.elapsed_ms();
		let phase = run.phase;

		tracing::warn!(
			request_id = %request.request_id,
			phase = phase.as_str(),
			elapsed_ms,
			documents = run.documents.len(),
			"Search deadline reached."
		);

		if run.documents.is_empty() {
			return Err(Error::SearchTimeout { elapsed_ms });
		}

		run.fail(phase);

		let documents = std::mem::take(&mut run.documents);

		Ok(run.respond(request, FormattedResponse::raw(documents)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(raw: &str, response_type: ResponseType, technology: Option<&str>) -> SearchRequest {
		let input = SearchInput {
			query: raw.to_string(),
			response_type,
			technology: technology.map(str::to_string),
			..Default::default()
		};
		let query = sift_domain::query::normalize(raw)
			.expect("query")
			.with_technology(input.technology.as_deref());

		SearchRequest::new(query, &input, 50)
	}

	#[test]
	fn cache_key_ignores_surface_differences() {
		let a = request("Tokio  retry", ResponseType::Raw, None);
		let b = request("tokio retry ", ResponseType::Raw, None);

		assert_eq!(a.cache_key(), b.cache_key());
	}

	#[test]
	fn cache_key_covers_response_shape() {
		let raw = request("tokio retry", ResponseType::Raw, None);
		let answer = request("tokio retry", ResponseType::Answer, None);
		let hinted = request("tokio retry", ResponseType::Raw, Some("python"));

		assert_ne!(raw.cache_key(), answer.cache_key());
		assert_ne!(raw.cache_key(), hinted.cache_key());
	}

	#[test]
	fn max_results_is_clamped_to_the_configured_bound() {
		let input = SearchInput {
			query: "q".to_string(),
			max_results: Some(500),
			..Default::default()
		};
		let query = sift_domain::query::normalize("q").expect("query");

		assert_eq!(SearchRequest::new(query.clone(), &input, 50).max_results, 50);

		let input = SearchInput { max_results: Some(0), ..input };

		assert_eq!(SearchRequest::new(query, &input, 50).max_results, 1);
	}

	#[test]
	fn search_path_serializes_as_snake_case() {
		let path = vec![SearchStep::CacheMiss, SearchStep::ExternalSearch];

		assert_eq!(
			serde_json::to_value(path).expect("json"),
			serde_json::json!(["cache_miss", "external_search"])
		);
	}
}
