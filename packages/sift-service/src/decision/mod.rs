//! LLM-backed decisions.
//!
//! Each decision is a closed, strongly typed handler owning its prompt, its response parser and a
//! deterministic fallback. The runner bounds every call by a timeout and an input budget and never
//! surfaces an error: a failed call yields the fallback, flagged as such.

pub mod analysis;
pub mod diagnostics;
pub mod evaluation;
pub mod external;
pub mod response;

use std::{
	sync::{Arc, LazyLock},
	time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CompletionProvider;

pub use analysis::{AnalyzeQuery, QueryAnalysis, RefineQuery};
pub use diagnostics::{
	AnalyzeFailure, FailureAnalysis, IdentifyLearningOpportunities, LearningOpportunity,
};
pub use evaluation::{Completeness, EvaluateRelevance, EvaluationResult, Recommendation};
pub use external::{
	DecideExternalSearch, ExternalDecision, GenerateProviderQuery, ProviderCandidate,
	SelectProvider,
};
pub use response::{ExtractContent, ExtractedContent, FormattedResponse, SelectResponseFormat};

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("JSON fence pattern must compile.")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
	AnalyzeQuery,
	EvaluateRelevance,
	RefineQuery,
	DecideExternalSearch,
	GenerateProviderQuery,
	ExtractContent,
	SelectResponseFormat,
	IdentifyLearningOpportunities,
	SelectProvider,
	AnalyzeFailure,
}
impl DecisionKind {
	pub const ALL: [Self; 10] = [
		Self::AnalyzeQuery,
		Self::EvaluateRelevance,
		Self::RefineQuery,
		Self::DecideExternalSearch,
		Self::GenerateProviderQuery,
		Self::ExtractContent,
		Self::SelectResponseFormat,
		Self::IdentifyLearningOpportunities,
		Self::SelectProvider,
		Self::AnalyzeFailure,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::AnalyzeQuery => "analyze_query",
			Self::EvaluateRelevance => "evaluate_relevance",
			Self::RefineQuery => "refine_query",
			Self::DecideExternalSearch => "decide_external_search",
			Self::GenerateProviderQuery => "generate_provider_query",
			Self::ExtractContent => "extract_content",
			Self::SelectResponseFormat => "select_response_format",
			Self::IdentifyLearningOpportunities => "identify_learning_opportunities",
			Self::SelectProvider => "select_provider",
			Self::AnalyzeFailure => "analyze_failure",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
	pub kind: DecisionKind,
	pub system: String,
	pub user: String,
}

/// Where a decision's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
	Model,
	/// Decided by a fixed rule without calling the model.
	Rule,
	/// The model call failed, timed out or returned something unusable.
	Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decided<T> {
	pub value: T,
	pub source: DecisionSource,
}
impl<T> Decided<T> {
	pub fn model(value: T) -> Self {
		Self { value, source: DecisionSource::Model }
	}

	pub fn rule(value: T) -> Self {
		Self { value, source: DecisionSource::Rule }
	}

	pub fn fallback(value: T) -> Self {
		Self { value, source: DecisionSource::Fallback }
	}

	pub fn fell_back(&self) -> bool {
		self.source == DecisionSource::Fallback
	}
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBudget {
	pub max_snippets: usize,
	pub max_snippet_chars: usize,
	pub max_prompt_chars: usize,
	pub max_extract_chars: usize,
}
impl PromptBudget {
	/// Numbered snippet block, `[1] title: text`, within the snippet budget.
	pub fn snippets<'a>(&self, items: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
		let mut out = String::new();

		for (index, (title, text)) in items.into_iter().take(self.max_snippets).enumerate() {
			let text = crate::truncate_chars(text.trim(), self.max_snippet_chars);

			out.push_str(&format!("[{}] {}: {}\n", index + 1, title.trim(), text));
		}

		if out.is_empty() {
			out.push_str("(none)\n");
		}

		out
	}
}

/// A typed decision handler.
pub trait Decision {
	type Output;

	const KIND: DecisionKind;

	fn system(&self) -> &'static str;

	fn user(&self, budget: &PromptBudget) -> String;

	fn parse(&self, raw: &str) -> Result<Self::Output, String>;

	fn fallback(&self) -> Self::Output;
}

pub struct DecisionService {
	completion: Arc<dyn CompletionProvider>,
	timeout: Duration,
	max_tokens: u32,
	budget: PromptBudget,
	relevance_threshold: f32,
	external_threshold: f32,
}
impl DecisionService {
	pub fn new(
		completion: Arc<dyn CompletionProvider>,
		cfg: &sift_config::Decision,
		search: &sift_config::Search,
	) -> Self {
		Self {
			completion,
			timeout: Duration::from_millis(cfg.timeout_ms),
			max_tokens: cfg.max_completion_tokens,
			budget: PromptBudget {
				max_snippets: cfg.max_snippets as usize,
				max_snippet_chars: cfg.max_snippet_chars as usize,
				max_prompt_chars: cfg.max_prompt_chars as usize,
				max_extract_chars: cfg.max_extract_chars as usize,
			},
			relevance_threshold: search.relevance_threshold,
			external_threshold: search.external_threshold,
		}
	}

	pub fn budget(&self) -> &PromptBudget {
		&self.budget
	}

	pub fn relevance_threshold(&self) -> f32 {
		self.relevance_threshold
	}

	pub fn external_threshold(&self) -> f32 {
		self.external_threshold
	}

	pub async fn run<D>(&self, decision: &D) -> Decided<D::Output>
	where
		D: Decision + Sync,
		D::Output: Send,
	{
		let prompt = Prompt {
			kind: D::KIND,
			system: decision.system().to_string(),
			user: crate::truncate_chars(&decision.user(&self.budget), self.budget.max_prompt_chars),
		};
		let call = self.completion.complete(&prompt, self.max_tokens, self.timeout);
		let reason = match tokio::time::timeout(self.timeout, call).await {
			Ok(Ok(raw)) => match decision.parse(&raw) {
				Ok(value) => return Decided::model(value),
				Err(reason) => reason,
			},
			Ok(Err(err)) => err.to_string(),
			Err(_) => format!("Timed out after {} ms.", self.timeout.as_millis()),
		};

		tracing::warn!(decision = D::KIND.as_str(), %reason, "Decision fell back to its default.");

		Decided::fallback(decision.fallback())
	}
}

/// Pulls the JSON document out of a completion, tolerating code fences and surrounding prose.
pub(crate) fn parse_json(raw: &str) -> Result<Value, String> {
	let body = JSON_FENCE
		.captures(raw)
		.and_then(|caps| caps.get(1))
		.map(|m| m.as_str())
		.unwrap_or(raw)
		.trim();

	if let Ok(value) = serde_json::from_str(body) {
		return Ok(value);
	}

	let start = body.find(['{', '[']).ok_or_else(|| "Response has no JSON.".to_string())?;
	let end = body.rfind(['}', ']']).ok_or_else(|| "Response has no JSON.".to_string())?;

	if end < start {
		return Err("Response has no JSON.".to_string());
	}

	serde_json::from_str(&body[start..=end])
		.map_err(|err| format!("Response JSON is invalid: {err}"))
}

/// A single query string, given as `{"<key>": ...}`, a bare JSON string or a plain text line.
pub(crate) fn parse_query_text(raw: &str, key: &str) -> Option<String> {
	match parse_json(raw) {
		Ok(Value::String(text)) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
		Ok(json) => json_str(&json, key),
		Err(_) => raw
			.lines()
			.map(|line| line.trim().trim_matches('"').trim())
			.find(|line| !line.is_empty())
			.map(str::to_string),
	}
}

pub(crate) fn json_str(value: &Value, key: &str) -> Option<String> {
	value
		.get(key)
		.and_then(Value::as_str)
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
}

pub(crate) fn json_strings(value: &Value, key: &str) -> Vec<String> {
	value
		.get(key)
		.and_then(Value::as_array)
		.map(|items| {
			items
				.iter()
				.filter_map(Value::as_str)
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default()
}

pub(crate) fn json_score(value: &Value, key: &str) -> Option<f32> {
	let score = value.get(key)?.as_f64()? as f32;

	score.is_finite().then(|| score.clamp(0.0, 1.0))
}
