use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	decision::{
		Decided, Decision, DecisionKind, DecisionService, EvaluationResult, PromptBudget, json_str,
		parse_json, parse_query_text,
	},
	provider::health::HealthStatus,
};

const DECIDE_SYSTEM: &str = "\
You decide whether internal documentation search results should be supplemented with a public \
web search. Reply with one JSON object: {\"use_external\": bool, \"reason\": string}.";
const PROVIDER_QUERY_SYSTEM: &str = "\
You turn a documentation question into a concise web search query: keywords, product names, \
versions. No quotes or operators. Reply with one JSON object: {\"query\": string}.";
const SELECT_SYSTEM: &str = "\
You pick the web search provider best suited for a query. Only choose from the listed ids. Reply \
with one JSON object: {\"provider_id\": string}.";
const MAX_PROVIDER_QUERY_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDecision {
	pub use_external: bool,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCandidate {
	pub id: String,
	pub priority: u32,
	pub status: HealthStatus,
}

pub struct DecideExternalSearch<'a> {
	pub query: &'a str,
	pub evaluation: &'a EvaluationResult,
	pub threshold: f32,
}

impl Decision for DecideExternalSearch<'_> {
	type Output = ExternalDecision;

	const KIND: DecisionKind = DecisionKind::DecideExternalSearch;

	fn system(&self) -> &'static str {
		DECIDE_SYSTEM
	}

	fn user(&self, _budget: &PromptBudget) -> String {
		format!(
			"Question: {}\nInternal relevance score: {:.2}\nCompleteness: {:?}\nMissing: {}",
			self.query,
			self.evaluation.relevance_score,
			self.evaluation.completeness,
			self.evaluation.missing_information.as_deref().unwrap_or("unknown")
		)
	}

	fn parse(&self, raw: &str) -> Result<ExternalDecision, String> {
		let json = parse_json(raw)?;
		let use_external = json
			.get("use_external")
			.and_then(Value::as_bool)
			.ok_or_else(|| "Decision has no use_external flag.".to_string())?;

		Ok(ExternalDecision {
			use_external,
			reason: json_str(&json, "reason").unwrap_or_default(),
		})
	}

	fn fallback(&self) -> ExternalDecision {
		let score = self.evaluation.relevance_score;
		let use_external = score < self.threshold;
		let reason = if use_external {
			format!("Relevance {score:.2} is below {:.2}.", self.threshold)
		} else {
			format!("Relevance {score:.2} meets {:.2}.", self.threshold)
		};

		ExternalDecision { use_external, reason }
	}
}

pub struct GenerateProviderQuery<'a> {
	pub query: &'a str,
	pub technology: Option<&'a str>,
}

impl Decision for GenerateProviderQuery<'_> {
	type Output = String;

	const KIND: DecisionKind = DecisionKind::GenerateProviderQuery;

	fn system(&self) -> &'static str {
		PROVIDER_QUERY_SYSTEM
	}

	fn user(&self, _budget: &PromptBudget) -> String {
		match self.technology {
			Some(technology) => format!("Question: {}\nTechnology: {technology}", self.query),
			None => format!("Question: {}", self.query),
		}
	}

	fn parse(&self, raw: &str) -> Result<String, String> {
		let query = parse_query_text(raw, "query")
			.ok_or_else(|| "Model returned no provider query.".to_string())?;

		Ok(crate::truncate_chars(&query, MAX_PROVIDER_QUERY_CHARS))
	}

	fn fallback(&self) -> String {
		self.query.to_string()
	}
}

pub struct SelectProvider<'a> {
	pub query: &'a str,
	pub candidates: &'a [ProviderCandidate],
}

impl Decision for SelectProvider<'_> {
	type Output = Option<String>;

	const KIND: DecisionKind = DecisionKind::SelectProvider;

	fn system(&self) -> &'static str {
		SELECT_SYSTEM
	}

	fn user(&self, _budget: &PromptBudget) -> String {
		let mut out = format!("Query: {}\nProviders:\n", self.query);

		for candidate in self.candidates {
			out.push_str(&format!(
				"- {} (priority {}, {})\n",
				candidate.id,
				candidate.priority,
				candidate.status.as_str()
			));
		}

		out
	}

	fn parse(&self, raw: &str) -> Result<Option<String>, String> {
		let json = parse_json(raw)?;
		let chosen =
			json_str(&json, "provider_id").ok_or_else(|| "Model named no provider.".to_string())?;

		if !self.candidates.iter().any(|candidate| candidate.id == chosen) {
			return Err(format!("Model chose {chosen}, which is not a candidate."));
		}

		Ok(Some(chosen))
	}

	/// Best static priority among healthy candidates, else best static priority overall.
	fn fallback(&self) -> Option<String> {
		let best = |healthy_only: bool| {
			self.candidates
				.iter()
				.filter(|candidate| !healthy_only || candidate.status == HealthStatus::Healthy)
				.min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
				.map(|candidate| candidate.id.clone())
		};

		best(true).or_else(|| best(false))
	}
}

impl DecisionService {
	pub async fn decide_external_search(
		&self,
		query: &str,
		evaluation: &EvaluationResult,
	) -> Decided<ExternalDecision> {
		self.run(&DecideExternalSearch { query, evaluation, threshold: self.external_threshold() })
			.await
	}

	pub async fn generate_provider_query(
		&self,
		query: &str,
		technology: Option<&str>,
	) -> Decided<String> {
		self.run(&GenerateProviderQuery { query, technology }).await
	}

	pub async fn select_provider(
		&self,
		query: &str,
		candidates: &[ProviderCandidate],
	) -> Decided<Option<String>> {
		let decision = SelectProvider { query, candidates };

		if candidates.len() <= 1 {
			return Decided::rule(decision.fallback());
		}

		self.run(&decision).await
	}
}
