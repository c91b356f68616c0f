use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	decision::{
		Decided, Decision, DecisionKind, DecisionService, ExtractedContent, PromptBudget, json_str,
		json_strings, parse_json,
	},
	search::Phase,
};

const LEARNING_SYSTEM: &str = "\
You spot documentation gaps. Given a question the internal index could not answer and the web \
content that did, list topics worth adding to the index. Reply with one JSON object: \
{\"opportunities\": [{\"topic\": string, \"suggested_workspace\": slug|null, \"rationale\": string}]}.";
const FAILURE_SYSTEM: &str = "\
You diagnose why a documentation search returned nothing. Reply with one JSON object: \
{\"summary\": string, \"likely_cause\": string, \"suggestions\": [string]}.";
const MAX_OPPORTUNITIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOpportunity {
	pub topic: String,
	pub suggested_workspace: Option<String>,
	pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAnalysis {
	pub summary: String,
	pub likely_cause: String,
	pub suggestions: Vec<String>,
}

pub struct IdentifyLearningOpportunities<'a> {
	pub query: &'a str,
	pub extracted: &'a [ExtractedContent],
	pub workspaces: &'a [String],
}

impl Decision for IdentifyLearningOpportunities<'_> {
	type Output = Vec<LearningOpportunity>;

	const KIND: DecisionKind = DecisionKind::IdentifyLearningOpportunities;

	fn system(&self) -> &'static str {
		LEARNING_SYSTEM
	}

	fn user(&self, budget: &PromptBudget) -> String {
		format!(
			"Question: {}\nWorkspaces: {}\nWeb content:\n{}",
			self.query,
			self.workspaces.join(", "),
			budget.snippets(self.extracted.iter().map(|e| (e.title.as_str(), e.content.as_str())))
		)
	}

	fn parse(&self, raw: &str) -> Result<Vec<LearningOpportunity>, String> {
		let json = parse_json(raw)?;
		let items = match &json {
			Value::Array(items) => items,
			_ => json
				.get("opportunities")
				.and_then(Value::as_array)
				.ok_or_else(|| "Response has no opportunities list.".to_string())?,
		};

		Ok(items
			.iter()
			.filter_map(|item| {
				let topic = json_str(item, "topic")?;
				let suggested_workspace = json_str(item, "suggested_workspace")
					.filter(|slug| self.workspaces.contains(slug));

				Some(LearningOpportunity {
					topic,
					suggested_workspace,
					rationale: json_str(item, "rationale").unwrap_or_default(),
				})
			})
			.take(MAX_OPPORTUNITIES)
			.collect())
	}

	fn fallback(&self) -> Vec<LearningOpportunity> {
		Vec::new()
	}
}

pub struct AnalyzeFailure<'a> {
	pub query: &'a str,
	pub failed_phases: &'a [Phase],
	pub search_path: &'a [String],
}

impl Decision for AnalyzeFailure<'_> {
	type Output = FailureAnalysis;

	const KIND: DecisionKind = DecisionKind::AnalyzeFailure;

	fn system(&self) -> &'static str {
		FAILURE_SYSTEM
	}

	fn user(&self, _budget: &PromptBudget) -> String {
		let failed: Vec<&str> = self.failed_phases.iter().map(|phase| phase.as_str()).collect();

		format!(
			"Question: {}\nSearch path: {}\nFailed phases: {}",
			self.query,
			self.search_path.join(" -> "),
			failed.join(", ")
		)
	}

	fn parse(&self, raw: &str) -> Result<FailureAnalysis, String> {
		let json = parse_json(raw)?;
		let summary =
			json_str(&json, "summary").ok_or_else(|| "Diagnosis has no summary.".to_string())?;

		Ok(FailureAnalysis {
			summary,
			likely_cause: json_str(&json, "likely_cause").unwrap_or_else(|| "unknown".to_string()),
			suggestions: json_strings(&json, "suggestions"),
		})
	}

	fn fallback(&self) -> FailureAnalysis {
		let failed: Vec<&str> = self.failed_phases.iter().map(|phase| phase.as_str()).collect();
		let likely_cause = match failed.first() {
			Some(phase) => format!("{phase} failed"),
			None => "no matching documents".to_string(),
		};

		FailureAnalysis {
			summary: format!("No documents were found for \"{}\".", self.query),
			likely_cause,
			suggestions: Vec::new(),
		}
	}
}

impl DecisionService {
	pub async fn identify_learning_opportunities(
		&self,
		query: &str,
		extracted: &[ExtractedContent],
		workspaces: &[String],
	) -> Decided<Vec<LearningOpportunity>> {
		if extracted.is_empty() {
			return Decided::rule(Vec::new());
		}

		self.run(&IdentifyLearningOpportunities { query, extracted, workspaces }).await
	}

	pub async fn analyze_failure(
		&self,
		query: &str,
		failed_phases: &[Phase],
		search_path: &[String],
	) -> Decided<FailureAnalysis> {
		self.run(&AnalyzeFailure { query, failed_phases, search_path }).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn learning_drops_unknown_workspaces_and_topicless_items() {
		let workspaces = vec!["rust-docs".to_string()];
		let decision =
			IdentifyLearningOpportunities { query: "q", extracted: &[], workspaces: &workspaces };
		let raw = r#"{"opportunities": [
			{"topic": "tokio retries", "suggested_workspace": "rust-docs", "rationale": "asked often"},
			{"topic": "pytest", "suggested_workspace": "python-docs"},
			{"suggested_workspace": "rust-docs"}
		]}"#;
		let parsed = decision.parse(raw).expect("parse");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0].suggested_workspace.as_deref(), Some("rust-docs"));
		assert_eq!(parsed[1].suggested_workspace, None);
	}

	#[test]
	fn failure_fallback_names_first_failed_phase() {
		let phases = [Phase::VectorSearch, Phase::ProviderSearch];
		let decision = AnalyzeFailure { query: "q", failed_phases: &phases, search_path: &[] };

		assert_eq!(decision.fallback().likely_cause, "vector_search failed");
	}
}
