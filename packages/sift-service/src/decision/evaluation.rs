use serde::{Deserialize, Serialize};

use crate::{
	VectorHit,
	decision::{
		Decided, Decision, DecisionKind, DecisionService, PromptBudget, json_score, json_str,
		parse_json,
	},
};

const EVALUATE_SYSTEM: &str = "\
You judge whether search results answer a documentation question. Reply with one JSON object: \
{\"relevance_score\": number 0..1, \"completeness\": \"complete\"|\"incomplete\"|\"unknown\", \
\"missing_information\": string|null, \"recommendation\": \"sufficient\"|\"refine\"|\"external_search\"}.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
	Complete,
	Incomplete,
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
	Sufficient,
	Refine,
	ExternalSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
	pub relevance_score: f32,
	pub completeness: Completeness,
	pub missing_information: Option<String>,
	pub recommendation: Recommendation,
}
impl EvaluationResult {
	/// Neutral verdict used when the model cannot be consulted.
	pub fn unknown() -> Self {
		Self {
			relevance_score: 0.5,
			completeness: Completeness::Unknown,
			missing_information: None,
			recommendation: Recommendation::Refine,
		}
	}

	pub fn no_results() -> Self {
		Self {
			relevance_score: 0.0,
			completeness: Completeness::Incomplete,
			missing_information: Some("The index returned no documents.".to_string()),
			recommendation: Recommendation::ExternalSearch,
		}
	}
}

pub struct EvaluateRelevance<'a> {
	pub query: &'a str,
	pub hits: &'a [VectorHit],
	pub relevance_threshold: f32,
}

impl Decision for EvaluateRelevance<'_> {
	type Output = EvaluationResult;

	const KIND: DecisionKind = DecisionKind::EvaluateRelevance;

	fn system(&self) -> &'static str {
		EVALUATE_SYSTEM
	}

	fn user(&self, budget: &PromptBudget) -> String {
		format!(
			"Question: {}\nResults:\n{}",
			self.query,
			budget.snippets(self.hits.iter().map(|hit| (hit.title.as_str(), hit.content.as_str())))
		)
	}

	fn parse(&self, raw: &str) -> Result<EvaluationResult, String> {
		let json = parse_json(raw)?;
		let relevance_score = json_score(&json, "relevance_score")
			.or_else(|| json_score(&json, "score"))
			.ok_or_else(|| "Evaluation has no relevance score.".to_string())?;
		let completeness = match json_str(&json, "completeness").as_deref() {
			Some("complete") => Completeness::Complete,
			Some("incomplete") => Completeness::Incomplete,
			_ => Completeness::Unknown,
		};
		let recommendation = match json_str(&json, "recommendation").as_deref() {
			Some("sufficient") => Recommendation::Sufficient,
			Some("refine") => Recommendation::Refine,
			Some("external_search") | Some("external") => Recommendation::ExternalSearch,
			_ => self.recommend(relevance_score),
		};

		Ok(EvaluationResult {
			relevance_score,
			completeness,
			missing_information: json_str(&json, "missing_information"),
			recommendation,
		})
	}

	fn fallback(&self) -> EvaluationResult {
		EvaluationResult::unknown()
	}
}

impl EvaluateRelevance<'_> {
	/// Anything short of sufficient is refined first. The orchestrator bounds the refinements and
	/// decides on external search once they run out.
	fn recommend(&self, score: f32) -> Recommendation {
		if score >= self.relevance_threshold {
			Recommendation::Sufficient
		} else {
			Recommendation::Refine
		}
	}
}

impl DecisionService {
	/// With no hits there is nothing to judge, so the verdict is fixed without a model call.
	pub async fn evaluate_relevance(
		&self,
		query: &str,
		hits: &[VectorHit],
	) -> Decided<EvaluationResult> {
		if hits.is_empty() {
			return Decided::rule(EvaluationResult::no_results());
		}

		self.run(&EvaluateRelevance {
			query,
			hits,
			relevance_threshold: self.relevance_threshold(),
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn decision() -> EvaluateRelevance<'static> {
		EvaluateRelevance { query: "q", hits: &[], relevance_threshold: 0.7 }
	}

	#[test]
	fn derives_recommendation_from_score_when_missing() {
		let d = decision();

		assert_eq!(
			d.parse(r#"{"relevance_score": 0.9}"#).expect("parse").recommendation,
			Recommendation::Sufficient
		);
		assert_eq!(
			d.parse(r#"{"relevance_score": 0.5}"#).expect("parse").recommendation,
			Recommendation::Refine
		);
		assert_eq!(
			d.parse(r#"{"relevance_score": 0.1}"#).expect("parse").recommendation,
			Recommendation::Refine
		);
	}

	#[test]
	fn model_recommendation_wins() {
		let raw = r#"{
			"relevance_score": 0.95,
			"completeness": "incomplete",
			"recommendation": "refine",
			"missing_information": "async examples"
		}"#;
		let parsed = decision().parse(raw).expect("parse");

		assert_eq!(parsed.recommendation, Recommendation::Refine);
		assert_eq!(parsed.completeness, Completeness::Incomplete);
		assert_eq!(parsed.missing_information.as_deref(), Some("async examples"));
	}

	#[test]
	fn missing_score_is_unusable() {
		assert!(decision().parse(r#"{"recommendation": "sufficient"}"#).is_err());
	}
}
