use serde::{Deserialize, Serialize};
use sift_config::Workspace;
use sift_domain::query::NormalizedQuery;

use crate::{
	VectorHit,
	decision::{
		Decided, Decision, DecisionKind, DecisionService, EvaluationResult, PromptBudget, json_str,
		json_strings, parse_json, parse_query_text,
	},
};

const ANALYZE_SYSTEM: &str = "\
You route documentation questions to search workspaces. Reply with one JSON object: \
{\"intent\": string, \"domain\": string, \"entities\": [string], \"suggested_workspaces\": [slug]}. \
Only suggest slugs from the provided list, most relevant first.";
const REFINE_SYSTEM: &str = "\
You rewrite documentation search queries so a vector index finds better matches. Keep the \
user's intent, add precise technical terms, drop filler. Reply with one JSON object: \
{\"query\": string}.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
	pub intent: String,
	pub domain: String,
	pub entities: Vec<String>,
	pub suggested_workspaces: Vec<String>,
}

pub struct AnalyzeQuery<'a> {
	pub query: &'a NormalizedQuery,
	pub workspaces: &'a [Workspace],
	pub max_workspaces: usize,
}
impl AnalyzeQuery<'_> {
	fn default_domain(&self) -> String {
		self.query.technology.clone().unwrap_or_else(|| "general".to_string())
	}

	fn hinted(&self, workspace: &Workspace) -> bool {
		self.query
			.technology
			.as_deref()
			.is_some_and(|hint| workspace.technologies.iter().any(|tech| tech == hint))
	}
}

impl Decision for AnalyzeQuery<'_> {
	type Output = QueryAnalysis;

	const KIND: DecisionKind = DecisionKind::AnalyzeQuery;

	fn system(&self) -> &'static str {
		ANALYZE_SYSTEM
	}

	fn user(&self, _budget: &PromptBudget) -> String {
		let mut out = format!("Question: {}\n", self.query.cleaned);

		if let Some(hint) = self.query.technology.as_deref() {
			out.push_str(&format!("Technology hint: {hint}\n"));
		}

		out.push_str(&format!("Pick at most {} workspaces from:\n", self.max_workspaces));

		for workspace in self.workspaces {
			out.push_str(&format!(
				"- {}: {} [{}]\n",
				workspace.slug,
				workspace.description.as_deref().unwrap_or(""),
				workspace.technologies.join(", ")
			));
		}

		out
	}

	fn parse(&self, raw: &str) -> Result<QueryAnalysis, String> {
		let json = parse_json(raw)?;
		let mut suggested: Vec<String> = Vec::new();

		for slug in json_strings(&json, "suggested_workspaces") {
			let known = self.workspaces.iter().any(|workspace| workspace.slug == slug);

			if known && !suggested.contains(&slug) {
				suggested.push(slug);
			}
		}

		suggested.truncate(self.max_workspaces);

		if suggested.is_empty() {
			return Err("Model suggested no configured workspace.".to_string());
		}

		Ok(QueryAnalysis {
			intent: json_str(&json, "intent").unwrap_or_else(|| "lookup".to_string()),
			domain: json_str(&json, "domain").unwrap_or_else(|| self.default_domain()),
			entities: json_strings(&json, "entities"),
			suggested_workspaces: suggested,
		})
	}

	/// Every configured workspace up to the limit, technology-matched ones first.
	fn fallback(&self) -> QueryAnalysis {
		let hinted = self.workspaces.iter().filter(|workspace| self.hinted(workspace));
		let rest = self.workspaces.iter().filter(|workspace| !self.hinted(workspace));
		let suggested_workspaces = hinted
			.chain(rest)
			.take(self.max_workspaces)
			.map(|workspace| workspace.slug.clone())
			.collect();

		QueryAnalysis {
			intent: "lookup".to_string(),
			domain: "general".to_string(),
			entities: Vec::new(),
			suggested_workspaces,
		}
	}
}

pub struct RefineQuery<'a> {
	pub query: &'a str,
	pub evaluation: &'a EvaluationResult,
	pub hits: &'a [VectorHit],
}

impl Decision for RefineQuery<'_> {
	type Output = String;

	const KIND: DecisionKind = DecisionKind::RefineQuery;

	fn system(&self) -> &'static str {
		REFINE_SYSTEM
	}

	fn user(&self, budget: &PromptBudget) -> String {
		format!(
			"Query: {}\nRelevance of current results: {:.2}\nMissing: {}\nCurrent results:\n{}",
			self.query,
			self.evaluation.relevance_score,
			self.evaluation.missing_information.as_deref().unwrap_or("unknown"),
			budget.snippets(self.hits.iter().map(|hit| (hit.title.as_str(), hit.content.as_str())))
		)
	}

	fn parse(&self, raw: &str) -> Result<String, String> {
		parse_query_text(raw, "query").ok_or_else(|| "Model returned no refined query.".to_string())
	}

	fn fallback(&self) -> String {
		self.query.to_string()
	}
}

impl DecisionService {
	pub async fn analyze_query(
		&self,
		query: &NormalizedQuery,
		workspaces: &[Workspace],
		max_workspaces: usize,
	) -> Decided<QueryAnalysis> {
		let decision = AnalyzeQuery { query, workspaces, max_workspaces };

		if workspaces.len() <= 1 {
			return Decided::rule(decision.fallback());
		}

		self.run(&decision).await
	}

	pub async fn refine_query(
		&self,
		query: &str,
		evaluation: &EvaluationResult,
		hits: &[VectorHit],
	) -> Decided<String> {
		self.run(&RefineQuery { query, evaluation, hits }).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn workspace(slug: &str, technologies: &[&str]) -> Workspace {
		Workspace {
			slug: slug.to_string(),
			description: None,
			technologies: technologies.iter().map(|tech| tech.to_string()).collect(),
		}
	}

	fn workspaces() -> Vec<Workspace> {
		vec![
			workspace("general", &[]),
			workspace("python-docs", &["python"]),
			workspace("rust-docs", &["rust"]),
		]
	}

	#[test]
	fn fallback_orders_hinted_workspaces_first() {
		let query = sift_domain::query::normalize("tokio retry backoff").expect("query");
		let workspaces = workspaces();
		let decision = AnalyzeQuery { query: &query, workspaces: &workspaces, max_workspaces: 2 };
		let analysis = decision.fallback();

		assert_eq!(
			analysis.suggested_workspaces,
			vec!["rust-docs".to_string(), "general".to_string()]
		);
		assert_eq!(analysis.domain, "general");
	}

	#[test]
	fn parse_drops_unknown_workspaces() {
		let query = sift_domain::query::normalize("pytest fixtures").expect("query");
		let workspaces = workspaces();
		let decision = AnalyzeQuery { query: &query, workspaces: &workspaces, max_workspaces: 5 };
		let raw = r#"{"intent":"how-to","suggested_workspaces":["made-up","python-docs","python-docs"]}"#;
		let analysis = decision.parse(raw).expect("parse");

		assert_eq!(analysis.suggested_workspaces, vec!["python-docs".to_string()]);
		assert_eq!(analysis.domain, "python");
		assert!(decision.parse(r#"{"suggested_workspaces":["made-up"]}"#).is_err());
	}

	#[test]
	fn refine_accepts_plain_text() {
		let evaluation = EvaluationResult::unknown();
		let decision = RefineQuery { query: "tokio retry", evaluation: &evaluation, hits: &[] };

		assert_eq!(
			decision.parse("\"tokio-retry crate exponential backoff\"\n").expect("parse"),
			"tokio-retry crate exponential backoff"
		);
		assert_eq!(
			decision.parse(r#"{"query": "tokio backoff"}"#).expect("parse"),
			"tokio backoff"
		);
		assert!(decision.parse("   ").is_err());
	}
}
