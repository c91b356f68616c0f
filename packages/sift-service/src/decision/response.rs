use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	WebResult,
	decision::{
		Decided, Decision, DecisionKind, DecisionService, PromptBudget, json_score, json_str,
		json_strings, parse_json,
	},
	search::{Citation, ResponseDocument, ResponseType},
};

const EXTRACT_SYSTEM: &str = "\
You extract the passage of a web search result that answers a documentation question. Reply with \
one JSON object: {\"content\": string, \"key_points\": [string], \"relevance\": number 0..1}.";
const ANSWER_SYSTEM: &str = "\
You answer documentation questions using only the numbered sources given. Cite sources by number. \
Reply with one JSON object: {\"answer\": string, \"citations\": [number]}.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
	pub title: String,
	pub url: String,
	pub content: String,
	pub key_points: Vec<String>,
	pub relevance: f32,
	pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedResponse {
	pub response_type: ResponseType,
	pub answer: Option<String>,
	pub documents: Vec<ResponseDocument>,
	pub citations: Vec<Citation>,
}
impl FormattedResponse {
	/// Documents as retrieved, each with a URL cited.
	pub fn raw(documents: Vec<ResponseDocument>) -> Self {
		let citations = documents
			.iter()
			.enumerate()
			.filter(|(_, doc)| doc.url.is_some())
			.map(|(index, doc)| Citation::of(index, doc))
			.collect();

		Self { response_type: ResponseType::Raw, answer: None, documents, citations }
	}
}

pub struct ExtractContent<'a> {
	pub query: &'a str,
	pub result: &'a WebResult,
	/// Bound on the extracted text, from the model or the raw snippet alike.
	pub max_chars: usize,
}

impl ExtractContent<'_> {
	fn extracted(
		&self,
		content: &str,
		key_points: Vec<String>,
		relevance: f32,
	) -> ExtractedContent {
		ExtractedContent {
			title: self.result.title.clone(),
			url: self.result.url.clone(),
			content: crate::truncate_chars(content.trim(), self.max_chars),
			key_points,
			relevance,
			provider_id: self.result.provider_id.clone(),
		}
	}
}

impl Decision for ExtractContent<'_> {
	type Output = ExtractedContent;

	const KIND: DecisionKind = DecisionKind::ExtractContent;

	fn system(&self) -> &'static str {
		EXTRACT_SYSTEM
	}

	fn user(&self, budget: &PromptBudget) -> String {
		format!(
			"Question: {}\nSource: {} ({})\nText:\n{}",
			self.query,
			self.result.title,
			self.result.url,
			crate::truncate_chars(&self.result.snippet, budget.max_extract_chars)
		)
	}

	fn parse(&self, raw: &str) -> Result<ExtractedContent, String> {
		let json = parse_json(raw)?;
		let content =
			json_str(&json, "content").ok_or_else(|| "Extraction has no content.".to_string())?;
		let relevance =
			json_score(&json, "relevance").unwrap_or(self.result.relevance_estimate);

		Ok(self.extracted(&content, json_strings(&json, "key_points"), relevance))
	}

	fn fallback(&self) -> ExtractedContent {
		self.extracted(&self.result.snippet, Vec::new(), self.result.relevance_estimate)
	}
}

pub struct SelectResponseFormat<'a> {
	pub query: &'a str,
	pub documents: &'a [ResponseDocument],
}

impl Decision for SelectResponseFormat<'_> {
	type Output = FormattedResponse;

	const KIND: DecisionKind = DecisionKind::SelectResponseFormat;

	fn system(&self) -> &'static str {
		ANSWER_SYSTEM
	}

	fn user(&self, budget: &PromptBudget) -> String {
		format!(
			"Question: {}\nSources:\n{}",
			self.query,
			budget.snippets(
				self.documents.iter().map(|doc| (doc.title.as_str(), doc.content.as_str()))
			)
		)
	}

	fn parse(&self, raw: &str) -> Result<FormattedResponse, String> {
		let json = parse_json(raw)?;
		let answer =
			json_str(&json, "answer").ok_or_else(|| "Model returned no answer.".to_string())?;
		let mut cited: Vec<usize> = json
			.get("citations")
			.and_then(Value::as_array)
			.map(|items| {
				items
					.iter()
					.filter_map(Value::as_u64)
					.filter_map(|n| (n as usize).checked_sub(1))
					.filter(|index| *index < self.documents.len())
					.collect()
			})
			.unwrap_or_default();

		cited.sort_unstable();
		cited.dedup();

		Ok(FormattedResponse {
			response_type: ResponseType::Answer,
			answer: Some(answer),
			documents: self.documents.to_vec(),
			citations: cited
				.into_iter()
				.map(|index| Citation::of(index, &self.documents[index]))
				.collect(),
		})
	}

	fn fallback(&self) -> FormattedResponse {
		FormattedResponse::raw(self.documents.to_vec())
	}
}

impl DecisionService {
	pub async fn extract_content(
		&self,
		query: &str,
		result: &WebResult,
	) -> Decided<ExtractedContent> {
		let max_chars = self.budget().max_extract_chars;

		self.run(&ExtractContent { query, result, max_chars }).await
	}

	/// Raw responses are assembled directly. Answers are synthesized, falling back to raw.
	pub async fn select_response_format(
		&self,
		query: &str,
		response_type: ResponseType,
		documents: Vec<ResponseDocument>,
	) -> Decided<FormattedResponse> {
		if response_type == ResponseType::Raw || documents.is_empty() {
			return Decided::rule(FormattedResponse::raw(documents));
		}

		self.run(&SelectResponseFormat { query, documents: &documents }).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::search::DocumentOrigin;

	fn document(title: &str, url: Option<&str>) -> ResponseDocument {
		ResponseDocument {
			title: title.to_string(),
			url: url.map(str::to_string),
			content: format!("{title} body"),
			origin: DocumentOrigin::Vector,
			source: "rust-docs".to_string(),
			score: 0.8,
		}
	}

	#[test]
	fn raw_cites_documents_with_urls() {
		let formatted = FormattedResponse::raw(vec![
			document("a", Some("https://a.example")),
			document("b", None),
			document("c", Some("https://c.example")),
		]);
		let indexes: Vec<u32> = formatted.citations.iter().map(|c| c.index).collect();

		assert_eq!(indexes, vec![1, 3]);
		assert!(formatted.answer.is_none());
	}

	#[test]
	fn answer_citations_are_bounded_and_deduped() {
		let documents = vec![document("a", Some("https://a.example")), document("b", None)];
		let decision = SelectResponseFormat { query: "q", documents: &documents };
		let formatted = decision
			.parse(r#"{"answer": "Use backoff [2].", "citations": [2, 2, 0, 9]}"#)
			.expect("parse");

		assert_eq!(formatted.response_type, ResponseType::Answer);
		assert_eq!(formatted.citations.len(), 1);
		assert_eq!(formatted.citations[0].index, 2);
	}

	#[test]
	fn extraction_fallback_keeps_snippet() {
		let result = WebResult {
			title: "Retry".to_string(),
			url: "https://r.example".to_string(),
			snippet: "  Retries with jitter.  ".to_string(),
			source_type: "web".to_string(),
			relevance_estimate: 0.6,
			provider_id: "brave".to_string(),
		};
		let decision = ExtractContent { query: "q", result: &result, max_chars: 100 };
		let fallback = decision.fallback();

		assert_eq!(fallback.content, "Retries with jitter.");
		assert_eq!(fallback.relevance, 0.6);
	}

	#[test]
	fn extraction_is_bounded_on_both_paths() {
		let result = WebResult {
			title: "Long".to_string(),
			url: "https://l.example".to_string(),
			snippet: "é".repeat(500),
			source_type: "web".to_string(),
			relevance_estimate: 0.5,
			provider_id: "brave".to_string(),
		};
		let decision = ExtractContent { query: "q", result: &result, max_chars: 40 };

		assert_eq!(decision.fallback().content, "é".repeat(40));

		let raw = format!(r#"{{"content": "{}"}}"#, "x".repeat(200));
		let parsed = decision.parse(&raw).expect("parse");

		assert_eq!(parsed.content.chars().count(), 40);
	}
}
