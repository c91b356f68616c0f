use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::technology;

pub const MAX_QUERY_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuery {
	/// Caller text as received, kept for display.
	pub original: String,
	/// NFKC text with control characters removed and whitespace collapsed.
	pub cleaned: String,
	/// blake3 hex digest of the lower-cased cleaned text.
	pub hash: String,
	pub technology: Option<String>,
	pub tokens: Vec<String>,
}
impl NormalizedQuery {
	pub fn with_technology(mut self, technology: Option<&str>) -> Self {
		if let Some(hint) = technology.map(str::trim).filter(|hint| !hint.is_empty()) {
			self.technology = Some(hint.to_lowercase());
		}

		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidQuery {
	#[error("Query is empty.")]
	Empty,
	#[error("Query exceeds {max} characters.")]
	TooLong { max: usize },
}

pub fn normalize(raw: &str) -> Result<NormalizedQuery, InvalidQuery> {
	let folded: String = raw.nfkc().filter(|ch| !is_stripped(*ch)).collect();
	let cleaned = folded.split_whitespace().collect::<Vec<_>>().join(" ");

	if cleaned.is_empty() {
		return Err(InvalidQuery::Empty);
	}
	if cleaned.chars().count() > MAX_QUERY_CHARS {
		return Err(InvalidQuery::TooLong { max: MAX_QUERY_CHARS });
	}

	let lowered = cleaned.to_lowercase();
	let hash = blake3::hash(lowered.as_bytes()).to_hex().to_string();
	let tokens: Vec<String> = lowered.unicode_words().map(str::to_string).collect();
	let technology = technology::detect(&tokens).map(str::to_string);

	Ok(NormalizedQuery { original: raw.to_string(), cleaned, hash, technology, tokens })
}

fn is_stripped(ch: char) -> bool {
	if ch.is_control() {
		// Whitespace controls survive so they can separate words.
		return !ch.is_whitespace();
	}

	matches!(ch, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collapses_whitespace_and_strips_controls() {
		let query =
			normalize("  How\tdo I\u{0007} use   tokio\u{200B}?\n").expect("normalize failed");

		assert_eq!(query.cleaned, "How do I use tokio?");
		assert_eq!(query.original, "  How\tdo I\u{0007} use   tokio\u{200B}?\n");
	}

	#[test]
	fn hash_ignores_case_and_spacing() {
		let a = normalize("Configure Retries").expect("normalize failed");
		let b = normalize("  configure   retries ").expect("normalize failed");

		assert_eq!(a.hash, b.hash);
		assert_ne!(a.original, b.original);
	}

	#[test]
	fn rejects_blank_input() {
		assert_eq!(normalize(" \u{0000}\t "), Err(InvalidQuery::Empty));
	}

	#[test]
	fn rejects_oversized_input() {
		let raw = "a".repeat(MAX_QUERY_CHARS + 1);

		assert_eq!(normalize(&raw), Err(InvalidQuery::TooLong { max: MAX_QUERY_CHARS }));
	}

	#[test]
	fn explicit_hint_overrides_detection() {
		let query = normalize("how do I spawn a task in tokio")
			.expect("normalize failed")
			.with_technology(Some(" Python "));

		assert_eq!(query.technology.as_deref(), Some("python"));
	}
}
