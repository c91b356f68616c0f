use std::time::Duration;

const VOLATILE_TERMS: &[&str] = &[
	"latest",
	"release",
	"released",
	"releases",
	"changelog",
	"version",
	"versions",
	"deprecated",
	"deprecation",
	"news",
	"roadmap",
	"upcoming",
	"beta",
	"nightly",
	"breaking",
];
const STABLE_TERMS: &[&str] = &[
	"syntax",
	"tutorial",
	"reference",
	"guide",
	"basics",
	"concept",
	"concepts",
	"definition",
	"fundamentals",
	"introduction",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
	Volatile,
	Default,
	Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
	pub volatile: Duration,
	pub default: Duration,
	pub stable: Duration,
}
impl TtlPolicy {
	pub fn resolve(&self, tokens: &[String]) -> Duration {
		match classify(tokens) {
			Volatility::Volatile => self.volatile,
			Volatility::Default => self.default,
			Volatility::Stable => self.stable,
		}
	}
}

/// Volatile terms win over stable ones: "latest syntax" is still time-sensitive.
pub fn classify(tokens: &[String]) -> Volatility {
	if tokens.iter().any(|token| VOLATILE_TERMS.contains(&token.as_str())) {
		return Volatility::Volatile;
	}
	if tokens.iter().any(|token| STABLE_TERMS.contains(&token.as_str())) {
		return Volatility::Stable;
	}

	Volatility::Default
}
