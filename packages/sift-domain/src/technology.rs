//! Keyword-based technology hints.

const TECHNOLOGIES: &[(&str, &[&str])] = &[
	("rust", &["rust", "rustc", "cargo", "tokio", "serde", "crate", "crates"]),
	("python", &["python", "pip", "django", "flask", "fastapi", "pytest", "pandas"]),
	("javascript", &["javascript", "js", "node", "nodejs", "npm", "react", "vue", "webpack"]),
	("typescript", &["typescript", "ts", "tsc", "tsconfig"]),
	("go", &["golang", "goroutine", "goroutines"]),
	("java", &["java", "maven", "gradle", "spring", "jvm"]),
	("kubernetes", &["kubernetes", "k8s", "kubectl", "helm"]),
	("docker", &["docker", "dockerfile", "compose"]),
	("postgres", &["postgres", "postgresql", "psql"]),
	("redis", &["redis"]),
	("aws", &["aws", "s3", "ec2", "lambda", "cloudformation"]),
];

/// Returns the canonical technology for the earliest token that names one.
pub fn detect(tokens: &[String]) -> Option<&'static str> {
	tokens.iter().find_map(|token| canonical(token))
}

pub fn canonical(token: &str) -> Option<&'static str> {
	let token = token.trim().to_lowercase();

	TECHNOLOGIES
		.iter()
		.find(|(name, aliases)| *name == token || aliases.contains(&token.as_str()))
		.map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tokens(words: &[&str]) -> Vec<String> {
		words.iter().map(|word| word.to_string()).collect()
	}

	#[test]
	fn earliest_mention_wins() {
		assert_eq!(detect(&tokens(&["deploy", "django", "on", "kubernetes"])), Some("python"));
	}

	#[test]
	fn common_words_do_not_match() {
		assert_eq!(detect(&tokens(&["how", "to", "go", "home"])), None);
	}

	#[test]
	fn canonical_names_map_to_themselves() {
		assert_eq!(canonical("Rust"), Some("rust"));
		assert_eq!(canonical("k8s"), Some("kubernetes"));
	}
}
