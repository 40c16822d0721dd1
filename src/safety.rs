/// Patterns screened when the configuration does not list its own.
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &["rm -rf", "rm -fr", "dd if=", "mkfs", ":(){ :|:& };:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyViolation {
    pub pattern: String,
    pub line: String,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' matches dangerous pattern '{}'", self.line, self.pattern)
    }
}

/// Screens scripts against the configured dangerous-command patterns.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    patterns: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DANGEROUS_PATTERNS.iter().copied())
    }
}

impl SafetyPolicy {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| collapse_whitespace(pattern.as_ref()))
            .filter(|pattern| !pattern.is_empty())
            .collect();
        Self { patterns }
    }

    /// Returns the first line that contains a dangerous pattern.
    ///
    /// Matching ignores case and runs of whitespace.
    pub fn check(&self, script: &str) -> Option<SafetyViolation> {
        script.lines().find_map(|line| {
            let normalized = collapse_whitespace(line);
            self.patterns
                .iter()
                .find(|pattern| normalized.contains(pattern.as_str()))
                .map(|pattern| SafetyViolation {
                    pattern: pattern.clone(),
                    line: line.trim().to_string(),
                })
        })
    }
}

fn collapse_whitespace(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
