// Deterministic guardrails applied before code reaches an agent

/// Fragments the content filter refuses to forward
pub const BANNED_FRAGMENTS: &[&str] = &["DROP TABLE", "rm -rf", "BEGIN RSA PRIVATE KEY", "AKIA"];

pub const REDACTION: &str = "[REDACTED]";

/// Roughly 4 characters per token, never below 256 characters
pub fn max_chars(token_limit: usize) -> usize {
    256usize.max(token_limit.saturating_mul(4))
}

/// Truncate to the token budget and optionally redact banned fragments.
///
/// Returns the code to forward plus the list of guardrail findings.
pub fn apply_guardrails(code: &str, token_limit: usize, enable_filter: bool) -> (String, Vec<String>) {
    let mut issues = Vec::new();
    let mut code = code.to_string();

    let limit = max_chars(token_limit);
    let len = code.chars().count();
    if len > limit {
        issues.push(format!("truncated:{}->{}", len, limit));
        code = code.chars().take(limit).collect();
    }

    if enable_filter {
        let lowered = code.to_lowercase();
        let found: Vec<&str> = BANNED_FRAGMENTS
            .iter()
            .copied()
            .filter(|w| lowered.contains(&w.to_lowercase()))
            .collect();

        if !found.is_empty() {
            issues.push("content-filter:blocked".to_string());
            // Detection ignores case; redaction only replaces the exact spelling
            for w in found {
                code = code.replace(w, REDACTION);
            }
        }
    }

    (code, issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_code_passes_untouched() {
        let (code, issues) = apply_guardrails("print('hi')", 4000, true);
        assert_eq!(code, "print('hi')");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_truncates_to_budget() {
        let long = "x".repeat(1000);
        let (code, issues) = apply_guardrails(&long, 10, false);
        assert_eq!(code.len(), 256);
        assert_eq!(issues, vec!["truncated:1000->256"]);

        let (code, issues) = apply_guardrails(&long, 100, false);
        assert_eq!(code.len(), 400);
        assert_eq!(issues, vec!["truncated:1000->400"]);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let long = "é".repeat(300);
        let (code, issues) = apply_guardrails(&long, 0, false);
        assert_eq!(code.chars().count(), 256);
        assert_eq!(issues, vec!["truncated:300->256"]);
    }

    #[test]
    fn test_filter_redacts_banned_fragments() {
        let (code, issues) = apply_guardrails("cursor.execute('DROP TABLE users')", 4000, true);
        assert_eq!(code, "cursor.execute('[REDACTED] users')");
        assert_eq!(issues, vec!["content-filter:blocked"]);
    }

    #[test]
    fn test_filter_detects_any_case_but_redacts_exact() {
        let (code, issues) = apply_guardrails("drop table users", 4000, true);
        assert_eq!(issues, vec!["content-filter:blocked"]);
        assert_eq!(code, "drop table users");
    }

    #[test]
    fn test_filter_disabled() {
        let (code, issues) = apply_guardrails("rm -rf /", 4000, false);
        assert_eq!(code, "rm -rf /");
        assert!(issues.is_empty());
    }
}
