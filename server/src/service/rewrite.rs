use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::database::regex_rule::RegexRule;
use crate::schema::enum_def::RegexPhase;

// Compilation budget for user-supplied patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Validates a pattern the way the pipeline will compile it. The admin API
/// rejects rules whose pattern fails here.
pub fn validate_pattern(pattern: &str) -> Result<(), regex::Error> {
    RegexBuilder::new(pattern)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map(|_| ())
}

struct CompiledRule {
    regex: Regex,
    replacement: String,
}

/// An ordered sequence of compiled substitutions for one phase. Account-level
/// rules run before preset-level rules; within each group rules arrive
/// already sorted by the store.
pub struct RegexPipeline {
    rules: Vec<CompiledRule>,
}

impl RegexPipeline {
    pub fn build(phase: RegexPhase, account_rules: &[RegexRule], preset_rules: &[RegexRule]) -> Self {
        let mut rules = Vec::new();
        for rule in account_rules.iter().chain(preset_rules.iter()) {
            if rule.phase != phase || !rule.is_enabled {
                continue;
            }
            match RegexBuilder::new(&rule.pattern)
                .size_limit(PATTERN_SIZE_LIMIT)
                .build()
            {
                Ok(regex) => rules.push(CompiledRule {
                    regex,
                    replacement: rule.replacement.clone(),
                }),
                Err(e) => {
                    warn!("skipping regex rule '{}': {}", rule.name, e);
                }
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies every rule in order as a global substitution. Non-matching
    /// patterns leave the string unchanged, so the pipeline is total.
    pub fn apply(&self, input: &str) -> String {
        let mut current = input.to_string();
        for rule in &self.rules {
            current = rule
                .regex
                .replace_all(&current, rule.replacement.as_str())
                .into_owned();
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, pattern: &str, replacement: &str, phase: RegexPhase, sort_order: i32) -> RegexRule {
        RegexRule {
            id: sort_order as i64,
            name: name.to_string(),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            phase,
            account_id: 1,
            preset_id: None,
            is_enabled: true,
            sort_order,
            deleted_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &[], &[]);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.apply("untouched $1 text"), "untouched $1 text");
    }

    #[test]
    fn test_empty_match_on_empty_string() {
        let rules = vec![rule("greet", "^.{0}$", "hello", RegexPhase::Post, 0)];
        let pipeline = RegexPipeline::build(RegexPhase::Post, &rules, &[]);
        assert_eq!(pipeline.apply(""), "hello");
    }

    #[test]
    fn test_global_substitution() {
        let rules = vec![rule("swap", "foo", "bar", RegexPhase::Post, 0)];
        let pipeline = RegexPipeline::build(RegexPhase::Post, &rules, &[]);
        assert_eq!(pipeline.apply("foo foo foo"), "bar bar bar");
    }

    #[test]
    fn test_backreferences() {
        let rules = vec![rule("flip", r"(\w+)-(\w+)", "$2-$1", RegexPhase::Pre, 0)];
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &rules, &[]);
        assert_eq!(pipeline.apply("left-right"), "right-left");
    }

    #[test]
    fn test_rules_apply_sequentially() {
        let rules = vec![
            rule("first", "a", "b", RegexPhase::Pre, 0),
            rule("second", "b", "c", RegexPhase::Pre, 1),
        ];
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &rules, &[]);
        // The second rule sees the first rule's output.
        assert_eq!(pipeline.apply("a"), "c");
    }

    #[test]
    fn test_account_rules_run_before_preset_rules() {
        let account = vec![rule("acct", "x", "y", RegexPhase::Pre, 0)];
        let preset = vec![rule("preset", "y", "z", RegexPhase::Pre, 0)];
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &account, &preset);
        assert_eq!(pipeline.apply("x"), "z");
    }

    #[test]
    fn test_phase_filter() {
        let rules = vec![
            rule("pre-only", "a", "b", RegexPhase::Pre, 0),
            rule("post-only", "a", "c", RegexPhase::Post, 1),
        ];
        let pipeline = RegexPipeline::build(RegexPhase::Post, &rules, &[]);
        assert_eq!(pipeline.apply("a"), "c");
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let mut disabled = rule("off", "a", "b", RegexPhase::Pre, 0);
        disabled.is_enabled = false;
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &[disabled], &[]);
        assert_eq!(pipeline.apply("a"), "a");
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let rules = vec![
            rule("broken", "(unclosed", "x", RegexPhase::Pre, 0),
            rule("fine", "a", "b", RegexPhase::Pre, 1),
        ];
        let pipeline = RegexPipeline::build(RegexPhase::Pre, &rules, &[]);
        assert_eq!(pipeline.apply("a"), "b");
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("^hello$").is_ok());
        assert!(validate_pattern("(unclosed").is_err());
    }
}
