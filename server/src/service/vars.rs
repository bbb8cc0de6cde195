use std::collections::HashMap;

use chrono::Local;
use rand::{rngs::StdRng, Rng, SeedableRng};

// Directive expansion is bounded so that values spliced back into the buffer
// can never keep the scanner busy forever.
const MAX_EXPANSIONS: usize = 1000;

/// Mutable state shared by every directive evaluated during one request:
/// the `setvar`/`getvar` bindings and the seeded RNG behind `roll` and
/// `random`. Created fresh per request and discarded afterwards.
pub struct VarScope {
    vars: HashMap<String, String>,
    rng: StdRng,
}

impl VarScope {
    pub fn new(seed: u64) -> Self {
        Self {
            vars: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Expands every recognized `{{…}}` directive in `input`, innermost
    /// first, in a single left-to-right pass. Unrecognized directives are
    /// left verbatim.
    pub fn expand(&mut self, input: &str) -> String {
        let mut buffer = input.to_string();
        let mut cursor = 0usize;
        let mut expansions = 0usize;

        while expansions < MAX_EXPANSIONS {
            let close = match buffer[cursor..].find("}}") {
                Some(rel) => cursor + rel,
                None => break,
            };
            let open = match buffer[..close].rfind("{{") {
                Some(pos) => pos,
                None => {
                    cursor = close + 2;
                    continue;
                }
            };

            let body = buffer[open + 2..close].to_string();
            match self.evaluate(&body) {
                Some(replacement) => {
                    buffer.replace_range(open..close + 2, &replacement);
                    // Rescan from the splice point so an enclosing directive
                    // can complete with the inner result in place.
                    cursor = open;
                    expansions += 1;
                }
                None => {
                    cursor = close + 2;
                }
            }
        }

        buffer
    }

    // Returns None for anything outside the closed directive set; the caller
    // keeps the original text in that case.
    fn evaluate(&mut self, raw: &str) -> Option<String> {
        let body = raw.trim();

        if body.starts_with('#') {
            return Some(String::new());
        }

        if body.contains("::") {
            let mut parts = body.split("::");
            let keyword = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let args: Vec<&str> = parts.collect();
            return match keyword.as_str() {
                "random" if !args.is_empty() => {
                    let pick = args[self.rng.random_range(0..args.len())];
                    Some(pick.to_string())
                }
                "setvar" if args.len() >= 2 => {
                    let name = args[0].trim().to_string();
                    let value = args[1..].join("::");
                    self.vars.insert(name, value);
                    Some(String::new())
                }
                "getvar" if !args.is_empty() => {
                    let name = args[0].trim();
                    Some(self.vars.get(name).cloned().unwrap_or_default())
                }
                _ => None,
            };
        }

        let lowered = body.to_ascii_lowercase();
        match lowered.as_str() {
            "date" => return Some(Local::now().format("%Y-%m-%d").to_string()),
            "time" => return Some(Local::now().format("%H:%M:%S").to_string()),
            _ => {}
        }

        if let Some(rest) = lowered.strip_prefix("roll") {
            if rest.starts_with(char::is_whitespace) {
                return self.evaluate_roll(rest.trim());
            }
        }

        None
    }

    fn evaluate_roll(&mut self, spec: &str) -> Option<String> {
        let (count, faces) = match spec.split_once('d') {
            Some((n, m)) => (n.trim().parse::<u32>().ok()?, m.trim().parse::<u32>().ok()?),
            None => (1, spec.parse::<u32>().ok()?),
        };
        if count == 0 || faces == 0 {
            return None;
        }

        let mut total: u64 = 0;
        for _ in 0..count {
            total += u64::from(self.rng.random_range(1..=faces));
        }
        Some(total.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> VarScope {
        VarScope::new(42)
    }

    #[test]
    fn test_roll_one_sided_die_is_always_one() {
        let mut scope = scope();
        for _ in 0..20 {
            assert_eq!(scope.expand("{{roll 1d1}}"), "1");
        }
    }

    #[test]
    fn test_roll_shorthand() {
        let mut scope = scope();
        let value: u32 = scope.expand("{{roll 6}}").parse().unwrap();
        assert!((1..=6).contains(&value));
    }

    #[test]
    fn test_roll_sum_in_range() {
        let mut scope = scope();
        let value: u32 = scope.expand("{{roll 3d6}}").parse().unwrap();
        assert!((3..=18).contains(&value));
    }

    #[test]
    fn test_random_single_alternative() {
        let mut scope = scope();
        assert_eq!(scope.expand("{{random::X}}"), "X");
    }

    #[test]
    fn test_random_picks_among_alternatives() {
        let mut scope = scope();
        let picked = scope.expand("{{random::a::b::c}}");
        assert!(["a", "b", "c"].contains(&picked.as_str()));
    }

    #[test]
    fn test_same_seed_same_output() {
        let input = "{{roll 10d20}} {{random::x::y::z}} {{roll 100}}";
        let first = VarScope::new(7).expand(input);
        let second = VarScope::new(7).expand(input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_setvar_getvar_roundtrip() {
        let mut scope = scope();
        assert_eq!(scope.expand("{{setvar::name::Alice}}"), "");
        assert_eq!(scope.expand("Hello {{getvar::name}}"), "Hello Alice");
    }

    #[test]
    fn test_setvar_value_may_contain_delimiter() {
        let mut scope = scope();
        scope.expand("{{setvar::path::a::b::c}}");
        assert_eq!(scope.expand("{{getvar::path}}"), "a::b::c");
    }

    #[test]
    fn test_getvar_unset_is_empty() {
        let mut scope = scope();
        assert_eq!(scope.expand("[{{getvar::missing}}]"), "[]");
    }

    #[test]
    fn test_comment_expands_to_empty() {
        let mut scope = scope();
        assert_eq!(scope.expand("a{{# anything at all}}b"), "ab");
    }

    #[test]
    fn test_date_format() {
        let mut scope = scope();
        let out = scope.expand("{{date}}");
        assert_eq!(out.len(), 10);
        assert_eq!(out.as_bytes()[4], b'-');
        assert_eq!(out.as_bytes()[7], b'-');
    }

    #[test]
    fn test_time_format() {
        let mut scope = scope();
        let out = scope.expand("{{time}}");
        assert_eq!(out.len(), 8);
        assert_eq!(out.as_bytes()[2], b':');
        assert_eq!(out.as_bytes()[5], b':');
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let mut scope = scope();
        assert_eq!(scope.expand("{{ROLL 1d1}}"), "1");
        assert_eq!(scope.expand("{{Random::only}}"), "only");
    }

    #[test]
    fn test_whitespace_tolerant() {
        let mut scope = scope();
        assert_eq!(scope.expand("{{  roll 1d1  }}"), "1");
    }

    #[test]
    fn test_unrecognized_directive_left_verbatim() {
        let mut scope = scope();
        assert_eq!(scope.expand("{{frobnicate}}"), "{{frobnicate}}");
        assert_eq!(scope.expand("{{roll abc}}"), "{{roll abc}}");
    }

    #[test]
    fn test_nested_innermost_first() {
        let mut scope = scope();
        scope.expand("{{setvar::sides::1d1}}");
        assert_eq!(scope.expand("{{roll {{getvar::sides}}}}"), "1");
    }

    #[test]
    fn test_plain_text_untouched() {
        let mut scope = scope();
        assert_eq!(scope.expand("no directives here"), "no directives here");
        assert_eq!(scope.expand("stray }} and {{ braces"), "stray }} and {{ braces");
    }
}
