use serde::{Deserialize, Serialize};

/// What a caller looks for, what the device sent, and what a waiter receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    Scalar(String),
    Sequence(Vec<String>),
}

impl Pattern {
    /// True when `subject` satisfies this pattern.
    ///
    /// Non-strict scalars match when the subject contains the pattern (as a
    /// substring of a scalar or an element of a sequence). Sequences need
    /// equal length and a positional match of every element.
    pub fn matches(&self, subject: &Pattern, strict: bool) -> bool {
        match (self, subject) {
            (Pattern::Scalar(p), Pattern::Scalar(s)) => element_matches(p, s, strict),
            (Pattern::Scalar(p), Pattern::Sequence(s)) => !strict && s.iter().any(|e| e == p),
            (Pattern::Sequence(p), Pattern::Sequence(s)) => {
                p.len() == s.len() && p.iter().zip(s).all(|(p, s)| element_matches(p, s, strict))
            }
            (Pattern::Sequence(_), Pattern::Scalar(_)) => false,
        }
    }
}

fn element_matches(pattern: &str, subject: &str, strict: bool) -> bool {
    if strict {
        pattern == subject
    } else {
        subject.contains(pattern)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Scalar(s) => write!(f, "{}", s),
            Pattern::Sequence(s) => write!(f, "[{}]", s.join(",")),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Scalar(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Scalar(s)
    }
}

impl From<Vec<String>> for Pattern {
    fn from(v: Vec<String>) -> Self {
        Pattern::Sequence(v)
    }
}

impl From<Vec<&str>> for Pattern {
    fn from(v: Vec<&str>) -> Self {
        Pattern::Sequence(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Pattern {
    fn from(v: [&str; N]) -> Self {
        Pattern::Sequence(v.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaiterState {
    Pending,
    Fulfilled,
    Rejected,
}

impl WaiterState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WaiterState::Pending)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub items_created: u64,
    pub waiters_added: u64,
    pub waiters_coalesced: u64,
    pub items_completed: u64,
    pub waiters_resolved: u64,
    pub unmatched_subjects: u64,
    pub waiters_pruned: u64,
    pub waiters_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_substring_vs_strict() {
        let p = Pattern::from("lo");
        assert!(p.matches(&Pattern::from("hello"), false));
        assert!(!p.matches(&Pattern::from("hello"), true));
        assert!(p.matches(&Pattern::from("lo"), true));
        // subject must contain the pattern, not the other way round
        assert!(!Pattern::from("hello").matches(&Pattern::from("lo"), false));
    }

    #[test]
    fn test_sequence_positional_match() {
        let p = Pattern::from(["a", "b"]);
        assert!(p.matches(&Pattern::from(["a", "b"]), true));
        assert!(p.matches(&Pattern::from(["a", "b"]), false));
        assert!(!p.matches(&Pattern::from(["a", "b", "c"]), false));
        assert!(!p.matches(&Pattern::from(["b", "a"]), false));
        assert!(!p.matches(&Pattern::from("ab"), false));
        assert!(p.matches(&Pattern::from(["xa", "by"]), false));
        assert!(!p.matches(&Pattern::from(["xa", "by"]), true));
    }

    #[test]
    fn test_scalar_against_sequence_subject() {
        let subject = Pattern::from(["status", "ok"]);
        assert!(Pattern::from("status").matches(&subject, false));
        assert!(!Pattern::from("stat").matches(&subject, false));
        assert!(!Pattern::from("status").matches(&subject, true));
    }

    #[test]
    fn test_pattern_json_is_untagged() {
        let p: Pattern = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(p, Pattern::from(["a", "b"]));
        assert_eq!(serde_json::to_string(&Pattern::from("x")).unwrap(), r#""x""#);
    }
}
