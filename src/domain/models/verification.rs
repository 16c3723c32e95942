//! Verification and gate result types, plus criterion parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalize a document type for comparison: lowercase, with spaces and
/// hyphens folded into underscores.
pub fn normalize_doc_type(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Pattern half of a `content:` criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPattern {
    /// `/pattern/flags`
    Regex { pattern: String, flags: String },
    /// Anything else, matched case-insensitively as a substring
    Literal(String),
}

/// A parsed verification criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    /// `file:<type>`
    FileExists(String),
    /// `sections:<A,B,...>`
    Sections(Vec<String>),
    /// `content:<pattern>`
    Content(ContentPattern),
    /// `ai:<text>`, or any criterion without a recognized prefix
    Ai(String),
}

impl Criterion {
    /// Parse a criterion string by prefix. Unknown prefixes are treated as
    /// AI-adjudicated text in full.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let Some((prefix, rest)) = trimmed.split_once(':') else {
            return Self::Ai(trimmed.to_string());
        };
        let rest = rest.trim();
        match prefix.trim().to_lowercase().as_str() {
            "file" => Self::FileExists(normalize_doc_type(rest)),
            "sections" => Self::Sections(
                rest.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            "content" => Self::Content(parse_content_pattern(rest)),
            "ai" => Self::Ai(rest.to_string()),
            _ => Self::Ai(trimmed.to_string()),
        }
    }

    /// Short name of the check kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileExists(_) => "file",
            Self::Sections(_) => "sections",
            Self::Content(_) => "content",
            Self::Ai(_) => "ai",
        }
    }
}

fn parse_content_pattern(rest: &str) -> ContentPattern {
    if rest.len() >= 2 && rest.starts_with('/') {
        if let Some(end) = rest.rfind('/') {
            if end > 0 {
                let flags = &rest[end + 1..];
                if flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'g' | 'u' | 'x')) {
                    return ContentPattern::Regex {
                        pattern: rest[1..end].to_string(),
                        flags: flags.to_string(),
                    };
                }
            }
        }
    }
    ContentPattern::Literal(rest.to_string())
}

/// Outcome of one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    /// The criterion as written
    pub criterion: String,
    /// Whether it held
    pub passed: bool,
    /// What was found
    pub evidence: String,
}

impl CriterionResult {
    /// Passing result.
    pub fn pass(criterion: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            passed: true,
            evidence: evidence.into(),
        }
    }

    /// Failing result.
    pub fn fail(criterion: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            passed: false,
            evidence: evidence.into(),
        }
    }
}

/// Per-task verification record, aggregated into run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskVerificationResult {
    /// Task the criteria belong to
    pub task_name: String,
    /// True when every criterion passed
    pub passed: bool,
    /// One entry per criterion
    pub criteria_results: Vec<CriterionResult>,
    /// When verification ran
    pub verified_at: DateTime<Utc>,
    /// Commit made for the task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

impl TaskVerificationResult {
    /// `passed` is true only when every criterion passed.
    pub fn from_results(task_name: impl Into<String>, criteria_results: Vec<CriterionResult>) -> Self {
        Self {
            task_name: task_name.into(),
            passed: criteria_results.iter().all(|r| r.passed),
            criteria_results,
            verified_at: Utc::now(),
            commit_hash: None,
        }
    }

    /// Criteria that did not pass.
    pub fn failed_criteria(&self) -> Vec<&str> {
        self.criteria_results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.criterion.as_str())
            .collect()
    }
}

/// Outcome of one stage gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate id
    pub gate_id: String,
    /// Gate type name
    pub gate_type: String,
    /// Whether it passed
    pub passed: bool,
    /// Whether it was required
    pub required: bool,
    /// Explanation
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_known_prefixes() {
        assert_eq!(Criterion::parse("file:PRD"), Criterion::FileExists("prd".into()));
        assert_eq!(
            Criterion::parse("file: Design Brief"),
            Criterion::FileExists("design_brief".into())
        );
        assert_eq!(
            Criterion::parse("sections: Problem , Goals,"),
            Criterion::Sections(vec!["Problem".into(), "Goals".into()])
        );
        assert_eq!(
            Criterion::parse("content:/foo/i"),
            Criterion::Content(ContentPattern::Regex {
                pattern: "foo".into(),
                flags: "i".into()
            })
        );
        assert_eq!(
            Criterion::parse("content:a/b"),
            Criterion::Content(ContentPattern::Literal("a/b".into()))
        );
        assert_eq!(
            Criterion::parse("ai:Personas are grounded"),
            Criterion::Ai("Personas are grounded".into())
        );
    }

    #[test]
    fn test_unprefixed_defaults_to_ai() {
        assert_eq!(
            Criterion::parse("The PRD names a success metric"),
            Criterion::Ai("The PRD names a success metric".into())
        );
        assert_eq!(
            Criterion::parse("note: mention pricing"),
            Criterion::Ai("note: mention pricing".into())
        );
    }

    #[test]
    fn test_aggregate_requires_all() {
        let result = TaskVerificationResult::from_results(
            "draft",
            vec![
                CriterionResult::pass("file:prd", "found"),
                CriterionResult::fail("sections:Goals", "missing"),
            ],
        );
        assert!(!result.passed);
        assert_eq!(result.failed_criteria(), vec!["sections:Goals"]);
        assert_eq!(result.criteria_results.len(), 2);

        let empty = TaskVerificationResult::from_results("noop", vec![]);
        assert!(empty.passed);
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in ".*") {
            let _ = Criterion::parse(&s);
        }

        #[test]
        fn prop_file_type_is_normalized(t in "[A-Za-z][A-Za-z -]{0,20}") {
            match Criterion::parse(&format!("file:{t}")) {
                Criterion::FileExists(normalized) => {
                    prop_assert!(!normalized.contains(' '));
                    prop_assert!(!normalized.contains('-'));
                    prop_assert_eq!(normalized.clone(), normalized.to_lowercase());
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
