//! Verification Engine: evaluates a task's criteria against the current
//! project documents.
//!
//! Deterministic kinds (`file`, `sections`, `content`) are checked locally.
//! `ai` criteria are adjudicated by the execution provider and fail closed
//! whenever the judgment cannot be obtained or parsed.

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::models::{
    ContentPattern, Criterion, CriterionResult, Document, ExecutionContext, ExecutionRequest,
    LogLevel, RecipeStep, TaskVerificationResult, WorkspaceContext,
};
use crate::domain::ports::{ExecutionProvider, RunCallbacks};

/// What the checks run against.
pub struct VerificationContext<'a> {
    /// Documents the criteria are checked against
    pub documents: &'a [Document],
    /// Workspace context passed to the model check
    pub workspace: Option<&'a WorkspaceContext>,
    /// Provider settings for the model check
    pub execution: ExecutionContext,
}

/// Checks acceptance criteria, structurally first and by model for the rest.
pub struct VerificationEngine {
    provider: Arc<dyn ExecutionProvider>,
    excerpt_chars: usize,
}

impl VerificationEngine {
    /// An engine that checks free-form criteria with `provider`.
    pub fn new(provider: Arc<dyn ExecutionProvider>, excerpt_chars: usize) -> Self {
        Self {
            provider,
            excerpt_chars,
        }
    }

    /// Check every criterion of `step`. Evidence is kept for all of them.
    pub async fn verify_task(
        &self,
        step: &RecipeStep,
        ctx: &VerificationContext<'_>,
        callbacks: &dyn RunCallbacks,
    ) -> TaskVerificationResult {
        let mut results = Vec::with_capacity(step.verification_criteria.len());
        for raw in &step.verification_criteria {
            let result = self.check(raw, ctx, callbacks).await;
            debug!(task = %step.name, criterion = %raw, passed = result.passed, "Criterion checked");
            results.push(result);
        }
        TaskVerificationResult::from_results(step.name.clone(), results)
    }

    /// Check one raw criterion string.
    pub async fn check(
        &self,
        raw: &str,
        ctx: &VerificationContext<'_>,
        callbacks: &dyn RunCallbacks,
    ) -> CriterionResult {
        let documents = newest_first(ctx.documents);
        match Criterion::parse(raw) {
            Criterion::FileExists(doc_type) => check_file_exists(raw, &doc_type, &documents),
            Criterion::Sections(sections) => check_sections(raw, &sections, &documents),
            Criterion::Content(pattern) => check_content(raw, &pattern, &documents),
            Criterion::Ai(text) => self.check_ai(raw, &text, &documents, ctx, callbacks).await,
        }
    }

    async fn check_ai(
        &self,
        raw: &str,
        criterion: &str,
        documents: &[&Document],
        ctx: &VerificationContext<'_>,
        callbacks: &dyn RunCallbacks,
    ) -> CriterionResult {
        if documents.is_empty() {
            return CriterionResult::fail(raw, "No documents available to evaluate");
        }

        let request = ExecutionRequest::new(
            judge_system_prompt(ctx.workspace),
            self.judge_user_prompt(criterion, documents),
            ctx.execution.clone(),
        )
        .with_max_tokens(1024)
        .with_step_key("verify:ai");

        let outcome = match self.provider.execute(request, callbacks).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "AI verification call failed");
                return CriterionResult::fail(raw, format!("AI check could not run: {e}"));
            }
        };
        if !outcome.success {
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            return CriterionResult::fail(raw, format!("AI check failed: {error}"));
        }

        match parse_judgment(outcome.output_text()) {
            Some(judgment) => {
                let evidence = judgment
                    .evidence
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "No evidence given".to_string());
                CriterionResult {
                    criterion: raw.to_string(),
                    passed: judgment.passed,
                    evidence,
                }
            }
            None => {
                callbacks
                    .on_log(LogLevel::Warn, "AI verdict was not parseable, treating as failed", Some("verify:ai"))
                    .await;
                CriterionResult::fail(raw, "Unparseable AI verdict")
            }
        }
    }

    fn judge_user_prompt(&self, criterion: &str, documents: &[&Document]) -> String {
        let mut prompt = format!("Criterion:\n{criterion}\n\nDocuments:\n");
        for doc in documents {
            prompt.push_str(&format!(
                "\n### {} ({}, v{})\n{}\n",
                doc.title,
                doc.doc_type,
                doc.version,
                excerpt(&doc.content, self.excerpt_chars)
            ));
        }
        prompt
    }
}

fn judge_system_prompt(workspace: Option<&WorkspaceContext>) -> String {
    let mut prompt = String::from(
        "You are a strict reviewer verifying whether project documents satisfy an acceptance criterion.\n\
         Judge only from the documents provided. If the evidence is missing, vague or partial, the criterion is not met.\n\
         Respond with a single JSON object and nothing else: {\"passed\": true|false, \"evidence\": \"<quote or reason>\"}.",
    );
    if let Some(ws) = workspace {
        if let Some(company) = ws.company_context.as_deref().filter(|s| !s.is_empty()) {
            prompt.push_str("\n\nCompany context:\n");
            prompt.push_str(company);
        }
        if let Some(guardrails) = ws.guardrails.as_deref().filter(|s| !s.is_empty()) {
            prompt.push_str("\n\nPersona and guardrails:\n");
            prompt.push_str(guardrails);
        }
    }
    prompt
}

fn newest_first(documents: &[Document]) -> Vec<&Document> {
    let mut sorted: Vec<&Document> = documents.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.version.cmp(&a.version)));
    sorted
}

/// First `max_chars` characters, marked when cut.
fn excerpt(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[truncated]", &content[..idx]),
        None => content.to_string(),
    }
}

/// Passes when a document of `doc_type` exists.
pub fn check_file_exists(raw: &str, doc_type: &str, documents: &[&Document]) -> CriterionResult {
    if let Some(doc) = documents.iter().find(|d| d.is_type(doc_type)) {
        return CriterionResult::pass(raw, format!("Found {} document \"{}\" (v{})", doc.doc_type, doc.title, doc.version));
    }
    let available: Vec<&str> = documents.iter().map(|d| d.doc_type.as_str()).collect();
    let available = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    CriterionResult::fail(raw, format!("No {doc_type} document. Available: {available}"))
}

fn section_regex(section: &str) -> Option<Regex> {
    let pattern = format!(r"^#{{1,6}}[ \t]+(?:\d+[.)][ \t]*)?{}(?:\W|$)", regex::escape(section.trim()));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .ok()
}

/// Passes when the newest document has every heading in `sections`.
pub fn check_sections(raw: &str, sections: &[String], documents: &[&Document]) -> CriterionResult {
    if sections.is_empty() {
        return CriterionResult::fail(raw, "No sections specified");
    }
    let patterns: Vec<(&str, Option<Regex>)> = sections
        .iter()
        .map(|s| (s.as_str(), section_regex(s)))
        .collect();

    let mut partial: Option<(&Document, Vec<&str>)> = None;
    for doc in documents {
        let missing: Vec<&str> = patterns
            .iter()
            .filter(|(_, re)| !re.as_ref().is_some_and(|re| re.is_match(&doc.content)))
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            return CriterionResult::pass(
                raw,
                format!("All sections present in {} (v{})", doc.doc_type, doc.version),
            );
        }
        if partial.is_none() && missing.len() < sections.len() {
            partial = Some((doc, missing));
        }
    }

    match partial {
        Some((doc, missing)) => CriterionResult::fail(
            raw,
            format!("{} (v{}) is missing sections: {}", doc.doc_type, doc.version, missing.join(", ")),
        ),
        None => CriterionResult::fail(raw, format!("No document contains sections: {}", sections.join(", "))),
    }
}

fn content_regex(pattern: &ContentPattern) -> Result<Regex, regex::Error> {
    match pattern {
        ContentPattern::Regex { pattern, flags } => RegexBuilder::new(pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build(),
        ContentPattern::Literal(text) => RegexBuilder::new(&regex::escape(text))
            .case_insensitive(true)
            .build(),
    }
}

/// Passes when any document matches the pattern.
pub fn check_content(raw: &str, pattern: &ContentPattern, documents: &[&Document]) -> CriterionResult {
    let re = match content_regex(pattern) {
        Ok(re) => re,
        Err(e) => return CriterionResult::fail(raw, format!("Invalid pattern: {e}")),
    };
    match documents
        .iter()
        .find_map(|doc| re.find(&doc.content).map(|m| (doc, m.as_str())))
    {
        Some((doc, matched)) => CriterionResult::pass(
            raw,
            format!("Matched \"{}\" in {} (v{})", excerpt(matched, 80), doc.doc_type, doc.version),
        ),
        None => CriterionResult::fail(raw, format!("Pattern not found in {} document(s)", documents.len())),
    }
}

#[derive(Debug, Deserialize)]
struct Judgment {
    passed: bool,
    #[serde(default)]
    evidence: Option<String>,
}

/// First JSON object in `text` that deserializes as `T`. Prose or code
/// fences around it are ignored.
pub(crate) fn first_json_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    text.match_indices('{').find_map(|(start, _)| {
        let value = serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Value>()
            .next()?
            .ok()?;
        serde_json::from_value::<T>(value).ok()
    })
}

fn parse_judgment(text: &str) -> Option<Judgment> {
    first_json_object(text)
}
