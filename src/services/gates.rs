//! Stage gate evaluation.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::models::{Document, GateDefinition, GateResult, GateType};

use super::verification::{check_file_exists, check_sections, first_json_object};

/// Aggregate of one stage's gate results.
#[derive(Debug, Clone, Default)]
pub struct GateSummary {
    /// One result per evaluated gate, in definition order
    pub results: Vec<GateResult>,
}

impl GateSummary {
    /// Whether any gate failed, required or not.
    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| !r.passed)
    }

    /// Ids of required gates that failed.
    pub fn failed_required(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.required && !r.passed)
            .map(|r| r.gate_id.as_str())
            .collect()
    }
}

/// Structured output of the validate stage's jury.
#[derive(Debug, Clone, Deserialize)]
pub struct JuryEvaluation {
    /// Overall score, 0 to 100
    pub score: f64,
    /// `proceed`, `pivot` or `kill` when the jury gave one
    #[serde(default)]
    pub verdict: Option<String>,
}

/// Scores documents against stage gates.
#[derive(Debug, Clone, Default)]
pub struct GateEvaluator;

impl GateEvaluator {
    /// An evaluator with no state.
    pub fn new() -> Self {
        Self
    }

    /// Evaluates every gate against the documents it names.
    pub fn evaluate_all(&self, gates: &[GateDefinition], documents: &[Document]) -> GateSummary {
        let mut newest: Vec<&Document> = documents.iter().collect();
        newest.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        GateSummary {
            results: gates.iter().map(|g| self.evaluate(g, &newest)).collect(),
        }
    }

    /// Evaluates one gate. A gate with no matching document fails.
    pub fn evaluate(&self, gate: &GateDefinition, documents: &[&Document]) -> GateResult {
        let (passed, detail) = match gate.gate_type {
            GateType::FileExists => match config_str(&gate.config, &["document_type", "documentType", "type"]) {
                Some(doc_type) => {
                    let result = check_file_exists(&gate.id, doc_type, documents);
                    (result.passed, result.evidence)
                }
                None => (false, "Gate has no document_type configured".to_string()),
            },
            GateType::SectionsExist => {
                let sections = config_list(&gate.config, "sections");
                let scoped: Vec<&Document> = match config_str(&gate.config, &["document_type", "documentType"]) {
                    Some(doc_type) => documents.iter().copied().filter(|d| d.is_type(doc_type)).collect(),
                    None => documents.to_vec(),
                };
                let result = check_sections(&gate.id, &sections, &scoped);
                (result.passed, result.evidence)
            }
            GateType::JuryScore => jury_score(&gate.config, documents),
            GateType::Custom => (true, "No deterministic check; passed".to_string()),
        };

        let message = if passed {
            gate.messages.pass.clone().unwrap_or(detail)
        } else {
            match &gate.messages.fail {
                Some(custom) => format!("{custom} ({detail})"),
                None => detail,
            }
        };
        GateResult {
            gate_id: gate.id.clone(),
            gate_type: gate.gate_type.as_str().to_string(),
            passed,
            required: gate.required,
            message,
        }
    }
}

fn config_str<'a>(config: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| config.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// A list given as a JSON array or a comma-separated string.
fn config_list(config: &Value, key: &str) -> Vec<String> {
    match config.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Threshold and verdict check against the newest evaluation document.
fn jury_score(config: &Value, documents: &[&Document]) -> (bool, String) {
    let doc_type = config_str(config, &["document_type", "documentType"]).unwrap_or("jury_evaluation");
    let Some(doc) = documents.iter().find(|d| d.is_type(doc_type)) else {
        return (false, format!("No {doc_type} document to score"));
    };
    let Some(evaluation) = first_json_object::<JuryEvaluation>(&doc.content) else {
        return (false, format!("{} has no structured score", doc.doc_type));
    };

    let threshold = config
        .get("min_score")
        .or_else(|| config.get("threshold"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if evaluation.score < threshold {
        return (false, format!("Score {} below threshold {threshold}", evaluation.score));
    }

    let accepted = config_list(config, "verdicts");
    if !accepted.is_empty() {
        let verdict = evaluation.verdict.as_deref().unwrap_or_default();
        if !accepted.iter().any(|v| v.eq_ignore_ascii_case(verdict)) {
            return (
                false,
                format!("Verdict '{verdict}' not in accepted verdicts: {}", accepted.join(", ")),
            );
        }
    }
    (
        true,
        format!(
            "Score {} meets threshold {threshold}{}",
            evaluation.score,
            evaluation
                .verdict
                .map(|v| format!(", verdict {v}"))
                .unwrap_or_default()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn doc(doc_type: &str, content: &str) -> Document {
        Document::new(Uuid::nil(), doc_type, doc_type, content)
    }

    #[test]
    fn test_file_and_sections_gates() {
        let docs = vec![doc("prd", "# Problem\n# Goals\n"), doc("research", "# Risks\n")];
        let gates = vec![
            GateDefinition::new("has-prd", GateType::FileExists, json!({"document_type": "prd"})),
            GateDefinition::new(
                "prd-sections",
                GateType::SectionsExist,
                json!({"document_type": "prd", "sections": ["Problem", "Goals"]}),
            ),
            GateDefinition::new(
                "prd-risks",
                GateType::SectionsExist,
                json!({"document_type": "prd", "sections": "Risks"}),
            ),
        ];
        let summary = GateEvaluator::new().evaluate_all(&gates, &docs);
        assert!(summary.results[0].passed);
        assert!(summary.results[1].passed);
        // Risks lives in research, not the prd
        assert!(!summary.results[2].passed);
        assert_eq!(summary.failed_required(), vec!["prd-risks"]);
    }

    #[test]
    fn test_jury_score_threshold_and_verdict() {
        let docs = vec![doc(
            "jury_evaluation",
            "Panel summary:\n{\"score\": 72, \"verdict\": \"Proceed\"}",
        )];
        let evaluator = GateEvaluator::new();
        let gate = |config| GateDefinition::new("jury", GateType::JuryScore, config);

        assert!(evaluator.evaluate_all(&[gate(json!({"min_score": 70}))], &docs).results[0].passed);
        assert!(!evaluator.evaluate_all(&[gate(json!({"min_score": 80}))], &docs).results[0].passed);
        assert!(
            evaluator
                .evaluate_all(&[gate(json!({"min_score": 70, "verdicts": ["proceed"]}))], &docs)
                .results[0]
                .passed
        );
        let wrong = evaluator.evaluate_all(&[gate(json!({"verdicts": "pivot,kill"}))], &docs);
        assert!(!wrong.results[0].passed);
        assert!(wrong.results[0].message.contains("Proceed"));

        let unscored = evaluator.evaluate_all(&[gate(json!({}))], &[doc("jury_evaluation", "great!")]);
        assert!(!unscored.results[0].passed);
    }

    #[test]
    fn test_custom_passes_and_messages_apply() {
        let mut failing = GateDefinition::new("needs-brief", GateType::FileExists, json!({"document_type": "design_brief"})).optional();
        failing.messages.fail = Some("Write the brief first".to_string());
        let gates = vec![GateDefinition::new("manual", GateType::Custom, Value::Null), failing];

        let summary = GateEvaluator::new().evaluate_all(&gates, &[]);
        assert!(summary.results[0].passed);
        assert!(!summary.results[1].passed);
        assert!(summary.results[1].message.starts_with("Write the brief first"));
        assert!(summary.any_failed());
        assert!(summary.failed_required().is_empty());
    }
}
