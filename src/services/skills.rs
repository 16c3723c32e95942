//! Skill registry: skill id → prompt strategy.
//!
//! A skill knows which document type it produces, which existing documents
//! it reads, and how to phrase the request. Adding a skill is adding one
//! entry to `SkillRegistry::builtin`.

use std::collections::HashMap;
use tracing::warn;

use crate::domain::models::{normalize_doc_type, Card, Document, Persona, PersonaStats, RecipeStep, WorkspaceContext};

/// Id of the fallback skill.
pub const GENERIC_SKILL: &str = "generic";

/// Id of the skill that scores a proposal with a persona panel.
pub const JURY_SKILL: &str = "jury-evaluation";

/// Everything a skill may draw on when building its prompts.
pub struct SkillInput<'a> {
    /// Card being worked on
    pub card: &'a Card,
    /// Company context and guardrails, when the workspace has them
    pub workspace: Option<&'a WorkspaceContext>,
    /// Project documents, newest first
    pub documents: &'a [Document],
    /// Recipe step being executed, absent for single-shot programs
    pub step: Option<&'a RecipeStep>,
    /// Jury personas; only panel skills read it
    pub panel: &'a [Persona],
}

/// A prompt pair plus where the output goes.
#[derive(Debug, Clone)]
pub struct SkillPrompt {
    /// Role, workspace context and output format
    pub system_prompt: String,
    /// Card, context documents and the task
    pub user_prompt: String,
    /// Type of the document the output is saved as
    pub document_type: String,
    /// Title of that document
    pub title: String,
}

/// One prompt strategy.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Registry key
    pub id: &'static str,
    /// Output document type; empty means "derive from the step"
    pub document_type: &'static str,
    /// Title prefix for generated documents
    pub title: &'static str,
    role: &'static str,
    instructions: &'static str,
    /// Document types included as context, in this order
    reads: &'static [&'static str],
    /// Seats a persona panel in the prompt
    uses_panel: bool,
}

impl Skill {
    /// Whether this skill wants a persona panel.
    pub fn uses_panel(&self) -> bool {
        self.uses_panel
    }

    /// Builds the prompt pair for one card.
    pub fn build_prompt(&self, input: &SkillInput<'_>) -> SkillPrompt {
        let document_type = self.output_type(input.step);
        let title = match input.step {
            Some(step) if self.document_type.is_empty() => step.name.clone(),
            _ => format!("{}: {}", self.title, input.card.title),
        };

        let mut system = String::from(self.role);
        if let Some(ws) = input.workspace {
            if let Some(company) = ws.company_context.as_deref().filter(|s| !s.is_empty()) {
                system.push_str("\n\nCompany context:\n");
                system.push_str(company);
            }
            if let Some(guardrails) = ws.guardrails.as_deref().filter(|s| !s.is_empty()) {
                system.push_str("\n\nGuardrails:\n");
                system.push_str(guardrails);
            }
        }
        system.push_str("\n\nRespond with the complete document in Markdown.");

        let mut user = format!("# {}\n", input.card.title);
        if !input.card.description.is_empty() {
            user.push_str(&format!("\n{}\n", input.card.description));
        }
        for doc in self.context_documents(input.documents) {
            user.push_str(&format!("\n## Existing {} (v{})\n{}\n", doc.doc_type, doc.version, doc.content));
        }
        if self.uses_panel && !input.panel.is_empty() {
            push_panel(&mut user, input.panel);
        }
        user.push_str(&format!("\n## Task\n{}\n", self.instructions));
        if let Some(step) = input.step {
            if !step.acceptance_criteria.is_empty() || !step.verification_criteria.is_empty() {
                user.push_str("\nThe result must satisfy:\n");
                for criterion in step.acceptance_criteria.iter().chain(&step.verification_criteria) {
                    user.push_str(&format!("- {criterion}\n"));
                }
            }
        }

        SkillPrompt {
            system_prompt: system,
            user_prompt: user,
            document_type,
            title,
        }
    }

    fn output_type(&self, step: Option<&RecipeStep>) -> String {
        if let Some(explicit) = step.and_then(|s| s.document_type.as_deref()) {
            return normalize_doc_type(explicit);
        }
        if !self.document_type.is_empty() {
            return self.document_type.to_string();
        }
        step.map_or_else(|| GENERIC_SKILL.to_string(), |s| normalize_doc_type(&s.name))
    }

    fn context_documents<'d>(&self, documents: &'d [Document]) -> Vec<&'d Document> {
        if self.reads.is_empty() {
            // no declared inputs: every document is context
            return documents.iter().collect();
        }
        self.reads
            .iter()
            .filter_map(|t| documents.iter().find(|d| d.is_type(t)))
            .collect()
    }
}

fn push_panel(user: &mut String, panel: &[Persona]) {
    let stats = PersonaStats::of(panel);
    let skeptics = stats.by_adoption.get("skeptic").map_or(0, |s| s.count);
    user.push_str(&format!(
        "\n## Jury panel\nScore as this panel of {} reviewers ({skeptics} skeptics). \
         Weigh each reviewer's view, then give one combined score.\n",
        stats.total
    ));
    for persona in panel {
        let name = if persona.name.is_empty() { &persona.id } else { &persona.name };
        user.push_str(&format!("- {name} ({}, {})", persona.archetype_id, persona.stage()));
        if let Some(role) = persona.role.as_deref().filter(|r| !r.is_empty()) {
            user.push_str(&format!(": {role}"));
        }
        user.push('\n');
    }
}

/// Skills by id, with `generic` as the fallback.
pub struct SkillRegistry {
    skills: HashMap<&'static str, Skill>,
    fallback: Skill,
}

impl SkillRegistry {
    /// The built-in skills.
    pub fn builtin() -> Self {
        let skills = [
            Skill {
                id: "research",
                document_type: "research",
                title: "Research",
                role: "You are a product researcher. You synthesize user problems, market context and open questions.",
                instructions: "Write a research brief with sections: Problem, Users, Market, Risks, Open Questions.",
                reads: &[],
                uses_panel: false,
            },
            Skill {
                id: "prd-writer",
                document_type: "prd",
                title: "PRD",
                role: "You are a senior product manager writing a product requirements document.",
                instructions: "Write a PRD with sections: Problem, Goals, Users, Requirements, Success Metrics, Out of Scope.",
                reads: &["research"],
                uses_panel: false,
            },
            Skill {
                id: "design-brief",
                document_type: "design_brief",
                title: "Design Brief",
                role: "You are a product designer turning requirements into a design brief.",
                instructions: "Write a design brief with sections: Context, User Flows, Key Screens, Constraints.",
                reads: &["prd", "research"],
                uses_panel: false,
            },
            Skill {
                id: "prototype-spec",
                document_type: "prototype_spec",
                title: "Prototype Spec",
                role: "You are a prototyping engineer specifying a clickable prototype.",
                instructions: "Write a prototype spec with sections: Scope, Screens, Interactions, Data.",
                reads: &["prd", "design_brief"],
                uses_panel: false,
            },
            Skill {
                id: JURY_SKILL,
                document_type: "jury_evaluation",
                title: "Jury Evaluation",
                role: "You are a panel of skeptical reviewers scoring a product proposal.",
                instructions: "Evaluate the proposal. Give strengths, concerns, then end with a JSON object \
                               {\"score\": <0-100>, \"verdict\": \"proceed\"|\"pivot\"|\"kill\"}.",
                reads: &["prd", "design_brief", "prototype_spec"],
                uses_panel: true,
            },
            Skill {
                id: "ticket-writer",
                document_type: "tickets",
                title: "Tickets",
                role: "You are a tech lead breaking a PRD into engineering tickets.",
                instructions: "Write tickets, each with a title, description and acceptance criteria.",
                reads: &["prd", "design_brief"],
                uses_panel: false,
            },
            Skill {
                id: GENERIC_SKILL,
                document_type: "",
                title: "Document",
                role: "You are a careful product team assistant.",
                instructions: "Produce the document this task asks for, using the existing documents as context.",
                reads: &[],
                uses_panel: false,
            },
        ];
        let fallback = skills[skills.len() - 1].clone();
        Self {
            skills: skills.into_iter().map(|s| (s.id, s)).collect(),
            fallback,
        }
    }

    /// The named skill, if registered.
    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    /// The named skill, or `generic` when the id is unknown.
    pub fn resolve(&self, id: &str) -> &Skill {
        if let Some(skill) = self.skills.get(id) {
            return skill;
        }
        warn!(skill_id = id, "Unknown skill, using generic");
        &self.fallback
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.skills.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
