//! Jury personas: the synthetic reviewers a validate-stage jury is drawn from.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Where a persona sits on the AI adoption curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdoptionStage {
    /// Distrusts AI tooling
    Skeptic,
    /// Interested but unconvinced
    #[default]
    Curious,
    /// Already uses AI tools by choice
    EarlyAdopter,
    /// Builds workflows around AI tools
    PowerUser,
}

impl AdoptionStage {
    /// Stages in adoption order.
    pub const ALL: [Self; 4] = [Self::Skeptic, Self::Curious, Self::EarlyAdopter, Self::PowerUser];

    /// Wire name, as used in persona files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skeptic => "skeptic",
            Self::Curious => "curious",
            Self::EarlyAdopter => "early-adopter",
            Self::PowerUser => "power-user",
        }
    }

    /// Lenient parse: unknown names count as `curious`.
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value.trim()))
            .unwrap_or_default()
    }

    /// The stage one step toward `toward_later` (or earlier), clamped at the ends.
    pub fn neighbour(self, toward_later: bool) -> Self {
        let index = Self::ALL.iter().position(|s| *s == self).unwrap_or(1);
        let next = if index == 0 {
            1
        } else if index == Self::ALL.len() - 1 {
            index - 1
        } else if toward_later {
            index + 1
        } else {
            index - 1
        };
        Self::ALL[next]
    }
}

impl std::fmt::Display for AdoptionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AdoptionStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Attitude scores, each in `0.0..=1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Psychographics {
    /// Position on the adoption curve
    #[serde(default)]
    pub ai_adoption_stage: AdoptionStage,
    /// Willingness to rely on AI output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_in_ai: Option<f64>,
    /// Weariness of yet another tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_fatigue: Option<f64>,
    /// Willingness to invest in learning a tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patience_for_learning: Option<f64>,
    /// Comfort with dense or configurable products
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_tolerance: Option<f64>,
    /// Reluctance to move data or habits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_sensitivity: Option<f64>,
}

impl Psychographics {
    /// Mutable access to every score that is set.
    pub fn scores_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        [
            &mut self.trust_in_ai,
            &mut self.tool_fatigue,
            &mut self.patience_for_learning,
            &mut self.complexity_tolerance,
            &mut self.migration_sensitivity,
        ]
        .into_iter()
        .flatten()
    }
}

/// One synthetic reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique within a batch
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Archetype the persona was generated from
    #[serde(default = "unknown_archetype")]
    pub archetype_id: String,
    /// Job title or one-line background
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Attitude scores
    #[serde(default)]
    pub psychographics: Psychographics,
}

fn unknown_archetype() -> String {
    "unknown".to_string()
}

impl Persona {
    /// A persona with no scores.
    pub fn new(id: impl Into<String>, archetype_id: impl Into<String>, stage: AdoptionStage) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            archetype_id: archetype_id.into(),
            role: None,
            psychographics: Psychographics {
                ai_adoption_stage: stage,
                ..Psychographics::default()
            },
        }
    }

    /// Shorthand for the adoption stage.
    pub fn stage(&self) -> AdoptionStage {
        self.psychographics.ai_adoption_stage
    }

    /// Whether this persona counts toward the skeptic floor.
    pub fn is_skeptic(&self) -> bool {
        self.stage() == AdoptionStage::Skeptic
    }
}

/// Count and share of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Share {
    /// Personas in the bucket
    pub count: usize,
    /// Percentage of the total, one decimal
    pub percent: f64,
}

/// Distribution of a persona list by archetype and adoption stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersonaStats {
    /// Personas counted
    pub total: usize,
    /// Keyed by archetype id
    pub by_archetype: BTreeMap<String, Share>,
    /// Keyed by adoption stage name
    pub by_adoption: BTreeMap<String, Share>,
}

impl PersonaStats {
    /// Tallies `personas`.
    pub fn of(personas: &[Persona]) -> Self {
        let total = personas.len();
        let mut archetypes: BTreeMap<String, usize> = BTreeMap::new();
        let mut stages: BTreeMap<String, usize> = BTreeMap::new();
        for persona in personas {
            *archetypes.entry(persona.archetype_id.clone()).or_default() += 1;
            *stages.entry(persona.stage().as_str().to_string()).or_default() += 1;
        }
        let share = |count: usize| Share {
            count,
            percent: percent(count, total),
        };
        Self {
            total,
            by_archetype: archetypes.into_iter().map(|(k, v)| (k, share(v))).collect(),
            by_adoption: stages.into_iter().map(|(k, v)| (k, share(v))).collect(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}
