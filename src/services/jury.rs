//! Persona panels for the validate-stage jury.
//!
//! A panel is drawn from the newest generated persona batch when it is big
//! enough. Otherwise the batch is topped up with seed personas, and then
//! with light variations of the seeds, until the pool covers the jury size.
//! The draw keeps a floor of skeptics so a panel never reads as a fan club.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::personas::InMemoryPersonaSource;
use crate::domain::errors::DomainResult;
use crate::domain::models::{JuryConfig, Persona};
use crate::domain::ports::PersonaSource;

const SCORE_JITTER: f64 = 0.15;
const STAGE_FLIP_CHANCE: f64 = 0.1;

/// Panel size and composition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JurySettings {
    /// Personas per panel
    pub jury_size: usize,
    /// Minimum share of skeptics, `0.0..=1.0`
    pub skeptic_minimum: f64,
}

impl From<&JuryConfig> for JurySettings {
    fn from(config: &JuryConfig) -> Self {
        Self {
            jury_size: config.jury_size.max(1),
            skeptic_minimum: config.skeptic_minimum.clamp(0.0, 1.0),
        }
    }
}

impl Default for JurySettings {
    fn default() -> Self {
        Self::from(&JuryConfig::default())
    }
}

/// Assembles persona panels from a `PersonaSource`.
#[derive(Clone)]
pub struct JuryPanel {
    source: Arc<dyn PersonaSource>,
    settings: JurySettings,
}

impl JuryPanel {
    /// A panel builder over `source`.
    pub fn new(source: Arc<dyn PersonaSource>, settings: JurySettings) -> Self {
        Self { source, settings }
    }

    /// A builder with no personas; every panel is empty.
    pub fn empty() -> Self {
        Self::new(Arc::new(InMemoryPersonaSource::default()), JurySettings::default())
    }

    /// Current settings.
    pub fn settings(&self) -> JurySettings {
        self.settings
    }

    /// Draws a panel. The same `seed` over the same personas gives the same
    /// panel. Empty when the source has no personas at all.
    pub async fn assemble(&self, seed: u64) -> DomainResult<Vec<Persona>> {
        let size = self.settings.jury_size;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut pool = self.source.latest_batch().await?;
        if pool.len() >= size {
            debug!(available = pool.len(), size, "Drawing jury from generated batch");
            return Ok(sample_stratified(pool, size, self.settings.skeptic_minimum, &mut rng));
        }

        let seeds = self.source.seeds().await?;
        pool.extend(seeds.iter().cloned());
        let mut expanded = 0;
        while pool.len() < size {
            let Some(seed_persona) = seeds.choose(&mut rng) else {
                break;
            };
            pool.push(expand_persona(seed_persona, expanded, &mut rng));
            expanded += 1;
        }
        if expanded > 0 {
            info!(expanded, seeds = seeds.len(), "Expanded seed personas to fill the jury");
        }
        Ok(sample_stratified(pool, size, self.settings.skeptic_minimum, &mut rng))
    }
}

/// Skeptics a panel of `size` must hold.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn skeptic_floor(size: usize, skeptic_minimum: f64) -> usize {
    if size == 0 || skeptic_minimum <= 0.0 {
        return 0;
    }
    ((size as f64 * skeptic_minimum) as usize).clamp(1, size)
}

/// Draws `size` personas, at least `skeptic_floor(size, skeptic_minimum)` of
/// them skeptics when the pool has that many. A pool no bigger than `size`
/// is returned whole.
pub fn sample_stratified<R: Rng + ?Sized>(
    personas: Vec<Persona>,
    size: usize,
    skeptic_minimum: f64,
    rng: &mut R,
) -> Vec<Persona> {
    if personas.len() <= size {
        return personas;
    }

    let (skeptics, others): (Vec<usize>, Vec<usize>) = (0..personas.len()).partition(|&i| personas[i].is_skeptic());
    let floor = skeptic_floor(size, skeptic_minimum).min(skeptics.len());

    let mut chosen: Vec<usize> = index::sample(rng, skeptics.len(), floor)
        .into_iter()
        .map(|i| skeptics[i])
        .collect();
    // the rest is drawn from everyone not yet seated, skeptics included
    let mut rest: Vec<usize> = others;
    rest.extend(skeptics.iter().copied().filter(|i| !chosen.contains(i)));
    let remaining = size - chosen.len();
    chosen.extend(index::sample(rng, rest.len(), remaining).into_iter().map(|i| rest[i]));
    chosen.shuffle(rng);

    let mut slots: Vec<Option<Persona>> = personas.into_iter().map(Some).collect();
    chosen.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// A light variation of `seed`: scores jittered by up to 0.15 and, now and
/// then, the adoption stage moved one step.
pub fn expand_persona<R: Rng + ?Sized>(seed: &Persona, index: usize, rng: &mut R) -> Persona {
    let mut persona = seed.clone();
    persona.id = format!("expanded_{}_{index}", seed.id);
    for score in persona.psychographics.scores_mut() {
        let jittered = (*score + rng.gen_range(-SCORE_JITTER..=SCORE_JITTER)).clamp(0.0, 1.0);
        *score = (jittered * 100.0).round() / 100.0;
    }
    if rng.gen_bool(STAGE_FLIP_CHANCE) {
        let stage = persona.stage().neighbour(rng.gen_bool(0.5));
        persona.psychographics.ai_adoption_stage = stage;
    }
    persona
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdoptionStage;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pool(skeptics: usize, others: usize) -> Vec<Persona> {
        (0..skeptics)
            .map(|i| Persona::new(format!("s{i}"), "ops", AdoptionStage::Skeptic))
            .chain((0..others).map(|i| Persona::new(format!("o{i}"), "founder", AdoptionStage::PowerUser)))
            .collect()
    }

    fn skeptics_in(panel: &[Persona]) -> usize {
        panel.iter().filter(|p| p.is_skeptic()).count()
    }

    #[test]
    fn test_skeptic_floor() {
        assert_eq!(skeptic_floor(20, 0.15), 3);
        assert_eq!(skeptic_floor(4, 0.15), 1);
        assert_eq!(skeptic_floor(10, 0.0), 0);
        assert_eq!(skeptic_floor(3, 1.0), 3);
    }

    #[test]
    fn test_sampler_seats_the_skeptic_floor() {
        // 2 skeptics in 100: an unweighted draw of 20 would usually miss them
        let mut rng = StdRng::seed_from_u64(7);
        let panel = sample_stratified(pool(2, 98), 20, 0.15, &mut rng);
        assert_eq!(panel.len(), 20);
        assert_eq!(skeptics_in(&panel), 2);

        let panel = sample_stratified(pool(10, 90), 20, 0.15, &mut rng);
        assert!(skeptics_in(&panel) >= 3);
    }

    #[test]
    fn test_small_pool_is_returned_whole() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_stratified(pool(1, 3), 10, 0.15, &mut rng).len(), 4);
    }

    #[test]
    fn test_expansion_keeps_scores_in_range() {
        let mut seed = Persona::new("seed", "ops", AdoptionStage::Curious);
        seed.psychographics.trust_in_ai = Some(0.95);
        seed.psychographics.tool_fatigue = Some(0.02);
        let mut rng = StdRng::seed_from_u64(3);
        for i in 0..50 {
            let expanded = expand_persona(&seed, i, &mut rng);
            assert_eq!(expanded.id, format!("expanded_seed_{i}"));
            assert_eq!(expanded.archetype_id, "ops");
            for score in [expanded.psychographics.trust_in_ai, expanded.psychographics.tool_fatigue] {
                let score = score.unwrap();
                assert!((0.0..=1.0).contains(&score));
            }
            assert!(expanded.psychographics.patience_for_learning.is_none());
        }
    }

    #[tokio::test]
    async fn test_prefers_a_full_generated_batch() {
        let batch = pool(5, 30);
        let seeds = vec![Persona::new("seed", "ops", AdoptionStage::Curious)];
        let panel = JuryPanel::new(
            Arc::new(InMemoryPersonaSource::new(batch, seeds)),
            JurySettings {
                jury_size: 10,
                skeptic_minimum: 0.15,
            },
        );
        let drawn = panel.assemble(42).await.unwrap();
        assert_eq!(drawn.len(), 10);
        assert!(drawn.iter().all(|p| p.id != "seed"));
        assert!(skeptics_in(&drawn) >= 1);
        assert_eq!(drawn, panel.assemble(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_tops_up_a_short_batch_from_seeds() {
        let batch = pool(0, 3);
        let seeds = vec![
            Persona::new("skeptic-seed", "ops", AdoptionStage::Skeptic),
            Persona::new("curious-seed", "founder", AdoptionStage::Curious),
        ];
        let panel = JuryPanel::new(
            Arc::new(InMemoryPersonaSource::new(batch, seeds)),
            JurySettings {
                jury_size: 8,
                skeptic_minimum: 0.15,
            },
        );
        let drawn = panel.assemble(9).await.unwrap();
        assert_eq!(drawn.len(), 8);
        let ids: HashSet<&str> = drawn.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 8);
        assert!(ids.contains("o0") && ids.contains("skeptic-seed") && ids.contains("curious-seed"));
        assert_eq!(drawn.iter().filter(|p| p.id.starts_with("expanded_")).count(), 3);
    }

    #[tokio::test]
    async fn test_no_personas_gives_an_empty_panel() {
        assert!(JuryPanel::empty().assemble(1).await.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_panel_size_and_skeptic_floor(
            skeptics in 0usize..40,
            others in 0usize..60,
            size in 1usize..50,
            minimum in 0.0f64..0.6,
            seed in any::<u64>(),
        ) {
            let total = skeptics + others;
            let mut rng = StdRng::seed_from_u64(seed);
            let panel = sample_stratified(pool(skeptics, others), size, minimum, &mut rng);

            prop_assert_eq!(panel.len(), size.min(total));
            let ids: HashSet<&str> = panel.iter().map(|p| p.id.as_str()).collect();
            prop_assert_eq!(ids.len(), panel.len());
            if total > size {
                prop_assert!(skeptics_in(&panel) >= skeptic_floor(size, minimum).min(skeptics));
            }
        }
    }
}
