//! Deterministic experiment bucketing.
//!
//! Users hash into a 0-99 bucket per experiment; cumulative variant
//! allocations map buckets to variants, so the same user always lands in the
//! same variant for the lifetime of the experiment.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ContentPillar, PillarWeights};

/// Key of the built-in experiment that tunes intent update deltas.
pub const INTENT_DELTAS_EXPERIMENT: &str = "intent_deltas";

/// Key of the built-in experiment that rebalances pillar weights at feed
/// assembly time.
pub const PILLAR_BOOST_EXPERIMENT: &str = "pillar_boost";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Percentage of traffic (0-100)
    pub allocation: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub key: String,
    pub variants: Vec<Variant>,
    pub active: bool,
}

/// Intent-score deltas per interaction, varied by experiment arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaConfig {
    pub view_content: f64,
    pub like_job: f64,
    pub like_event: f64,
    pub like_adult: f64,
    /// Extra delta on the third event like (the acceleration cliff)
    pub third_like_bonus: f64,
    /// Extra delta on the fifth event like, zero when the arm has none
    pub fifth_like_bonus: f64,
}

impl DeltaConfig {
    /// Baseline values, also used when no experiment is registered.
    pub fn control() -> Self {
        Self {
            view_content: 0.01,
            like_job: 0.05,
            like_event: 0.15,
            like_adult: 0.03,
            third_like_bonus: 0.30,
            fifth_like_bonus: 0.0,
        }
    }

    pub fn for_variant(name: &str) -> Self {
        match name {
            // Reward bursts: smaller singles, bigger streak bonuses
            "reward_bursts" => Self {
                view_content: 0.01,
                like_job: 0.04,
                like_event: 0.12,
                like_adult: 0.02,
                third_like_bonus: 0.45,
                fifth_like_bonus: 0.20,
            },
            // Smooth progression: linear reward, softer cliff
            "smooth_progression" => Self {
                view_content: 0.015,
                like_job: 0.06,
                like_event: 0.18,
                like_adult: 0.04,
                third_like_bonus: 0.20,
                fifth_like_bonus: 0.0,
            },
            // Aggressive early: capture intent fast from the first like
            "aggressive_early" => Self {
                view_content: 0.02,
                like_job: 0.08,
                like_event: 0.20,
                like_adult: 0.05,
                third_like_bonus: 0.35,
                fifth_like_bonus: 0.0,
            },
            _ => Self::control(),
        }
    }

    /// Delta for an event like given how many event likes precede it.
    pub fn event_like_delta(&self, prior_event_likes: u32) -> f64 {
        let mut delta = self.like_event;
        if prior_event_likes == 2 {
            delta += self.third_like_bonus;
        }
        if prior_event_likes == 4 {
            delta += self.fifth_like_bonus;
        }
        delta
    }

    pub fn like_delta(&self, pillar: ContentPillar, prior_likes: u32) -> f64 {
        match pillar {
            ContentPillar::Job => self.like_job,
            ContentPillar::Adult => self.like_adult,
            ContentPillar::Event => self.event_like_delta(prior_likes),
        }
    }
}

/// Per-pillar multipliers applied to the blended weights before feed
/// assembly. This is the strategy branch the mixer selects by variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightModifiers {
    multipliers: [f64; ContentPillar::COUNT],
}

impl Default for WeightModifiers {
    fn default() -> Self {
        Self::identity()
    }
}

impl WeightModifiers {
    pub fn identity() -> Self {
        Self {
            multipliers: [1.0; ContentPillar::COUNT],
        }
    }

    pub fn new(adult: f64, event: f64, job: f64) -> Self {
        let mut modifiers = Self::identity();
        modifiers.multipliers[ContentPillar::Adult.index()] = adult.max(0.0);
        modifiers.multipliers[ContentPillar::Event.index()] = event.max(0.0);
        modifiers.multipliers[ContentPillar::Job.index()] = job.max(0.0);
        modifiers
    }

    pub fn for_variant(name: &str) -> Self {
        match name {
            // Damp event, boost adult
            "adult_boost" => Self::new(1.4, 0.8, 1.0),
            // Boost adult categories mildly, damp job
            "category_boost" => Self::new(1.25, 1.0, 0.8),
            _ => Self::identity(),
        }
    }

    pub fn get(&self, pillar: ContentPillar) -> f64 {
        self.multipliers[pillar.index()]
    }

    /// Multiply the weights through and renormalize. Identity modifiers
    /// return the input distribution unchanged.
    pub fn apply(&self, weights: &PillarWeights) -> PillarWeights {
        let mut out = PillarWeights::zero();
        for pillar in ContentPillar::ALL {
            out.set(pillar, weights.get(pillar) * self.get(pillar));
        }
        out.normalized()
    }
}

/// In-memory experiment registry with deterministic assignment.
pub struct ExperimentRegistry {
    experiments: DashMap<String, Experiment>,
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentRegistry {
    /// Registry pre-loaded with the intent-deltas experiment, four arms at
    /// 25% each.
    pub fn new() -> Self {
        let registry = Self {
            experiments: DashMap::new(),
        };
        registry
            .register(Experiment {
                key: INTENT_DELTAS_EXPERIMENT.to_string(),
                variants: vec![
                    Variant {
                        name: "control".to_string(),
                        allocation: 25,
                    },
                    Variant {
                        name: "reward_bursts".to_string(),
                        allocation: 25,
                    },
                    Variant {
                        name: "smooth_progression".to_string(),
                        allocation: 25,
                    },
                    Variant {
                        name: "aggressive_early".to_string(),
                        allocation: 25,
                    },
                ],
                active: true,
            })
            .expect("built-in experiment is valid");
        registry
            .register(Experiment {
                key: PILLAR_BOOST_EXPERIMENT.to_string(),
                variants: vec![
                    Variant {
                        name: "control".to_string(),
                        allocation: 50,
                    },
                    Variant {
                        name: "adult_boost".to_string(),
                        allocation: 25,
                    },
                    Variant {
                        name: "category_boost".to_string(),
                        allocation: 25,
                    },
                ],
                active: true,
            })
            .expect("built-in experiment is valid");
        registry
    }

    /// Empty registry, for tests that want full control.
    pub fn empty() -> Self {
        Self {
            experiments: DashMap::new(),
        }
    }

    pub fn register(&self, experiment: Experiment) -> Result<()> {
        if experiment.variants.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Experiment {} has no variants",
                experiment.key
            )));
        }
        let total: u32 = experiment.variants.iter().map(|v| v.allocation as u32).sum();
        if total != 100 {
            return Err(AppError::BadRequest(format!(
                "Variant allocations must sum to 100 (got {total})"
            )));
        }
        self.experiments.insert(experiment.key.clone(), experiment);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Experiment> {
        self.experiments.remove(key).map(|(_, e)| e)
    }

    fn bucket(user_id: Uuid, experiment_key: &str) -> u8 {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        experiment_key.hash(&mut hasher);
        (hasher.finish() % 100) as u8
    }

    /// Deterministic variant for a user. An inactive experiment always
    /// resolves to its first variant (the control arm).
    pub fn assign_variant(&self, user_id: Uuid, experiment_key: &str) -> Result<String> {
        let experiment = self
            .experiments
            .get(experiment_key)
            .ok_or_else(|| AppError::ExperimentNotFound(experiment_key.to_string()))?;

        if !experiment.active {
            return Ok(experiment.variants[0].name.clone());
        }

        let bucket = Self::bucket(user_id, experiment_key);
        let mut cumulative = 0u16;
        for variant in &experiment.variants {
            cumulative += variant.allocation as u16;
            if (bucket as u16) < cumulative {
                debug!(
                    user_id = %user_id,
                    experiment = experiment_key,
                    variant = %variant.name,
                    bucket,
                    "Variant assigned"
                );
                return Ok(variant.name.clone());
            }
        }
        // Unreachable when allocations sum to 100
        Ok(experiment.variants[0].name.clone())
    }

    /// Intent deltas for this user's arm; control values when the
    /// experiment is missing.
    pub fn deltas_for(&self, user_id: Uuid) -> DeltaConfig {
        match self.assign_variant(user_id, INTENT_DELTAS_EXPERIMENT) {
            Ok(variant) => DeltaConfig::for_variant(&variant),
            Err(_) => DeltaConfig::control(),
        }
    }

    /// Variant label and weight modifiers for the feed-assembly experiment;
    /// identity when the experiment is missing.
    pub fn weight_modifiers_for(&self, user_id: Uuid) -> (String, WeightModifiers) {
        match self.assign_variant(user_id, PILLAR_BOOST_EXPERIMENT) {
            Ok(variant) => {
                let modifiers = WeightModifiers::for_variant(&variant);
                (variant, modifiers)
            }
            Err(_) => ("control".to_string(), WeightModifiers::identity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_assignment_deterministic() {
        let registry = ExperimentRegistry::new();
        let user_id = Uuid::new_v4();
        let first = registry.assign_variant(user_id, INTENT_DELTAS_EXPERIMENT).unwrap();
        let second = registry.assign_variant(user_id, INTENT_DELTAS_EXPERIMENT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_allocation_distribution_roughly_uniform() {
        let registry = ExperimentRegistry::new();
        let mut counts: HashMap<String, u32> = HashMap::new();
        let n = 10_000;
        for _ in 0..n {
            let variant = registry
                .assign_variant(Uuid::new_v4(), INTENT_DELTAS_EXPERIMENT)
                .unwrap();
            *counts.entry(variant).or_insert(0) += 1;
        }
        // Four arms at 25% each, generous tolerance
        for (variant, count) in counts {
            assert!(
                count > 2_000 && count < 3_000,
                "variant {variant} count {count} out of tolerance"
            );
        }
    }

    #[test]
    fn test_invalid_allocation_rejected() {
        let registry = ExperimentRegistry::empty();
        let result = registry.register(Experiment {
            key: "broken".to_string(),
            variants: vec![Variant {
                name: "only".to_string(),
                allocation: 40,
            }],
            active: true,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_inactive_experiment_resolves_to_control() {
        let registry = ExperimentRegistry::empty();
        registry
            .register(Experiment {
                key: "paused".to_string(),
                variants: vec![
                    Variant {
                        name: "control".to_string(),
                        allocation: 50,
                    },
                    Variant {
                        name: "treatment".to_string(),
                        allocation: 50,
                    },
                ],
                active: false,
            })
            .unwrap();

        for _ in 0..20 {
            let variant = registry.assign_variant(Uuid::new_v4(), "paused").unwrap();
            assert_eq!(variant, "control");
        }
    }

    #[test]
    fn test_unknown_experiment_errors() {
        let registry = ExperimentRegistry::empty();
        assert!(registry.assign_variant(Uuid::new_v4(), "nope").is_err());
    }

    #[test]
    fn test_third_like_cliff() {
        let deltas = DeltaConfig::control();
        assert_eq!(deltas.event_like_delta(0), 0.15);
        assert_eq!(deltas.event_like_delta(2), 0.45);
        assert_eq!(deltas.event_like_delta(3), 0.15);
    }

    #[test]
    fn test_weight_modifiers_rebalance_and_renormalize() {
        let mut weights = PillarWeights::zero();
        weights.set(ContentPillar::Adult, 0.4);
        weights.set(ContentPillar::Event, 0.4);
        weights.set(ContentPillar::Job, 0.2);

        let boosted = WeightModifiers::for_variant("adult_boost").apply(&weights);
        assert!(boosted.get(ContentPillar::Adult) > weights.get(ContentPillar::Adult));
        assert!(boosted.get(ContentPillar::Event) < weights.get(ContentPillar::Event));
        assert!((boosted.total() - 1.0).abs() < 1e-9);

        let unchanged = WeightModifiers::identity().apply(&weights);
        assert_eq!(unchanged, weights.normalized());
    }

    #[test]
    fn test_weight_modifiers_for_unknown_variant_are_identity() {
        assert_eq!(
            WeightModifiers::for_variant("not-a-variant"),
            WeightModifiers::identity()
        );
    }

    #[test]
    fn test_pillar_boost_assignment_sticky() {
        let registry = ExperimentRegistry::new();
        let user_id = Uuid::new_v4();
        let (variant, modifiers) = registry.weight_modifiers_for(user_id);
        for _ in 0..20 {
            let (again_variant, again_modifiers) = registry.weight_modifiers_for(user_id);
            assert_eq!(again_variant, variant);
            assert_eq!(again_modifiers, modifiers);
        }
    }

    #[test]
    fn test_missing_pillar_boost_experiment_is_identity() {
        let registry = ExperimentRegistry::empty();
        let (variant, modifiers) = registry.weight_modifiers_for(Uuid::new_v4());
        assert_eq!(variant, "control");
        assert_eq!(modifiers, WeightModifiers::identity());
    }

    #[test]
    fn test_fifth_like_bonus_only_in_burst_arm() {
        let bursts = DeltaConfig::for_variant("reward_bursts");
        assert!(bursts.event_like_delta(4) > bursts.like_event);

        let control = DeltaConfig::control();
        assert_eq!(control.event_like_delta(4), control.like_event);
    }
}
