//! Long-term user intent and its coupling to session signals.
//!
//! Intent is a persistent per-pillar weight record. Interactions apply
//! additive deltas whose magnitude depends on the user's experiment arm and
//! on the event-like streak (third/fifth like bonuses). The blend with
//! short-lived session signals happens in `calculate_pillar_weights`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::IntentConfig;
use crate::db::IntentStore;
use crate::error::{AppError, Result};
use crate::models::{ContentPillar, InteractionKind, PillarWeights, Referrer, UserIntent};
use crate::services::experiments::ExperimentRegistry;
use crate::services::session::SessionData;
use crate::services::telemetry::Telemetry;

/// Map a scalar cold-to-hot score onto the three pillars.
///
/// Quadratic transition curve: job dominates at 0, event peaks mid-way,
/// adult dominates at 1. Always sums to 1.
pub fn transition_weights(intent_score: f64) -> PillarWeights {
    let s = intent_score.clamp(0.0, 1.0);
    let w_job = (1.0 - s).powi(2);
    let w_event = 2.0 * s * (1.0 - s);
    let w_adult = s.powi(2);

    let mut weights = PillarWeights::zero();
    weights.set(ContentPillar::Job, w_job);
    weights.set(ContentPillar::Event, w_event);
    weights.set(ContentPillar::Adult, w_adult);
    weights.normalized()
}

/// Blend persistent intent with session signals into a distribution.
///
/// Pure and deterministic: identical inputs always produce identical
/// outputs. `session_bias` is how much the short-term signals outweigh the
/// long-term record; either side being empty falls back to the other, both
/// empty yields uniform.
pub fn calculate_pillar_weights(
    intent: &UserIntent,
    session: &SessionData,
    session_bias: f64,
) -> PillarWeights {
    let bias = session_bias.clamp(0.0, 1.0);
    let session_raw = session.signal_weights();

    let long_term = intent.normalized_weights();
    if session_raw.is_zero() {
        return long_term;
    }
    let short_term = session_raw.normalized();

    let mut blended = PillarWeights::zero();
    for pillar in ContentPillar::ALL {
        blended.set(
            pillar,
            (1.0 - bias) * long_term.get(pillar) + bias * short_term.get(pillar),
        );
    }
    blended.normalized()
}

pub struct IntentService {
    store: Arc<dyn IntentStore>,
    experiments: Arc<ExperimentRegistry>,
    telemetry: Telemetry,
    config: IntentConfig,
}

impl IntentService {
    pub fn new(
        store: Arc<dyn IntentStore>,
        experiments: Arc<ExperimentRegistry>,
        telemetry: Telemetry,
        config: IntentConfig,
    ) -> Self {
        Self {
            store,
            experiments,
            telemetry,
            config,
        }
    }

    /// `None` means the intent record does not exist yet; callers create it,
    /// they do not treat this as an error.
    pub async fn get_user_intent(&self, user_id: Uuid) -> Result<Option<UserIntent>> {
        self.store.get(user_id).await
    }

    /// Lazily create the record, seeding pillar weights from the traffic
    /// origin class.
    pub async fn create_user_intent(&self, user_id: Uuid, referrer: Referrer) -> Result<UserIntent> {
        let seed = self.seed_weights(referrer);
        let intent = UserIntent::new(user_id, referrer, seed, chrono::Utc::now());
        let stored = self.store.create(intent).await?;
        debug!(
            user_id = %user_id,
            referrer = referrer.as_str(),
            "User intent created"
        );
        Ok(stored)
    }

    fn seed_weights(&self, referrer: Referrer) -> PillarWeights {
        transition_weights(referrer.initial_intent_score()).scale(self.config.baseline_weight)
    }

    /// Apply one interaction as a single atomic increment. Storage failures
    /// are retried once with backoff; a second failure surfaces
    /// `StorageUnavailable` so ranking never proceeds on partial intent.
    pub async fn update_on_interaction(
        &self,
        user_id: Uuid,
        pillar: ContentPillar,
        kind: InteractionKind,
    ) -> Result<UserIntent> {
        let prior_likes = match self.store.get(user_id).await? {
            Some(intent) => intent.like_count(pillar),
            None => 0,
        };

        let deltas = self.experiments.deltas_for(user_id);
        let strength = match kind {
            InteractionKind::View => deltas.view_content,
            InteractionKind::Like => deltas.like_delta(pillar, prior_likes),
        };

        let seed = self.seed_weights(Referrer::Direct);
        let updated = self
            .increment_with_retry(user_id, pillar, strength, kind, seed)
            .await?;

        let variant = self
            .experiments
            .assign_variant(
                user_id,
                crate::services::experiments::INTENT_DELTAS_EXPERIMENT,
            )
            .unwrap_or_else(|_| "control".to_string());
        self.telemetry
            .track_intent_update(user_id, &variant, pillar, strength);

        Ok(updated)
    }

    async fn increment_with_retry(
        &self,
        user_id: Uuid,
        pillar: ContentPillar,
        delta: f64,
        kind: InteractionKind,
        seed: PillarWeights,
    ) -> Result<UserIntent> {
        match self.store.increment(user_id, pillar, delta, kind, seed).await {
            Ok(intent) => Ok(intent),
            Err(AppError::StorageUnavailable(first)) => {
                warn!(
                    user_id = %user_id,
                    error = %first,
                    "Intent increment failed, retrying once"
                );
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                self.store
                    .increment(user_id, pillar, delta, kind, seed)
                    .await
                    .map_err(|e| AppError::StorageUnavailable(format!("retry exhausted: {e}")))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryIntentStore, IntentStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service_with(store: Arc<dyn IntentStore>) -> IntentService {
        IntentService::new(
            store,
            Arc::new(ExperimentRegistry::empty()),
            Telemetry::default(),
            IntentConfig {
                retry_backoff_ms: 1,
                ..IntentConfig::default()
            },
        )
    }

    #[test]
    fn test_transition_weights_endpoints() {
        let cold = transition_weights(0.0);
        assert!((cold.get(ContentPillar::Job) - 1.0).abs() < 1e-9);
        assert_eq!(cold.get(ContentPillar::Adult), 0.0);

        let hot = transition_weights(1.0);
        assert!((hot.get(ContentPillar::Adult) - 1.0).abs() < 1e-9);

        let mid = transition_weights(0.5);
        assert!(mid.get(ContentPillar::Event) > mid.get(ContentPillar::Job));
        assert!((mid.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_transition_weights_clamps_out_of_range() {
        assert_eq!(transition_weights(-3.0), transition_weights(0.0));
        assert_eq!(transition_weights(7.0), transition_weights(1.0));
    }

    #[test]
    fn test_calculate_pillar_weights_deterministic() {
        let intent = UserIntent::new(
            Uuid::new_v4(),
            Referrer::Event,
            transition_weights(0.4),
            Utc::now(),
        );
        let mut session = SessionData::new("s1", Utc::now());
        session.signals.insert(ContentPillar::Adult, 2.0);
        session.signals.insert(ContentPillar::Event, 1.0);

        let first = calculate_pillar_weights(&intent, &session, 0.6);
        let second = calculate_pillar_weights(&intent, &session, 0.6);
        assert_eq!(first, second);
        assert!((first.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_outweighs_intent_at_high_bias() {
        let intent = UserIntent::new(
            Uuid::new_v4(),
            Referrer::Job,
            transition_weights(0.0), // all job
            Utc::now(),
        );
        let mut session = SessionData::new("s1", Utc::now());
        session.signals.insert(ContentPillar::Adult, 5.0);

        let blended = calculate_pillar_weights(&intent, &session, 0.6);
        assert!(blended.get(ContentPillar::Adult) > blended.get(ContentPillar::Job));
    }

    #[test]
    fn test_empty_session_falls_back_to_intent() {
        let intent = UserIntent::new(
            Uuid::new_v4(),
            Referrer::Adult,
            transition_weights(0.8),
            Utc::now(),
        );
        let session = SessionData::new("s1", Utc::now());
        let weights = calculate_pillar_weights(&intent, &session, 0.6);
        assert_eq!(weights, intent.normalized_weights());
    }

    #[tokio::test]
    async fn test_update_creates_lazily_and_increments() {
        let store = Arc::new(InMemoryIntentStore::new());
        let service = service_with(store.clone());
        let user_id = Uuid::new_v4();

        let updated = service
            .update_on_interaction(user_id, ContentPillar::Event, InteractionKind::Like)
            .await
            .unwrap();

        assert_eq!(updated.like_count(ContentPillar::Event), 1);
        assert!(updated.weights[&ContentPillar::Event] > 0.0);
    }

    #[tokio::test]
    async fn test_third_event_like_applies_bonus() {
        let store = Arc::new(InMemoryIntentStore::new());
        let service = service_with(store.clone());
        let user_id = Uuid::new_v4();

        let mut totals = Vec::new();
        for _ in 0..3 {
            let intent = service
                .update_on_interaction(user_id, ContentPillar::Event, InteractionKind::Like)
                .await
                .unwrap();
            totals.push(intent.weights[&ContentPillar::Event]);
        }

        let deltas = DeltaConfigForTest::control();
        let second_step = totals[1] - totals[0];
        let third_step = totals[2] - totals[1];
        assert!((second_step - deltas.like_event).abs() < 1e-9);
        assert!((third_step - (deltas.like_event + deltas.third_like_bonus)).abs() < 1e-9);
    }

    // Local alias so the test reads with the same names as the config
    use crate::services::experiments::DeltaConfig as DeltaConfigForTest;

    /// Store that fails a configurable number of times before succeeding.
    struct FlakyStore {
        inner: InMemoryIntentStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: InMemoryIntentStore::new(),
                failures_left: AtomicU32::new(times),
            }
        }

        fn take_failure(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl IntentStore for FlakyStore {
        async fn get(&self, user_id: Uuid) -> crate::error::Result<Option<UserIntent>> {
            self.inner.get(user_id).await
        }

        async fn create(&self, intent: UserIntent) -> crate::error::Result<UserIntent> {
            self.inner.create(intent).await
        }

        async fn increment(
            &self,
            user_id: Uuid,
            pillar: ContentPillar,
            delta: f64,
            kind: InteractionKind,
            seed: PillarWeights,
        ) -> crate::error::Result<UserIntent> {
            if self.take_failure() {
                return Err(AppError::StorageUnavailable("simulated outage".to_string()));
            }
            self.inner.increment(user_id, pillar, delta, kind, seed).await
        }
    }

    #[tokio::test]
    async fn test_single_failure_recovered_by_retry() {
        let service = service_with(Arc::new(FlakyStore::failing(1)));
        let result = service
            .update_on_interaction(Uuid::new_v4(), ContentPillar::Job, InteractionKind::Like)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces_storage_unavailable() {
        let service = service_with(Arc::new(FlakyStore::failing(5)));
        let result = service
            .update_on_interaction(Uuid::new_v4(), ContentPillar::Job, InteractionKind::Like)
            .await;
        assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    }
}
