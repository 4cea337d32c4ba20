use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ContentPillar, InteractionKind, PillarWeights, Referrer, UserIntent};

/// Persistence seam for `UserIntent`.
///
/// `increment` must apply the delta atomically at the storage layer: two
/// concurrent +1 updates on the same pillar land as +2, never +1. A missing
/// record is created with the given seed before the delta applies, so the
/// operation is either fully applied or not applied at all.
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserIntent>>;

    /// Insert if absent, returning the stored record either way.
    async fn create(&self, intent: UserIntent) -> Result<UserIntent>;

    async fn increment(
        &self,
        user_id: Uuid,
        pillar: ContentPillar,
        delta: f64,
        kind: InteractionKind,
        seed: PillarWeights,
    ) -> Result<UserIntent>;
}

/// Dashmap-backed store. The entry guard serializes concurrent writers per
/// user, which is what makes the read-modify-write safe here.
#[derive(Default)]
pub struct InMemoryIntentStore {
    inner: DashMap<Uuid, UserIntent>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserIntent>> {
        Ok(self.inner.get(&user_id).map(|r| r.value().clone()))
    }

    async fn create(&self, intent: UserIntent) -> Result<UserIntent> {
        let entry = self.inner.entry(intent.user_id).or_insert(intent);
        Ok(entry.value().clone())
    }

    async fn increment(
        &self,
        user_id: Uuid,
        pillar: ContentPillar,
        delta: f64,
        kind: InteractionKind,
        seed: PillarWeights,
    ) -> Result<UserIntent> {
        let now = Utc::now();
        let mut entry = self
            .inner
            .entry(user_id)
            .or_insert_with(|| UserIntent::new(user_id, Referrer::Direct, seed, now));

        let intent = entry.value_mut();
        let weight = intent.weights.entry(pillar).or_insert(0.0);
        *weight = (*weight + delta).max(0.0);
        match kind {
            InteractionKind::Like => {
                *intent.likes.entry(pillar).or_insert(0) += 1;
            }
            InteractionKind::View => {
                intent.total_views += 1;
            }
        }
        intent.updated_at = now;

        Ok(intent.clone())
    }
}
