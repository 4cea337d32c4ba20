//! Redis-backed intent store.
//!
//! Weights live in a per-user hash; `HINCRBYFLOAT` gives the atomic
//! increment the intent model requires under concurrent multi-device
//! updates. Layout:
//!
//! - `{prefix}:intent:{user_id}` - hash with fields
//!   `w:{pillar}`, `likes:{pillar}`, `views`, `referrer`,
//!   `created_at`, `updated_at`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ContentPillar, InteractionKind, PillarWeights, Referrer, UserIntent};

use super::IntentStore;

pub struct RedisIntentStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisIntentStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::StorageUnavailable(format!("redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis connect: {e}")))?;
        Ok(Self::new(conn, key_prefix))
    }

    fn intent_key(&self, user_id: Uuid) -> String {
        format!("{}:intent:{}", self.key_prefix, user_id)
    }

    fn parse_intent(user_id: Uuid, fields: HashMap<String, String>) -> UserIntent {
        let mut weights = HashMap::new();
        let mut likes = HashMap::new();
        for pillar in ContentPillar::ALL {
            if let Some(raw) = fields.get(&format!("w:{}", pillar.as_str())) {
                if let Ok(w) = raw.parse::<f64>() {
                    weights.insert(pillar, w.max(0.0));
                }
            }
            if let Some(raw) = fields.get(&format!("likes:{}", pillar.as_str())) {
                if let Ok(n) = raw.parse::<u32>() {
                    likes.insert(pillar, n);
                }
            }
        }

        let parse_ts = |field: &str| -> DateTime<Utc> {
            fields
                .get(field)
                .and_then(|v| v.parse::<DateTime<Utc>>().ok())
                .unwrap_or_else(Utc::now)
        };

        UserIntent {
            user_id,
            weights,
            likes,
            total_views: fields
                .get("views")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            referrer: fields
                .get("referrer")
                .map(|r| Referrer::from_str_lossy(r))
                .unwrap_or(Referrer::Direct),
            created_at: parse_ts("created_at"),
            updated_at: parse_ts("updated_at"),
        }
    }

    async fn read(&self, user_id: Uuid) -> Result<Option<UserIntent>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.intent_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis HGETALL: {e}")))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::parse_intent(user_id, fields)))
    }
}

#[async_trait]
impl IntentStore for RedisIntentStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserIntent>> {
        self.read(user_id).await
    }

    async fn create(&self, intent: UserIntent) -> Result<UserIntent> {
        let key = self.intent_key(intent.user_id);
        let mut conn = self.conn.clone();

        // HSETNX per field: a concurrent create from another device wins
        // harmlessly, we read the stored record back either way.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (pillar, weight) in &intent.weights {
            pipe.cmd("HSETNX")
                .arg(&key)
                .arg(format!("w:{}", pillar.as_str()))
                .arg(*weight)
                .ignore();
        }
        pipe.cmd("HSETNX")
            .arg(&key)
            .arg("referrer")
            .arg(intent.referrer.as_str())
            .ignore();
        pipe.cmd("HSETNX")
            .arg(&key)
            .arg("created_at")
            .arg(intent.created_at.to_rfc3339())
            .ignore();
        pipe.cmd("HSETNX")
            .arg(&key)
            .arg("updated_at")
            .arg(intent.updated_at.to_rfc3339())
            .ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis create: {e}")))?;

        self.read(intent.user_id)
            .await?
            .ok_or_else(|| AppError::Internal("intent vanished after create".to_string()))
    }

    async fn increment(
        &self,
        user_id: Uuid,
        pillar: ContentPillar,
        delta: f64,
        kind: InteractionKind,
        seed: PillarWeights,
    ) -> Result<UserIntent> {
        let key = self.intent_key(user_id);
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        // Seed baseline fields for a lazily-created record
        for (seed_pillar, weight) in seed.iter().filter(|(_, w)| *w > 0.0) {
            pipe.cmd("HSETNX")
                .arg(&key)
                .arg(format!("w:{}", seed_pillar.as_str()))
                .arg(weight)
                .ignore();
        }
        pipe.cmd("HSETNX")
            .arg(&key)
            .arg("referrer")
            .arg(Referrer::Direct.as_str())
            .ignore();
        pipe.cmd("HSETNX")
            .arg(&key)
            .arg("created_at")
            .arg(&now)
            .ignore();
        pipe.cmd("HINCRBYFLOAT")
            .arg(&key)
            .arg(format!("w:{}", pillar.as_str()))
            .arg(delta)
            .ignore();
        match kind {
            InteractionKind::Like => {
                pipe.cmd("HINCRBY")
                    .arg(&key)
                    .arg(format!("likes:{}", pillar.as_str()))
                    .arg(1)
                    .ignore();
            }
            InteractionKind::View => {
                pipe.cmd("HINCRBY").arg(&key).arg("views").arg(1).ignore();
            }
        }
        pipe.cmd("HSET").arg(&key).arg("updated_at").arg(&now).ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis increment: {e}")))?;

        self.read(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("intent vanished after increment".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent_clamps_negative_weights() {
        let user_id = Uuid::new_v4();
        let mut fields = HashMap::new();
        fields.insert("w:event".to_string(), "-0.4".to_string());
        fields.insert("w:adult".to_string(), "1.5".to_string());
        fields.insert("likes:event".to_string(), "3".to_string());
        fields.insert("views".to_string(), "12".to_string());
        fields.insert("referrer".to_string(), "event".to_string());

        let intent = RedisIntentStore::parse_intent(user_id, fields);
        assert_eq!(intent.weights[&ContentPillar::Event], 0.0);
        assert_eq!(intent.weights[&ContentPillar::Adult], 1.5);
        assert_eq!(intent.like_count(ContentPillar::Event), 3);
        assert_eq!(intent.total_views, 12);
        assert_eq!(intent.referrer, Referrer::Event);
    }

    #[test]
    fn test_parse_intent_ignores_garbage_fields() {
        let user_id = Uuid::new_v4();
        let mut fields = HashMap::new();
        fields.insert("w:event".to_string(), "not-a-number".to_string());
        fields.insert("w:job".to_string(), "0.2".to_string());

        let intent = RedisIntentStore::parse_intent(user_id, fields);
        assert!(!intent.weights.contains_key(&ContentPillar::Event));
        assert_eq!(intent.weights[&ContentPillar::Job], 0.2);
    }
}
