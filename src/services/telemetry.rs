//! Fire-and-forget telemetry.
//!
//! Recording happens off the request path: events are spawned onto the
//! runtime and sink failures are logged, never surfaced to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::ContentPillar;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    FeedRequest {
        user_id: Option<Uuid>,
        variant: String,
        response_time_ms: u64,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },
    IntentUpdate {
        user_id: Uuid,
        variant: String,
        pillar: ContentPillar,
        delta: f64,
        timestamp: DateTime<Utc>,
    },
    VariantAssigned {
        user_id: Uuid,
        experiment: String,
        variant: String,
        timestamp: DateTime<Utc>,
    },
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: TelemetryEvent) -> Result<()>;
}

/// Default sink: structured log lines.
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn record(&self, event: TelemetryEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)
            .map_err(|e| crate::error::AppError::Internal(format!("telemetry encode: {e}")))?;
        match &event {
            TelemetryEvent::FeedRequest {
                variant,
                response_time_ms,
                item_count,
                ..
            } => info!(
                variant = %variant,
                response_time_ms,
                item_count,
                payload = %payload,
                "highway_api_call"
            ),
            TelemetryEvent::IntentUpdate {
                user_id,
                variant,
                pillar,
                delta,
                ..
            } => info!(
                user_id = %user_id,
                variant = %variant,
                pillar = pillar.as_str(),
                delta,
                payload = %payload,
                "intent_score_update"
            ),
            TelemetryEvent::VariantAssigned {
                user_id,
                experiment,
                variant,
                ..
            } => info!(
                user_id = %user_id,
                experiment = %experiment,
                variant = %variant,
                payload = %payload,
                "experiment_assignment"
            ),
        }
        Ok(())
    }
}

/// Collecting sink for tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().expect("telemetry mutex").clone()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn record(&self, event: TelemetryEvent) -> Result<()> {
        self.events.lock().expect("telemetry mutex").push(event);
        Ok(())
    }
}

/// Handle that detaches recording from the caller.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Spawn-and-forget. Sink errors are swallowed with a warning so the
    /// ranking path never blocks or fails on telemetry. Outside a runtime
    /// the event is dropped with a warning instead of panicking.
    pub fn track(&self, event: TelemetryEvent) {
        let sink = self.sink.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.record(event).await {
                        warn!(error = %e, "Telemetry recording failed");
                    }
                });
            }
            Err(_) => warn!("Telemetry event dropped: no async runtime"),
        }
    }

    pub fn track_feed_call(
        &self,
        user_id: Option<Uuid>,
        variant: &str,
        response_time_ms: u64,
        item_count: usize,
    ) {
        self.track(TelemetryEvent::FeedRequest {
            user_id,
            variant: variant.to_string(),
            response_time_ms,
            item_count,
            timestamp: Utc::now(),
        });
    }

    pub fn track_intent_update(
        &self,
        user_id: Uuid,
        variant: &str,
        pillar: ContentPillar,
        delta: f64,
    ) {
        self.track(TelemetryEvent::IntentUpdate {
            user_id,
            variant: variant.to_string(),
            pillar,
            delta,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        async fn record(&self, _event: TelemetryEvent) -> Result<()> {
            Err(crate::error::AppError::Internal("sink down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_memory_sink_collects_events() {
        let sink = Arc::new(MemorySink::new());
        let telemetry = Telemetry::new(sink.clone());

        telemetry.track_feed_call(None, "control", 12, 20);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TelemetryEvent::FeedRequest { .. }));
    }

    #[test]
    fn test_events_encode_as_tagged_json() {
        let event = TelemetryEvent::FeedRequest {
            user_id: None,
            variant: "adult_boost".to_string(),
            response_time_ms: 8,
            item_count: 10,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"feed_request\""));
        assert!(json.contains("\"variant\":\"adult_boost\""));
    }

    #[test]
    fn test_track_outside_runtime_does_not_panic() {
        let telemetry = Telemetry::default();
        telemetry.track_feed_call(None, "control", 1, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_never_propagates() {
        let telemetry = Telemetry::new(Arc::new(FailingSink));
        // Must not panic or surface the error
        telemetry.track_feed_call(Some(Uuid::new_v4()), "control", 5, 10);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
