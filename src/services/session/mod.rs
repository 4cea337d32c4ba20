//! Per-session intent signals with tiered decay.
//!
//! Each browser session carries a short-lived, decaying weight per pillar.
//! All mutations go through `SessionEvent` and a reducer, so the behavior is
//! testable without a UI event loop. The decay schedule is tiered by
//! inactivity span: fresh signals barely decay, stale ones fall off fast.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::{ContentPillar, InteractionKind, PillarWeights};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Everything that can mutate a session, as an explicit message.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Interaction {
        pillar: ContentPillar,
        kind: InteractionKind,
        at: DateTime<Utc>,
    },
    DecayTick {
        at: DateTime<Utc>,
    },
    VisibilityChanged {
        state: Visibility,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    /// Pillar signal strengths; entries are always non-negative
    pub signals: HashMap<ContentPillar, f64>,
    pub started_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    pub visibility: Visibility,
    pub is_new_session: bool,
    last_decay_at: DateTime<Utc>,
    /// Items already shown to this session, for mixer dedup
    seen: HashMap<Uuid, DateTime<Utc>>,
}

impl SessionData {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            signals: HashMap::new(),
            started_at: now,
            last_interaction: now,
            visibility: Visibility::Visible,
            is_new_session: true,
            last_decay_at: now,
            seen: HashMap::new(),
        }
    }

    /// Single-threaded reducer for all session mutations.
    pub fn apply_event(&mut self, event: &SessionEvent, config: &SessionConfig) {
        match event {
            SessionEvent::Interaction { pillar, kind, at } => {
                self.apply_tiered_decay(*at, config);
                let increment = match kind {
                    InteractionKind::View => config.view_increment,
                    InteractionKind::Like => config.like_increment,
                };
                let signal = self.signals.entry(*pillar).or_insert(0.0);
                *signal += increment;
                self.last_interaction = *at;
                self.is_new_session = false;
            }
            SessionEvent::DecayTick { at } => {
                self.apply_tiered_decay(*at, config);
            }
            SessionEvent::VisibilityChanged { state, at } => {
                if *state == Visibility::Hidden && self.visibility == Visibility::Visible {
                    self.apply_partial_reset(config);
                } else if *state == Visibility::Visible && self.visibility == Visibility::Hidden {
                    self.apply_tiered_decay(*at, config);
                }
                self.visibility = *state;
            }
        }
    }

    /// Decay every signal by the tier matching the current inactivity span.
    ///
    /// The factor is `rate ^ minutes_since_last_decay`, so re-applying with
    /// the same timestamp is a no-op and weights never go negative. Clock
    /// skew (negative elapsed) clamps to zero elapsed.
    pub fn apply_tiered_decay(&mut self, now: DateTime<Utc>, config: &SessionConfig) {
        let span_secs = (now - self.last_decay_at).num_seconds().max(0);
        if span_secs < config.decay_debounce_secs {
            return;
        }
        let span_minutes = span_secs as f64 / 60.0;
        let inactive_minutes = (now - self.last_interaction)
            .num_seconds()
            .max(0) as f64
            / 60.0;

        let rate = config
            .decay_tiers
            .iter()
            .find(|t| inactive_minutes <= t.max_inactive_minutes)
            .map(|t| t.rate_per_minute)
            .unwrap_or(1.0);
        let factor = rate.powf(span_minutes);

        self.signals.retain(|pillar, signal| {
            *signal = (*signal * factor).max(0.0);
            if *signal < config.min_signal_threshold {
                debug!(
                    session_id = %self.session_id,
                    pillar = pillar.as_str(),
                    "Signal fell below threshold, dropping to cold"
                );
                false
            } else {
                true
            }
        });
        self.last_decay_at = now;
    }

    /// Background transition: shed a fixed fraction of every signal while
    /// keeping continuity of intent across tab switches. Never zeroes.
    pub fn apply_partial_reset(&mut self, config: &SessionConfig) {
        let keep = 1.0 - config.reset_fraction;
        for signal in self.signals.values_mut() {
            *signal = (*signal * keep).max(0.0);
        }
        debug!(
            session_id = %self.session_id,
            keep_fraction = keep,
            "Partial reset applied"
        );
    }

    pub fn signal_weights(&self) -> PillarWeights {
        self.signals
            .iter()
            .map(|(&p, &w)| (p, w.max(0.0)))
            .collect()
    }

    /// Dedup bookkeeping: remember items served to this session.
    ///
    /// Call this when a scroll run ends (feed refresh or session end), with
    /// every item the run showed. Recording between pages of the same run
    /// changes the candidate set the mixer paginates over, which re-anchors
    /// the following pages.
    pub fn record_impressions(
        &mut self,
        item_ids: &[Uuid],
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) {
        for id in item_ids {
            self.seen.insert(*id, now);
        }
        if self.seen.len() > config.max_seen_items {
            // Evict the oldest impressions beyond the cap
            let mut by_age: Vec<(Uuid, DateTime<Utc>)> =
                self.seen.iter().map(|(&id, &at)| (id, at)).collect();
            by_age.sort_by_key(|(_, at)| *at);
            let excess = by_age.len() - config.max_seen_items;
            for (id, _) in by_age.into_iter().take(excess) {
                self.seen.remove(&id);
            }
        }
    }

    pub fn recently_seen(&self, item_id: Uuid, now: DateTime<Utc>, config: &SessionConfig) -> bool {
        match self.seen.get(&item_id) {
            Some(shown_at) => {
                (now - *shown_at).num_minutes().max(0) < config.seen_cooldown_minutes
            }
            None => false,
        }
    }
}

/// Session registry. Clone-cheap; all state is behind the shared map so
/// parallel tests get independent stores with no process-wide singletons.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionData>>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create the session if absent (zero weights), otherwise apply the
    /// optional event. Inactivity past the session timeout flags the record
    /// as a new logical session.
    pub fn initialize_or_update(
        &self,
        session_id: &str,
        event: Option<SessionEvent>,
    ) -> SessionData {
        let now = Utc::now();
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id, "Session created");
                SessionData::new(session_id, now)
            });

        let session = entry.value_mut();
        let inactive_minutes = (now - session.last_interaction).num_minutes().max(0);
        if inactive_minutes > self.config.timeout_minutes {
            session.is_new_session = true;
            session.apply_tiered_decay(now, &self.config);
        }
        if let Some(event) = event {
            session.apply_event(&event, &self.config);
        }
        session.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionData> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    pub fn apply(&self, session_id: &str, event: SessionEvent) -> Option<SessionData> {
        self.sessions.get_mut(session_id).map(|mut entry| {
            entry.value_mut().apply_event(&event, &self.config);
            entry.value().clone()
        })
    }

    pub fn record_impressions(&self, session_id: &str, item_ids: &[Uuid]) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry
                .value_mut()
                .record_impressions(item_ids, Utc::now(), &self.config);
        }
    }

    pub fn end_session(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            info!(session_id, "Session ended");
        }
    }

    /// Subscribe a session to visibility transitions. The returned handle
    /// aborts the listener on drop, so registrations cannot leak across
    /// component lifecycles.
    pub fn init_visibility_handler(
        &self,
        session_id: &str,
        mut transitions: broadcast::Receiver<Visibility>,
    ) -> VisibilityHandle {
        let store = self.clone();
        let session_id = session_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(state) => {
                        store.apply(
                            &session_id,
                            SessionEvent::VisibilityChanged {
                                state,
                                at: Utc::now(),
                            },
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        VisibilityHandle { task }
    }
}

/// Guard for a visibility subscription.
pub struct VisibilityHandle {
    task: JoinHandle<()>,
}

impl VisibilityHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for VisibilityHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
