//! Highway feed assembly.
//!
//! Filters run first, ranking second. Candidates are bucketed per pillar,
//! scored, and interleaved by weighted deficit: each slot goes to the pillar
//! whose share of the feed so far lags its target weight the most. That one
//! rule yields both guarantees the feed needs — no weighted pillar is ever
//! starved (its deficit keeps growing until it wins a slot), and a per-page
//! cap stops any single pillar from monopolizing a page. The whole ordering
//! is deterministic in (pool, weights, filters, seen-set), which keeps
//! pagination stable for infinite scroll.

pub mod filters;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::{MixerConfig, SessionConfig};
use crate::models::{ContentItem, ContentPillar, FeedFilters, HighwayContentItem, PillarWeights};
use crate::services::experiments::{ExperimentRegistry, WeightModifiers};
use crate::services::session::SessionData;
use crate::services::telemetry::Telemetry;

pub use filters::{filter_feed_content, is_quality_content};

/// Engagement/freshness score, independent of the user's weights.
pub fn calculate_item_score(item: &ContentItem, now: DateTime<Utc>) -> f64 {
    let mut score = 100.0;

    score += item.likes as f64 * 2.0;
    score += item.views as f64 * 0.1;

    let hours_old = (now - item.created_at).num_minutes().max(0) as f64 / 60.0;
    if hours_old < 6.0 {
        score += 200.0;
    } else if hours_old < 24.0 {
        score += 100.0;
    } else if hours_old < 72.0 {
        score += 50.0;
    }

    if item.is_premium {
        score += 100.0;
    }
    if item.is_verified {
        score += 50.0;
    }
    if item.image_url.is_some() {
        score += 30.0;
    }
    if item.video_url.is_some() {
        score += 50.0;
    }
    if item.smartlink_url.is_some() || item.affiliate_url.is_some() {
        score += 80.0;
    }

    score
}

pub struct FeedMixer {
    config: MixerConfig,
    session_config: SessionConfig,
    experiments: Arc<ExperimentRegistry>,
    telemetry: Telemetry,
}

impl FeedMixer {
    pub fn new(
        config: MixerConfig,
        session_config: SessionConfig,
        experiments: Arc<ExperimentRegistry>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            config,
            session_config,
            experiments,
            telemetry,
        }
    }

    /// Assemble a page for a user: resolve the user's feed-assembly variant,
    /// rebalance the blended weights with the variant's modifiers, assemble,
    /// and record the call. Anonymous requests run the control strategy.
    pub fn get_highway_feed_for_user(
        &self,
        user_id: Option<Uuid>,
        pool: &[ContentItem],
        weights: &PillarWeights,
        page: usize,
        page_size: usize,
        filters: &FeedFilters,
        session: &SessionData,
        now: DateTime<Utc>,
    ) -> Vec<HighwayContentItem> {
        let started = Instant::now();
        let (variant, modifiers) = match user_id {
            Some(id) => self.experiments.weight_modifiers_for(id),
            None => ("control".to_string(), WeightModifiers::identity()),
        };
        let effective = modifiers.apply(weights);
        debug!(
            variant = %variant,
            "Feed assembly variant resolved"
        );

        let items =
            self.get_highway_feed(pool, &effective, page, page_size, filters, session, now);
        self.telemetry.track_feed_call(
            user_id,
            &variant,
            started.elapsed().as_millis() as u64,
            items.len(),
        );
        items
    }

    /// Assemble one page of the feed for the given pillar weights.
    ///
    /// Repeated calls with the same page index and unchanged inputs return
    /// the identical ordering. The seen-set is part of those inputs: record
    /// impressions when a scroll run ends (refresh or session end), not
    /// between pages of the same run, or later pages re-anchor on the
    /// remaining pool.
    pub fn get_highway_feed(
        &self,
        pool: &[ContentItem],
        weights: &PillarWeights,
        page: usize,
        page_size: usize,
        filters: &FeedFilters,
        session: &SessionData,
        now: DateTime<Utc>,
    ) -> Vec<HighwayContentItem> {
        if page_size == 0 {
            return Vec::new();
        }

        // Hard constraints first, then the seen-item cool-down
        let candidates: Vec<&ContentItem> =
            filter_feed_content(pool, filters, &self.config)
                .into_iter()
                .filter(|item| !session.recently_seen(item.id, now, &self.session_config))
                .collect();

        let mut queues = self.build_pillar_queues(&candidates, now);
        let effective = effective_weights(weights, &queues);
        if effective.is_zero() {
            debug!(session_id = %session.session_id, "No candidates after filtering");
            return Vec::new();
        }

        let cap = ((self.config.max_pillar_page_fraction * page_size as f64).floor() as usize).max(1);
        let total_slots = (page + 1) * page_size;

        let mut ordered: Vec<HighwayContentItem> = Vec::with_capacity(total_slots);
        let mut counts = [0usize; ContentPillar::COUNT];
        let mut page_counts = [0usize; ContentPillar::COUNT];

        while ordered.len() < total_slots {
            if ordered.len() % page_size == 0 {
                page_counts = [0; ContentPillar::COUNT];
            }

            // Cap is relaxed only when every other queue is exhausted:
            // availability beats monotony.
            let picked = select_pillar(&queues, &effective, &counts, Some((&page_counts, cap)))
                .or_else(|| select_pillar(&queues, &effective, &counts, None));
            let Some(pillar) = picked else { break };

            let Some((item, base_score)) = queues[pillar.index()].pop_front() else {
                break;
            };
            counts[pillar.index()] += 1;
            page_counts[pillar.index()] += 1;

            let pillar_weight = effective.get(pillar);
            ordered.push(HighwayContentItem {
                item: item.clone(),
                pillar_weight,
                base_score,
                final_score: base_score * pillar_weight,
            });
        }

        let start = page * page_size;
        if start >= ordered.len() {
            return Vec::new();
        }
        let end = (start + page_size).min(ordered.len());
        ordered[start..end].to_vec()
    }

    fn build_pillar_queues<'a>(
        &self,
        candidates: &[&'a ContentItem],
        now: DateTime<Utc>,
    ) -> [VecDeque<(&'a ContentItem, f64)>; ContentPillar::COUNT] {
        let mut queues: [Vec<(&ContentItem, f64)>; ContentPillar::COUNT] = Default::default();
        for &item in candidates {
            queues[item.pillar.index()].push((item, calculate_item_score(item, now)));
        }
        queues.map(|mut queue| {
            // Score descending, id as the deterministic tie-break
            queue.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.id.cmp(&b.0.id))
            });
            queue.into_iter().collect()
        })
    }
}

/// Restrict the requested weights to pillars that actually have candidates
/// and renormalize. Falls back to uniform-over-present when every requested
/// pillar is empty or zero-weighted.
fn effective_weights(
    requested: &PillarWeights,
    queues: &[VecDeque<(&ContentItem, f64)>; ContentPillar::COUNT],
) -> PillarWeights {
    let mut effective = PillarWeights::zero();
    for pillar in ContentPillar::ALL {
        if !queues[pillar.index()].is_empty() {
            effective.set(pillar, requested.get(pillar).max(0.0));
        }
    }
    if effective.is_zero() {
        for pillar in ContentPillar::ALL {
            if !queues[pillar.index()].is_empty() {
                effective.set(pillar, 1.0);
            }
        }
    }
    effective.normalized()
}

fn select_pillar(
    queues: &[VecDeque<(&ContentItem, f64)>; ContentPillar::COUNT],
    weights: &PillarWeights,
    counts: &[usize; ContentPillar::COUNT],
    page_cap: Option<(&[usize; ContentPillar::COUNT], usize)>,
) -> Option<ContentPillar> {
    let filled: usize = counts.iter().sum();
    let mut best: Option<(ContentPillar, f64)> = None;

    for pillar in ContentPillar::ALL {
        if queues[pillar.index()].is_empty() {
            continue;
        }
        if let Some((page_counts, cap)) = page_cap {
            if page_counts[pillar.index()] >= cap {
                continue;
            }
        }
        let deficit = weights.get(pillar) * (filled as f64 + 1.0) - counts[pillar.index()] as f64;
        match best {
            Some((_, best_deficit)) if deficit <= best_deficit => {}
            _ => best = Some((pillar, deficit)),
        }
    }

    best.map(|(pillar, _)| pillar)
}
