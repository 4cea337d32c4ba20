use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Fixed content category space of the Highway feed.
///
/// Every weight mapping in the ranking core is keyed by this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPillar {
    Adult,
    Event,
    Job,
}

impl ContentPillar {
    pub const ALL: [ContentPillar; 3] = [ContentPillar::Adult, ContentPillar::Event, ContentPillar::Job];
    pub const COUNT: usize = 3;

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentPillar::Adult => "adult",
            ContentPillar::Event => "event",
            ContentPillar::Job => "job",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            ContentPillar::Adult => 0,
            ContentPillar::Event => 1,
            ContentPillar::Job => 2,
        }
    }

    /// Map a raw category tag to its pillar. Unknown tags return `None` and
    /// are dropped at the pool boundary.
    pub fn from_category(category: &str) -> Option<ContentPillar> {
        let normalized = category.trim().to_lowercase();
        match normalized.as_str() {
            "webcam" | "camsoda" | "stripchat" | "chaturbate" | "soltero" | "live-cams"
            | "ai-porn" | "free-tubes" | "hookup" | "stripclub" | "sexshop" | "masaje"
            | "adult" => Some(ContentPillar::Adult),
            "evento" | "event" | "bar" | "club" | "concierto" | "fiesta" | "restaurante"
            | "hotel" | "tour" | "actividad" => Some(ContentPillar::Event),
            "empleo" | "job" | "edecanes" | "modelo" | "gio" | "demostradora" | "bailarina"
            | "casting" | "agencia" => Some(ContentPillar::Job),
            _ => None,
        }
    }
}

/// How a user touched a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    View,
    Like,
}

/// Traffic origin class used to seed a fresh intent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Referrer {
    Job,
    Event,
    Adult,
    Direct,
    Organic,
}

impl Referrer {
    /// Classify a raw referrer string (UTM source, hostname, path hint).
    pub fn detect(raw: &str) -> Referrer {
        let r = raw.to_lowercase();
        if r.contains("empleo") || r.contains("job") || r.contains("linkedin") || r.contains("trabajo")
        {
            Referrer::Job
        } else if r.contains("evento")
            || r.contains("party")
            || r.contains("fiesta")
            || r.contains("concierto")
        {
            Referrer::Event
        } else if r.contains("adult") || r.contains("xxx") || r.contains("cam") || r.contains("porn")
        {
            Referrer::Adult
        } else if r.contains("google") || r.contains("bing") || r.contains("search") {
            Referrer::Organic
        } else {
            Referrer::Direct
        }
    }

    /// Position on the cold (0, job traffic) to hot (1, adult traffic) axis.
    pub fn initial_intent_score(&self) -> f64 {
        match self {
            Referrer::Job => 0.0,
            Referrer::Event => 0.4,
            Referrer::Adult => 0.8,
            Referrer::Direct => 0.5,
            Referrer::Organic => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Referrer::Job => "job",
            Referrer::Event => "event",
            Referrer::Adult => "adult",
            Referrer::Direct => "direct",
            Referrer::Organic => "organic",
        }
    }

    pub fn from_str_lossy(s: &str) -> Referrer {
        match s {
            "job" => Referrer::Job,
            "event" => Referrer::Event,
            "adult" => Referrer::Adult,
            "organic" => Referrer::Organic,
            _ => Referrer::Direct,
        }
    }
}

/// Dense non-negative weight vector over the pillar space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PillarWeights {
    weights: [f64; ContentPillar::COUNT],
}

impl PillarWeights {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn uniform() -> Self {
        let w = 1.0 / ContentPillar::COUNT as f64;
        Self {
            weights: [w; ContentPillar::COUNT],
        }
    }

    pub fn get(&self, pillar: ContentPillar) -> f64 {
        self.weights[pillar.index()]
    }

    pub fn set(&mut self, pillar: ContentPillar, value: f64) {
        self.weights[pillar.index()] = value.max(0.0);
    }

    pub fn add(&mut self, pillar: ContentPillar, delta: f64) {
        let idx = pillar.index();
        self.weights[idx] = (self.weights[idx] + delta).max(0.0);
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.total() <= f64::EPSILON
    }

    /// Scale to a probability-like distribution. A zero vector stays zero;
    /// callers decide the fallback.
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= f64::EPSILON {
            return *self;
        }
        let mut out = *self;
        for w in out.weights.iter_mut() {
            *w /= total;
        }
        out
    }

    pub fn scale(&self, factor: f64) -> Self {
        let mut out = *self;
        for w in out.weights.iter_mut() {
            *w = (*w * factor).max(0.0);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContentPillar, f64)> + '_ {
        ContentPillar::ALL.iter().map(move |&p| (p, self.get(p)))
    }
}

impl FromIterator<(ContentPillar, f64)> for PillarWeights {
    fn from_iter<I: IntoIterator<Item = (ContentPillar, f64)>>(iter: I) -> Self {
        let mut out = PillarWeights::zero();
        for (pillar, weight) in iter {
            out.add(pillar, weight);
        }
        out
    }
}

/// Persistent per-user preference record.
///
/// Weights are raw accumulations; normalization happens at read time via
/// `normalized_weights`. Like counters feed the event-like bonus schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIntent {
    pub user_id: Uuid,
    pub weights: HashMap<ContentPillar, f64>,
    pub likes: HashMap<ContentPillar, u32>,
    pub total_views: u32,
    pub referrer: Referrer,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserIntent {
    pub fn new(user_id: Uuid, referrer: Referrer, seed: PillarWeights, now: DateTime<Utc>) -> Self {
        let weights = seed
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .collect::<HashMap<_, _>>();
        Self {
            user_id,
            weights,
            likes: HashMap::new(),
            total_views: 0,
            referrer,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn like_count(&self, pillar: ContentPillar) -> u32 {
        self.likes.get(&pillar).copied().unwrap_or(0)
    }

    /// Read-time view of the weights as a distribution. Negative residues
    /// from storage clamp to zero; an empty record reads as uniform.
    pub fn normalized_weights(&self) -> PillarWeights {
        let raw: PillarWeights = self
            .weights
            .iter()
            .map(|(&p, &w)| (p, w.max(0.0)))
            .collect();
        if raw.is_zero() {
            PillarWeights::uniform()
        } else {
            raw.normalized()
        }
    }
}

/// Loose shape accepted at the pool-ingestion boundary. Everything optional
/// except what identifies the row; `ContentItem::try_from` enforces the rest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawContentItem {
    pub id: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub category: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub source_domain: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub smartlink_url: Option<String>,
    pub salary_range: Option<String>,
    pub venue_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub views: u32,
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl RawContentItem {
    /// Resolve the pillar from the category table, falling back to field
    /// heuristics when the tag is unknown.
    fn detect_pillar(&self) -> Option<ContentPillar> {
        if let Some(pillar) = ContentPillar::from_category(&self.category) {
            return Some(pillar);
        }
        if self.smartlink_url.is_some() || self.affiliate_url.is_some() {
            return Some(ContentPillar::Adult);
        }
        if self.salary_range.is_some() {
            return Some(ContentPillar::Job);
        }
        if self.start_date.is_some() || self.venue_name.is_some() {
            return Some(ContentPillar::Event);
        }
        None
    }
}

/// Immutable-once-validated content record as the mixer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub pillar: ContentPillar,
    pub city: Option<String>,
    pub state: Option<String>,
    pub source_domain: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub smartlink_url: Option<String>,
    pub is_verified: bool,
    pub is_premium: bool,
    pub active: bool,
    pub likes: u32,
    pub views: u32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RawContentItem> for ContentItem {
    type Error = AppError;

    fn try_from(raw: RawContentItem) -> Result<Self> {
        let id = raw
            .id
            .ok_or_else(|| AppError::InvalidContent("missing id".to_string()))?;
        if raw.title.trim().is_empty() {
            return Err(AppError::InvalidContent(format!("{id}: empty title")));
        }
        let pillar = raw.detect_pillar().ok_or_else(|| {
            AppError::InvalidContent(format!("{id}: unknown category '{}'", raw.category))
        })?;
        let created_at = raw.created_at.unwrap_or_else(Utc::now);

        Ok(ContentItem {
            id,
            title: raw.title,
            description: raw.description,
            category: raw.category,
            pillar,
            city: raw.city,
            state: raw.state,
            source_domain: raw.source_domain,
            image_url: raw.image_url,
            video_url: raw.video_url,
            affiliate_url: raw.affiliate_url,
            smartlink_url: raw.smartlink_url,
            is_verified: raw.is_verified,
            is_premium: raw.is_premium,
            active: raw.active,
            likes: raw.likes,
            views: raw.views,
            created_at,
        })
    }
}

/// Validate a raw pool, dropping malformed rows with a warning instead of
/// failing the whole feed request.
pub fn validate_pool(raw: Vec<RawContentItem>) -> Vec<ContentItem> {
    let total = raw.len();
    let items: Vec<ContentItem> = raw
        .into_iter()
        .filter_map(|r| match ContentItem::try_from(r) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Dropping malformed content item");
                None
            }
        })
        .collect();
    if items.len() < total {
        warn!(
            dropped = total - items.len(),
            kept = items.len(),
            "Pool validation dropped items"
        );
    }
    items
}

/// Content item annotated by the mixer during assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighwayContentItem {
    #[serde(flatten)]
    pub item: ContentItem,
    pub pillar_weight: f64,
    pub base_score: f64,
    pub final_score: f64,
}

/// Hard constraints applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct FeedFilters {
    /// Restrict to items tagged with this city (case-insensitive)
    pub city: Option<String>,
    /// Restrict to a subset of pillars
    pub pillars: Option<Vec<ContentPillar>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(category: &str) -> RawContentItem {
        RawContentItem {
            id: Some(Uuid::new_v4()),
            title: "Noche de salsa en el centro".to_string(),
            category: category.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(ContentPillar::from_category("webcam"), Some(ContentPillar::Adult));
        assert_eq!(ContentPillar::from_category("EVENTO"), Some(ContentPillar::Event));
        assert_eq!(ContentPillar::from_category("empleo"), Some(ContentPillar::Job));
        assert_eq!(ContentPillar::from_category("mistery"), None);
    }

    #[test]
    fn test_unknown_category_dropped() {
        let pool = vec![raw("evento"), raw("totally-unknown"), raw("empleo")];
        let validated = validate_pool(pool);
        assert_eq!(validated.len(), 2);
    }

    #[test]
    fn test_heuristic_pillar_rescue() {
        let mut item = raw("unknown-cat");
        item.salary_range = Some("10k-15k MXN".to_string());
        let validated = validate_pool(vec![item]);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].pillar, ContentPillar::Job);
    }

    #[test]
    fn test_missing_id_rejected() {
        let mut item = raw("evento");
        item.id = None;
        assert!(ContentItem::try_from(item).is_err());
    }

    #[test]
    fn test_weights_never_negative() {
        let mut w = PillarWeights::zero();
        w.add(ContentPillar::Event, 0.5);
        w.add(ContentPillar::Event, -2.0);
        assert_eq!(w.get(ContentPillar::Event), 0.0);
    }

    #[test]
    fn test_normalized_sums_to_one() {
        let mut w = PillarWeights::zero();
        w.set(ContentPillar::Adult, 3.0);
        w.set(ContentPillar::Job, 1.0);
        let n = w.normalized();
        assert!((n.total() - 1.0).abs() < 1e-9);
        assert!((n.get(ContentPillar::Adult) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_intent_reads_uniform() {
        let intent = UserIntent::new(
            Uuid::new_v4(),
            Referrer::Direct,
            PillarWeights::zero(),
            Utc::now(),
        );
        let w = intent.normalized_weights();
        assert!((w.total() - 1.0).abs() < 1e-9);
        assert!((w.get(ContentPillar::Event) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_referrer_detection() {
        assert_eq!(Referrer::detect("https://mx.linkedin.com/jobs"), Referrer::Job);
        assert_eq!(Referrer::detect("utm_source=fiesta-cdmx"), Referrer::Event);
        assert_eq!(Referrer::detect("google.com"), Referrer::Organic);
        assert_eq!(Referrer::detect(""), Referrer::Direct);
    }
}
