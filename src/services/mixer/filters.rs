//! Hard-constraint and quality filtering, applied before any ranking.

use tracing::debug;

use crate::config::MixerConfig;
use crate::models::{ContentItem, FeedFilters};

/// Known junk aggregator sources, blocked outright.
const BLOCKED_SOURCES: &[&str] = &["theporndude", "porngeek", "porn dude"];

/// Title fragments that mark scraped link-list pages rather than content.
const LIST_PAGE_MARKERS: &[&str] = &[
    "top premium porn",
    "free porn tube",
    "best porn sites",
    "live sex cam sites",
];

fn contains_blocked_source(value: &str) -> bool {
    let lower = value.to_lowercase();
    BLOCKED_SOURCES.iter().any(|s| lower.contains(s))
}

/// True when the item is real content rather than scraped junk.
pub fn is_quality_content(item: &ContentItem, config: &MixerConfig) -> bool {
    let title = item.title.trim();
    if title.len() < config.min_title_length {
        return false;
    }
    // Truncated scrape artifacts end in "..." or "... +"
    let stripped = title.trim_end_matches('+').trim_end();
    if stripped.ends_with("...") || stripped.ends_with('…') {
        return false;
    }

    let title_lower = title.to_lowercase();
    if LIST_PAGE_MARKERS.iter().any(|m| title_lower.contains(m)) {
        return false;
    }

    if let Some(source) = &item.source_domain {
        if contains_blocked_source(source) {
            return false;
        }
    }
    if let Some(url) = &item.affiliate_url {
        if contains_blocked_source(url) {
            return false;
        }
    }
    if let Some(url) = &item.image_url {
        if contains_blocked_source(url) {
            return false;
        }
    }
    if let Some(description) = &item.description {
        if contains_blocked_source(description) {
            return false;
        }
    }

    true
}

/// Apply hard constraints: active flag, geographic relevance, pillar
/// allowlist, then the quality screen. Runs before ranking.
pub fn filter_feed_content<'a>(
    items: &'a [ContentItem],
    filters: &FeedFilters,
    config: &MixerConfig,
) -> Vec<&'a ContentItem> {
    let kept: Vec<&ContentItem> = items
        .iter()
        .filter(|item| item.active)
        .filter(|item| match &filters.city {
            Some(city) => item
                .city
                .as_deref()
                .map(|c| c.eq_ignore_ascii_case(city))
                .unwrap_or(false),
            None => true,
        })
        .filter(|item| match &filters.pillars {
            Some(pillars) => pillars.contains(&item.pillar),
            None => true,
        })
        .filter(|item| is_quality_content(item, config))
        .collect();

    debug!(
        total = items.len(),
        kept = kept.len(),
        "Feed content filtered"
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentPillar;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(title: &str) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            category: "evento".to_string(),
            pillar: ContentPillar::Event,
            city: Some("cdmx".to_string()),
            state: None,
            source_domain: None,
            image_url: None,
            video_url: None,
            affiliate_url: None,
            smartlink_url: None,
            is_verified: false,
            is_premium: false,
            active: true,
            likes: 0,
            views: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_blocked_source_rejected() {
        let mut junk = item("Noche de jazz en la Roma");
        junk.source_domain = Some("ThePornDude.com".to_string());
        assert!(!is_quality_content(&junk, &MixerConfig::default()));
    }

    #[test]
    fn test_truncated_title_rejected() {
        assert!(!is_quality_content(
            &item("Best clubs in town... +"),
            &MixerConfig::default()
        ));
        assert!(!is_quality_content(
            &item("Something cut off..."),
            &MixerConfig::default()
        ));
    }

    #[test]
    fn test_short_title_rejected() {
        assert!(!is_quality_content(&item("ok"), &MixerConfig::default()));
    }

    #[test]
    fn test_normal_content_passes() {
        assert!(is_quality_content(
            &item("Barra libre viernes en Condesa"),
            &MixerConfig::default()
        ));
    }

    #[test]
    fn test_city_filter() {
        let config = MixerConfig::default();
        let mut gdl = item("Concierto en el centro");
        gdl.city = Some("Guadalajara".to_string());
        let cdmx = item("Fiesta en la azotea");
        let pool = vec![gdl, cdmx];

        let filters = FeedFilters {
            city: Some("CDMX".to_string()),
            pillars: None,
        };
        let kept = filter_feed_content(&pool, &filters, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].city.as_deref(), Some("cdmx"));
    }

    #[test]
    fn test_inactive_dropped() {
        let config = MixerConfig::default();
        let mut dead = item("Evento cancelado hace meses");
        dead.active = false;
        let pool = [dead];
        let kept = filter_feed_content(&pool, &FeedFilters::default(), &config);
        assert!(kept.is_empty());
    }
}
