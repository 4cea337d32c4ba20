use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub session: SessionConfig,
    pub intent: IntentConfig,
    pub mixer: MixerConfig,
    pub redis: RedisConfig,
}

/// One tier of the inactivity-based decay schedule.
///
/// The per-minute rate of the tier matching the current inactivity span is
/// raised to the number of minutes elapsed since the last decay application.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DecayTier {
    pub max_inactive_minutes: f64,
    pub rate_per_minute: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Inactivity after which the next touch starts a new logical session
    pub timeout_minutes: i64,
    /// Decay schedule, ordered by ascending inactivity span
    pub decay_tiers: Vec<DecayTier>,
    /// Signals below this snap to zero and are dropped (cold)
    pub min_signal_threshold: f64,
    /// Fraction removed from every signal on a background transition
    pub reset_fraction: f64,
    /// Decay ticks closer together than this are ignored
    pub decay_debounce_secs: i64,
    pub view_increment: f64,
    pub like_increment: f64,
    /// How long a shown item stays excluded from the feed
    pub seen_cooldown_minutes: i64,
    /// Upper bound on the per-session seen-items map
    pub max_seen_items: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            decay_tiers: vec![
                DecayTier {
                    max_inactive_minutes: 5.0,
                    rate_per_minute: 0.995,
                },
                DecayTier {
                    max_inactive_minutes: 15.0,
                    rate_per_minute: 0.97,
                },
                DecayTier {
                    max_inactive_minutes: 30.0,
                    rate_per_minute: 0.90,
                },
                DecayTier {
                    max_inactive_minutes: f64::INFINITY,
                    rate_per_minute: 0.50,
                },
            ],
            min_signal_threshold: 0.15,
            reset_fraction: 0.5,
            decay_debounce_secs: 2,
            view_increment: 0.25,
            like_increment: 1.0,
            seen_cooldown_minutes: 240,
            max_seen_items: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    /// Total mass of the initial pillar weights seeded at creation
    pub baseline_weight: f64,
    /// How much the short-lived session signals outweigh long-term intent
    pub session_bias: f64,
    /// Backoff before the single storage retry
    pub retry_backoff_ms: u64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            baseline_weight: 1.0,
            session_bias: 0.6,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MixerConfig {
    /// Anti-monotony cap: max fraction of a page a single pillar may occupy
    pub max_pillar_page_fraction: f64,
    /// Window (in pages) over which every weighted pillar must surface
    pub diversity_window_pages: usize,
    pub min_title_length: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            max_pillar_page_fraction: 0.6,
            diversity_window_pages: 5,
            min_title_length: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "highway".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Config {
            session: SessionConfig {
                timeout_minutes: env_or("SESSION_TIMEOUT_MINUTES", defaults.session.timeout_minutes),
                decay_tiers: defaults.session.decay_tiers.clone(),
                min_signal_threshold: env_or(
                    "SESSION_MIN_SIGNAL_THRESHOLD",
                    defaults.session.min_signal_threshold,
                ),
                reset_fraction: env_or("SESSION_RESET_FRACTION", defaults.session.reset_fraction),
                decay_debounce_secs: env_or(
                    "SESSION_DECAY_DEBOUNCE_SECS",
                    defaults.session.decay_debounce_secs,
                ),
                view_increment: env_or("SESSION_VIEW_INCREMENT", defaults.session.view_increment),
                like_increment: env_or("SESSION_LIKE_INCREMENT", defaults.session.like_increment),
                seen_cooldown_minutes: env_or(
                    "SEEN_COOLDOWN_MINUTES",
                    defaults.session.seen_cooldown_minutes,
                ),
                max_seen_items: env_or("MAX_SEEN_ITEMS", defaults.session.max_seen_items),
            },
            intent: IntentConfig {
                baseline_weight: env_or("INTENT_BASELINE_WEIGHT", defaults.intent.baseline_weight),
                session_bias: env_or("INTENT_SESSION_BIAS", defaults.intent.session_bias),
                retry_backoff_ms: env_or("INTENT_RETRY_BACKOFF_MS", defaults.intent.retry_backoff_ms),
            },
            mixer: MixerConfig {
                max_pillar_page_fraction: env_or(
                    "MIXER_MAX_PILLAR_PAGE_FRACTION",
                    defaults.mixer.max_pillar_page_fraction,
                ),
                diversity_window_pages: env_or(
                    "MIXER_DIVERSITY_WINDOW_PAGES",
                    defaults.mixer.diversity_window_pages,
                ),
                min_title_length: env_or("MIXER_MIN_TITLE_LENGTH", defaults.mixer.min_title_length),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or(defaults.redis.url),
                key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.redis.key_prefix),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
