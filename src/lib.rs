//! Highway ranking core: session-aware feed mixing over content pillars.
//!
//! The crate tracks two horizons of user interest. Long-term intent is a
//! persisted per-pillar weight record updated by atomic increments; session
//! intent is a short-lived decaying signal map. `calculate_pillar_weights`
//! blends the two, and the [`FeedMixer`](services::FeedMixer) turns the
//! resulting distribution into stable, diverse feed pages.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use models::{ContentItem, ContentPillar, FeedFilters, HighwayContentItem, PillarWeights, UserIntent};
pub use services::{FeedMixer, IntentService, SessionStore, Telemetry};
