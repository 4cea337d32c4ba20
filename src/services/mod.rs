pub mod experiments;
pub mod intent;
pub mod mixer;
pub mod session;
pub mod telemetry;

pub use experiments::{DeltaConfig, Experiment, ExperimentRegistry, Variant, WeightModifiers};
pub use intent::{calculate_pillar_weights, transition_weights, IntentService};
pub use mixer::{calculate_item_score, filter_feed_content, FeedMixer};
pub use session::{SessionData, SessionEvent, SessionStore, Visibility};
pub use telemetry::{Telemetry, TelemetryEvent, TelemetrySink};
