pub mod intent_repo;
pub mod redis_intent_repo;

pub use intent_repo::{InMemoryIntentStore, IntentStore};
pub use redis_intent_repo::RedisIntentStore;
