//! Repository layer.
//!
//! The scheduler reads review events, items and streak records through
//! [`Repository`] and writes back derived state. Two implementations:
//! - [`MemoryRepository`] - in-process maps, used by tests and embedders
//! - [`SqliteRepository`] - SQLite file or in-memory database

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ConceptMasteryRecord, Item, ItemSchedulingState, ReviewEvent, StreakState};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("lock acquisition failed: {0}")]
    LockError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub trait Repository: Send + Sync {
    fn user_exists(&self, user_id: &str) -> StorageResult<bool>;

    fn deck_exists(&self, user_id: &str, deck_id: &str) -> StorageResult<bool>;

    fn get_item(&self, item_id: &str) -> StorageResult<Option<Item>>;

    fn get_items(&self, user_id: &str, deck_id: Option<&str>) -> StorageResult<Vec<Item>>;

    fn save_item_state(&self, item_id: &str, state: &ItemSchedulingState) -> StorageResult<()>;

    /// All events for one item, oldest first.
    fn get_review_events(&self, item_id: &str) -> StorageResult<Vec<ReviewEvent>>;

    /// A user's events at or after `since`: the newest `limit`, oldest first.
    fn get_user_review_events(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ReviewEvent>>;

    fn append_review_event(&self, event: &ReviewEvent) -> StorageResult<()>;

    fn get_streak_state(&self, user_id: &str) -> StorageResult<Option<StreakState>>;

    fn save_streak_state(&self, state: &StreakState) -> StorageResult<()>;

    fn get_concept_mastery(&self, user_id: &str) -> StorageResult<Option<ConceptMasteryRecord>>;

    /// Full replace of the user's concept list.
    fn save_concept_mastery(&self, record: &ConceptMasteryRecord) -> StorageResult<()>;
}
