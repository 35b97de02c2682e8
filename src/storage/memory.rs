use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::{ConceptMasteryRecord, Item, ItemSchedulingState, ReviewEvent, StreakState};

use super::{Repository, StorageResult};

#[derive(Default)]
struct Tables {
    users: BTreeSet<String>,
    decks: BTreeSet<(String, String)>,
    items: HashMap<String, Item>,
    events_by_item: HashMap<String, Vec<ReviewEvent>>,
    events_by_user: HashMap<String, Vec<ReviewEvent>>,
    streaks: HashMap<String, StreakState>,
    mastery: HashMap<String, ConceptMasteryRecord>,
}

/// In-process repository backed by hash maps under one `RwLock`.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        self.tables.write().users.insert(user_id.to_string());
    }

    pub fn add_deck(&self, user_id: &str, deck_id: &str) {
        let mut tables = self.tables.write();
        tables.users.insert(user_id.to_string());
        tables
            .decks
            .insert((user_id.to_string(), deck_id.to_string()));
    }

    /// Insert or replace an item, registering its user and deck.
    pub fn upsert_item(&self, item: Item) {
        let mut tables = self.tables.write();
        tables.users.insert(item.user_id.clone());
        if let Some(deck) = &item.deck_id {
            tables.decks.insert((item.user_id.clone(), deck.clone()));
        }
        tables.items.insert(item.id.clone(), item);
    }

    pub fn event_count(&self) -> usize {
        self.tables
            .read()
            .events_by_item
            .values()
            .map(Vec::len)
            .sum()
    }
}

fn insert_sorted(events: &mut Vec<ReviewEvent>, event: ReviewEvent) {
    let idx = events.partition_point(|e| e.timestamp <= event.timestamp);
    events.insert(idx, event);
}

impl Repository for MemoryRepository {
    fn user_exists(&self, user_id: &str) -> StorageResult<bool> {
        Ok(self.tables.read().users.contains(user_id))
    }

    fn deck_exists(&self, user_id: &str, deck_id: &str) -> StorageResult<bool> {
        Ok(self
            .tables
            .read()
            .decks
            .contains(&(user_id.to_string(), deck_id.to_string())))
    }

    fn get_item(&self, item_id: &str) -> StorageResult<Option<Item>> {
        Ok(self.tables.read().items.get(item_id).cloned())
    }

    fn get_items(&self, user_id: &str, deck_id: Option<&str>) -> StorageResult<Vec<Item>> {
        let tables = self.tables.read();
        let mut items: Vec<Item> = tables
            .items
            .values()
            .filter(|item| item.user_id == user_id)
            .filter(|item| deck_id.is_none() || item.deck_id.as_deref() == deck_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    fn save_item_state(&self, item_id: &str, state: &ItemSchedulingState) -> StorageResult<()> {
        if let Some(item) = self.tables.write().items.get_mut(item_id) {
            item.scheduling = state.clone();
        }
        Ok(())
    }

    fn get_review_events(&self, item_id: &str) -> StorageResult<Vec<ReviewEvent>> {
        Ok(self
            .tables
            .read()
            .events_by_item
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_user_review_events(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ReviewEvent>> {
        let tables = self.tables.read();
        let Some(events) = tables.events_by_user.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = events.partition_point(|e| e.timestamp < since);
        let windowed = &events[start..];
        let skip = windowed.len().saturating_sub(limit);
        Ok(windowed[skip..].to_vec())
    }

    fn append_review_event(&self, event: &ReviewEvent) -> StorageResult<()> {
        let mut tables = self.tables.write();
        insert_sorted(
            tables
                .events_by_item
                .entry(event.item_id.clone())
                .or_default(),
            event.clone(),
        );
        insert_sorted(
            tables
                .events_by_user
                .entry(event.user_id.clone())
                .or_default(),
            event.clone(),
        );
        Ok(())
    }

    fn get_streak_state(&self, user_id: &str) -> StorageResult<Option<StreakState>> {
        Ok(self.tables.read().streaks.get(user_id).cloned())
    }

    fn save_streak_state(&self, state: &StreakState) -> StorageResult<()> {
        self.tables
            .write()
            .streaks
            .insert(state.user_id.clone(), state.clone());
        Ok(())
    }

    fn get_concept_mastery(&self, user_id: &str) -> StorageResult<Option<ConceptMasteryRecord>> {
        Ok(self.tables.read().mastery.get(user_id).cloned())
    }

    fn save_concept_mastery(&self, record: &ConceptMasteryRecord) -> StorageResult<()> {
        self.tables
            .write()
            .mastery
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}
