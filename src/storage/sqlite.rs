//! SQLite-backed repository.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::Config;
use crate::models::{ConceptMasteryRecord, Item, ItemSchedulingState, ReviewEvent, StreakState};

use super::migrations::run_migrations;
use super::{Repository, StorageError, StorageResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

const ITEM_COLUMNS: &str = "id, user_id, deck_id, front_text, back_text, repetition_count, \
     ease_factor, interval_days, last_reviewed_at, due_date";

const EVENT_COLUMNS: &str =
    "item_id, user_id, timestamp, quality, was_successful, response_time_ms, ease_factor_before";

pub struct SqliteRepository {
    connection: Mutex<Connection>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) a database file, enabling WAL and running migrations.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        Self::initialize(connection, path_str)
    }

    /// Open `config.db_path`, or an in-memory database when none is set.
    pub fn from_config(config: &Config) -> StorageResult<Self> {
        match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::InvalidData(format!(
                            "cannot create database directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Self::open(path)
            }
            None => {
                tracing::warn!("SCHEDULER_DB_PATH not set, using an in-memory database");
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::initialize(connection, ":memory:".to_string())
    }

    fn initialize(mut connection: Connection, db_path: String) -> StorageResult<Self> {
        let version = run_migrations(&mut connection)?;
        tracing::debug!(db_path = %db_path, version, "scheduler database ready");
        Ok(Self {
            connection: Mutex::new(connection),
            db_path,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    pub fn insert_user(&self, user_id: &str) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO users (id) VALUES (?1)",
            params![user_id],
        )?;
        Ok(())
    }

    pub fn insert_deck(&self, user_id: &str, deck_id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id) VALUES (?1)",
            params![user_id],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO decks (id, user_id) VALUES (?1, ?2)",
            params![deck_id, user_id],
        )?;
        Ok(())
    }

    /// Insert or replace an item, registering its user and deck.
    pub fn upsert_item(&self, item: &Item) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO users (id) VALUES (?1)",
            params![item.user_id],
        )?;
        if let Some(deck_id) = &item.deck_id {
            tx.execute(
                "INSERT OR IGNORE INTO decks (id, user_id) VALUES (?1, ?2)",
                params![deck_id, item.user_id],
            )?;
        }
        let s = &item.scheduling;
        tx.execute(
            r#"
            INSERT INTO items (id, user_id, deck_id, front_text, back_text, repetition_count,
                               ease_factor, interval_days, last_reviewed_at, due_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                deck_id = excluded.deck_id,
                front_text = excluded.front_text,
                back_text = excluded.back_text,
                repetition_count = excluded.repetition_count,
                ease_factor = excluded.ease_factor,
                interval_days = excluded.interval_days,
                last_reviewed_at = excluded.last_reviewed_at,
                due_date = excluded.due_date
            "#,
            params![
                item.id,
                item.user_id,
                item.deck_id,
                item.front_text,
                item.back_text,
                s.repetition_count,
                s.ease_factor,
                s.interval_days,
                s.last_reviewed_at.map(format_timestamp),
                s.due_date.map(format_timestamp),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.as_deref().map(|s| parse_timestamp(idx, s)).transpose()
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        user_id: row.get(1)?,
        deck_id: row.get(2)?,
        front_text: row.get(3)?,
        back_text: row.get(4)?,
        scheduling: ItemSchedulingState {
            repetition_count: row.get(5)?,
            ease_factor: row.get(6)?,
            interval_days: row.get(7)?,
            last_reviewed_at: optional_timestamp(row, 8)?,
            due_date: optional_timestamp(row, 9)?,
        },
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewEvent> {
    let timestamp: String = row.get(2)?;
    Ok(ReviewEvent {
        item_id: row.get(0)?,
        user_id: row.get(1)?,
        timestamp: parse_timestamp(2, &timestamp)?,
        quality: row.get(3)?,
        was_successful: row.get(4)?,
        response_time_ms: row.get(5)?,
        ease_factor_before: row.get(6)?,
    })
}

fn parse_date(raw: &str) -> StorageResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StorageError::InvalidData(format!("bad date {raw:?}: {e}")))
}

struct StreakRow {
    user_id: String,
    current_streak: u32,
    longest_streak: u32,
    last_study_date: String,
    streak_start_date: String,
    total_study_days: u32,
    milestones_reached: String,
    last_milestone: Option<u32>,
}

impl StreakRow {
    fn into_state(self) -> StorageResult<StreakState> {
        let milestones: Vec<u32> = serde_json::from_str(&self.milestones_reached)?;
        Ok(StreakState {
            user_id: self.user_id,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            last_study_date: parse_date(&self.last_study_date)?,
            streak_start_date: parse_date(&self.streak_start_date)?,
            total_study_days: self.total_study_days,
            milestones_reached: milestones.into_iter().collect::<BTreeSet<u32>>(),
            last_milestone: self.last_milestone,
        })
    }
}

impl Repository for SqliteRepository {
    fn user_exists(&self, user_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn deck_exists(&self, user_id: &str, deck_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM decks WHERE user_id = ?1 AND id = ?2",
                params![user_id, deck_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_item(&self, item_id: &str) -> StorageResult<Option<Item>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![item_id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn get_items(&self, user_id: &str, deck_id: Option<&str>) -> StorageResult<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE user_id = ?1 AND (?2 IS NULL OR deck_id = ?2)
             ORDER BY id"
        ))?;
        let items = stmt
            .query_map(params![user_id, deck_id], item_from_row)?
            .collect::<rusqlite::Result<Vec<Item>>>()?;
        Ok(items)
    }

    fn save_item_state(&self, item_id: &str, state: &ItemSchedulingState) -> StorageResult<()> {
        self.conn()?.execute(
            "UPDATE items SET repetition_count = ?1, ease_factor = ?2, interval_days = ?3,
                    last_reviewed_at = ?4, due_date = ?5
             WHERE id = ?6",
            params![
                state.repetition_count,
                state.ease_factor,
                state.interval_days,
                state.last_reviewed_at.map(format_timestamp),
                state.due_date.map(format_timestamp),
                item_id,
            ],
        )?;
        Ok(())
    }

    fn get_review_events(&self, item_id: &str) -> StorageResult<Vec<ReviewEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM review_events
             WHERE item_id = ?1 ORDER BY timestamp ASC, seq ASC"
        ))?;
        let events = stmt
            .query_map(params![item_id], event_from_row)?
            .collect::<rusqlite::Result<Vec<ReviewEvent>>>()?;
        Ok(events)
    }

    fn get_user_review_events(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ReviewEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM review_events
             WHERE user_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, seq DESC LIMIT ?3"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut events = stmt
            .query_map(params![user_id, format_timestamp(since), limit], event_from_row)?
            .collect::<rusqlite::Result<Vec<ReviewEvent>>>()?;
        events.reverse();
        Ok(events)
    }

    fn append_review_event(&self, event: &ReviewEvent) -> StorageResult<()> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO review_events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                event.item_id,
                event.user_id,
                format_timestamp(event.timestamp),
                event.quality.min(5),
                event.was_successful,
                event.response_time_ms,
                event.ease_factor_before,
            ],
        )?;
        Ok(())
    }

    fn get_streak_state(&self, user_id: &str) -> StorageResult<Option<StreakState>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT user_id, current_streak, longest_streak, last_study_date,
                        streak_start_date, total_study_days, milestones_reached, last_milestone
                 FROM streak_states WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(StreakRow {
                        user_id: row.get(0)?,
                        current_streak: row.get(1)?,
                        longest_streak: row.get(2)?,
                        last_study_date: row.get(3)?,
                        streak_start_date: row.get(4)?,
                        total_study_days: row.get(5)?,
                        milestones_reached: row.get(6)?,
                        last_milestone: row.get(7)?,
                    })
                },
            )
            .optional()?;
        row.map(StreakRow::into_state).transpose()
    }

    fn save_streak_state(&self, state: &StreakState) -> StorageResult<()> {
        let milestones: Vec<u32> = state.milestones_reached.iter().copied().collect();
        let milestones_json = serde_json::to_string(&milestones)?;
        self.conn()?.execute(
            r#"
            INSERT INTO streak_states (user_id, current_streak, longest_streak, last_study_date,
                                       streak_start_date, total_study_days, milestones_reached,
                                       last_milestone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_study_date = excluded.last_study_date,
                streak_start_date = excluded.streak_start_date,
                total_study_days = excluded.total_study_days,
                milestones_reached = excluded.milestones_reached,
                last_milestone = excluded.last_milestone
            "#,
            params![
                state.user_id,
                state.current_streak,
                state.longest_streak,
                state.last_study_date.format(DATE_FORMAT).to_string(),
                state.streak_start_date.format(DATE_FORMAT).to_string(),
                state.total_study_days,
                milestones_json,
                state.last_milestone,
            ],
        )?;
        Ok(())
    }

    fn get_concept_mastery(&self, user_id: &str) -> StorageResult<Option<ConceptMasteryRecord>> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM concept_mastery WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StorageError::from))
            .transpose()
    }

    fn save_concept_mastery(&self, record: &ConceptMasteryRecord) -> StorageResult<()> {
        let payload = serde_json::to_string(record)?;
        self.conn()?.execute(
            r#"
            INSERT INTO concept_mastery (user_id, record_id, deck_id, payload, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                record_id = excluded.record_id,
                deck_id = excluded.deck_id,
                payload = excluded.payload,
                computed_at = excluded.computed_at
            "#,
            params![
                record.user_id,
                record.id,
                record.deck_id,
                payload,
                format_timestamp(record.computed_at),
            ],
        )?;
        Ok(())
    }
}
