#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use danci_scheduler::models::{Item, ReviewEvent};
use danci_scheduler::storage::MemoryRepository;
use danci_scheduler::{Config, ManualClock, SchedulerEngine};

pub type TestEngine = SchedulerEngine<MemoryRepository, Arc<ManualClock>>;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn create_test_engine() -> (TestEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = SchedulerEngine::new(MemoryRepository::new(), Arc::clone(&clock), Config::default());
    (engine, clock)
}

pub fn review(item_id: &str, at: DateTime<Utc>, success: bool) -> ReviewEvent {
    ReviewEvent::new(item_id, "u1", at, if success { 4 } else { 1 })
}

/// Append `outcomes` for `item_id`, one per hour ending just before `end`.
pub fn seed_reviews(
    repo: &MemoryRepository,
    item_id: &str,
    end: DateTime<Utc>,
    outcomes: &[bool],
    response_time_ms: Option<i64>,
) {
    use danci_scheduler::storage::Repository;

    let n = outcomes.len() as i64;
    for (idx, &ok) in outcomes.iter().enumerate() {
        let at = end - Duration::hours(n - idx as i64);
        let mut event = review(item_id, at, ok);
        event.response_time_ms = response_time_ms;
        repo.append_review_event(&event).unwrap();
    }
}

pub fn add_item(repo: &MemoryRepository, id: &str, front: &str, back: &str) {
    repo.upsert_item(Item::new(id, "u1", front, back));
}
