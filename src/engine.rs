//! Scheduler engine.
//!
//! Binds the pure services to a [`Repository`] and a [`Clock`]. Each call is
//! synchronous and recomputes from stored events; derived state is written
//! back as full-replace records. Streak updates for one user are serialized
//! through a per-user lock so that concurrent same-day calls cannot both
//! read the pre-update state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::{keys, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{SchedulerError, SchedulerResult};
use crate::models::{Item, ItemSchedulingState, ReviewEvent, MIN_EASE_FACTOR};
use crate::services::forgetting_curve::{self, ForgettingCurveReport};
use crate::services::mastery::{self, MasteryReport};
use crate::services::retention::{self, RetentionSummary};
use crate::services::sm2;
use crate::services::streak::{self, DisplayedStreak, StreakUpdate};
use crate::storage::Repository;

/// Minimum history before the forgetting curve overrides the SM-2 interval.
const CURVE_OVERRIDE_MIN_EVENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub item_id: String,
    pub priority_score: f64,
    pub optimal_review_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since_last_review: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

pub struct SchedulerEngine<R, C = SystemClock> {
    repo: R,
    clock: C,
    config: Config,
    cache: TtlCache,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    domain_hints: Vec<String>,
}

impl<R: Repository> SchedulerEngine<R, SystemClock> {
    pub fn with_system_clock(repo: R, config: Config) -> Self {
        Self::new(repo, SystemClock, config)
    }
}

impl<R: Repository, C: Clock> SchedulerEngine<R, C> {
    pub fn new(repo: R, clock: C, config: Config) -> Self {
        Self {
            repo,
            clock,
            config,
            cache: TtlCache::new(),
            user_locks: Mutex::new(HashMap::new()),
            domain_hints: Vec::new(),
        }
    }

    /// Concepts matching these hints are kept first during extraction.
    pub fn with_domain_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn hints(&self) -> Vec<&str> {
        self.domain_hints.iter().map(String::as_str).collect()
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock();
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    /// Drop the user's entry once no other caller holds it, so the map only
    /// holds users with an update in flight.
    fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock();
        drop(lock);
        if locks
            .get(user_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(user_id);
        }
    }

    #[cfg(test)]
    fn tracked_user_locks(&self) -> usize {
        self.user_locks.lock().len()
    }

    fn require_item(&self, item_id: &str) -> SchedulerResult<Item> {
        self.repo
            .get_item(item_id)?
            .ok_or_else(|| SchedulerError::item_not_found(item_id))
    }

    fn require_user(&self, user_id: &str) -> SchedulerResult<()> {
        if self.repo.user_exists(user_id)? {
            Ok(())
        } else {
            Err(SchedulerError::user_not_found(user_id))
        }
    }

    fn require_scope(&self, user_id: &str, deck_id: Option<&str>) -> SchedulerResult<()> {
        self.require_user(user_id)?;
        if let Some(deck_id) = deck_id {
            if !self.repo.deck_exists(user_id, deck_id)? {
                return Err(SchedulerError::deck_not_found(deck_id));
            }
        }
        Ok(())
    }

    fn curve_for(&self, item: &Item, events: &[ReviewEvent]) -> ForgettingCurveReport {
        let now = self.clock.now();
        let key = keys::forgetting_curve_key(&item.id);
        if let Some(cached) = self.cache.get::<ForgettingCurveReport>(&key, now) {
            return cached;
        }
        let report = forgetting_curve::build_report(
            events,
            f64::from(item.scheduling.interval_days),
            item.scheduling.ease_factor,
        );
        self.cache.set(&key, &report, self.config.curve_cache_ttl, now);
        report
    }

    fn invalidate_item(&self, item_id: &str, user_id: &str) {
        self.cache.delete(&keys::forgetting_curve_key(item_id));
        self.cache.delete_prefix(&keys::user_prefix(user_id));
    }

    pub fn compute_forgetting_curve(&self, item_id: &str) -> SchedulerResult<ForgettingCurveReport> {
        let item = self.require_item(item_id)?;
        let events = self.repo.get_review_events(item_id)?;
        Ok(self.curve_for(&item, &events))
    }

    fn score_item(
        &self,
        item: &Item,
        events: &[ReviewEvent],
        now: DateTime<Utc>,
    ) -> (f64, ForgettingCurveReport, Option<f64>) {
        let report = self.curve_for(item, events);
        let last_review = events
            .last()
            .map(|e| e.timestamp)
            .or(item.scheduling.last_reviewed_at);

        let days_since = last_review.map(|at| ((now - at).num_seconds() as f64 / 86_400.0).max(0.0));
        // never-reviewed items sit exactly at the optimal point
        let elapsed = days_since.unwrap_or(report.optimal_review_time);

        let score = forgetting_curve::forgetting_score(
            elapsed,
            report.optimal_review_time,
            report.retention_rate,
            report.forgetting_rate,
        );
        (score, report, days_since)
    }

    pub fn priority_score(&self, item_id: &str, now: DateTime<Utc>) -> SchedulerResult<f64> {
        let item = self.require_item(item_id)?;
        let events = self.repo.get_review_events(item_id)?;
        let (score, _, _) = self.score_item(&item, &events, now);
        Ok(score)
    }

    /// The user's items ordered by priority, highest first.
    pub fn review_queue(
        &self,
        user_id: &str,
        deck_id: Option<&str>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<QueueEntry>> {
        self.require_scope(user_id, deck_id)?;
        let items = self.repo.get_items(user_id, deck_id)?;

        let mut queue = Vec::with_capacity(items.len());
        for item in &items {
            let events = self.repo.get_review_events(&item.id)?;
            let (score, report, days_since) = self.score_item(item, &events, now);
            queue.push(QueueEntry {
                item_id: item.id.clone(),
                priority_score: score,
                optimal_review_time: report.optimal_review_time,
                days_since_last_review: days_since,
                due_date: item
                    .scheduling
                    .due_date
                    .or_else(|| item.scheduling.derived_due_date()),
            });
        }

        queue.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        queue.truncate(limit);
        Ok(queue)
    }

    /// Append a review and advance the item's schedule.
    ///
    /// SM-2 produces the base state; once the item has enough history a
    /// successful review takes the forgetting curve's optimal interval
    /// instead.
    pub fn record_review(&self, event: &ReviewEvent) -> SchedulerResult<ItemSchedulingState> {
        let item = self.require_item(&event.item_id)?;
        if item.user_id != event.user_id {
            return Err(SchedulerError::item_not_found(&event.item_id));
        }

        let mut event = event.clone();
        event.quality = event.quality.min(5);
        if !event.ease_factor_before.is_finite() || event.ease_factor_before < MIN_EASE_FACTOR {
            tracing::warn!(
                item_id = %event.item_id,
                ease_factor = event.ease_factor_before,
                "review carried invalid ease factor, using stored value"
            );
            event.ease_factor_before = item.scheduling.ease_factor.max(MIN_EASE_FACTOR);
        }

        self.repo.append_review_event(&event)?;
        let events = self.repo.get_review_events(&item.id)?;

        let mut next = sm2::next_state(&item.scheduling, event.quality, event.timestamp);
        let mut overridden = false;
        if event.was_successful
            && next.repetition_count >= CURVE_OVERRIDE_MIN_EVENTS as u32
            && events.len() >= CURVE_OVERRIDE_MIN_EVENTS
        {
            let curve = forgetting_curve::calculate_personal_forgetting_curve(&events);
            let optimal = forgetting_curve::optimal_review_time(
                &curve,
                f64::from(item.scheduling.interval_days),
                next.ease_factor,
            );
            next = sm2::with_interval(next, optimal.round() as u32);
            overridden = true;
        }

        self.repo.save_item_state(&item.id, &next)?;
        self.invalidate_item(&item.id, &item.user_id);

        tracing::debug!(
            item_id = %item.id,
            quality = event.quality,
            interval_days = next.interval_days,
            overridden,
            "review recorded"
        );
        Ok(next)
    }

    /// Full recomputation of the user's concept mastery; replaces the stored
    /// record.
    pub fn recalculate_mastery(
        &self,
        user_id: &str,
        deck_id: Option<&str>,
    ) -> SchedulerResult<MasteryReport> {
        self.require_scope(user_id, deck_id)?;
        let now = self.clock.now();

        let items = self.repo.get_items(user_id, deck_id)?;
        let since = mastery::window_start(now, self.config.mastery_window_days);
        let cap = self.config.mastery_event_cap;
        let events = self.repo.get_user_review_events(user_id, since, cap)?;
        let events = mastery::bound_window(&events, since, cap);

        let concepts = mastery::analyze_concepts(&items, &events, now, &self.hints());
        let record = mastery::build_record(user_id, deck_id, concepts, now, false);
        self.repo.save_concept_mastery(&record)?;

        let report = MasteryReport::from(&record);
        self.cache.set(
            &keys::mastery_key(user_id, deck_id),
            &report,
            self.config.mastery_cache_ttl,
            now,
        );

        tracing::info!(
            user_id = %user_id,
            items = items.len(),
            events = events.len(),
            concepts = report.concepts_analyzed,
            average_mastery = report.average_mastery,
            "concept mastery recalculated"
        );
        Ok(report)
    }

    /// Cached mastery report; `force_refresh` always recomputes.
    pub fn mastery_report(
        &self,
        user_id: &str,
        deck_id: Option<&str>,
        force_refresh: bool,
    ) -> SchedulerResult<MasteryReport> {
        if !force_refresh {
            let key = keys::mastery_key(user_id, deck_id);
            if let Some(cached) = self.cache.get::<MasteryReport>(&key, self.clock.now()) {
                return Ok(cached);
            }
        }
        self.recalculate_mastery(user_id, deck_id)
    }

    /// Record a batch of reviews and smooth the stored concept list with it.
    ///
    /// Every item is resolved before anything is written, so a batch naming
    /// an unknown item fails without side effects. Without a stored record
    /// this is a full recomputation.
    pub fn apply_review_batch(
        &self,
        user_id: &str,
        events: &[ReviewEvent],
    ) -> SchedulerResult<MasteryReport> {
        self.require_user(user_id)?;

        let mut accepted = Vec::with_capacity(events.len());
        for event in events {
            if event.user_id != user_id {
                tracing::warn!(
                    user_id = %user_id,
                    event_user = %event.user_id,
                    "skipping review event of another user"
                );
                continue;
            }
            let item = self.require_item(&event.item_id)?;
            if item.user_id != user_id {
                return Err(SchedulerError::item_not_found(&event.item_id));
            }
            accepted.push(event.clone());
        }

        for event in &accepted {
            self.record_review(event)?;
        }

        let Some(previous) = self.repo.get_concept_mastery(user_id)? else {
            return self.recalculate_mastery(user_id, None);
        };

        let now = self.clock.now();
        let items = self.repo.get_items(user_id, previous.deck_id.as_deref())?;
        let record = mastery::apply_incremental(
            &previous,
            &items,
            &accepted,
            now,
            self.config.smoothing_alpha,
            &self.hints(),
        );
        self.repo.save_concept_mastery(&record)?;
        self.cache.delete_prefix(&keys::user_prefix(user_id));

        tracing::info!(
            user_id = %user_id,
            batch = accepted.len(),
            concepts = record.concepts.len(),
            "concept mastery smoothed"
        );
        Ok(MasteryReport::from(&record))
    }

    /// Advance the user's streak for `local_date`.
    pub fn record_study_day(
        &self,
        user_id: &str,
        local_date: NaiveDate,
    ) -> SchedulerResult<StreakUpdate> {
        self.require_user(user_id)?;

        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock();
            self.apply_study_day(user_id, local_date)
        };
        self.release_user_lock(user_id, lock);
        let transition = result?;

        if !transition.new_milestones.is_empty() {
            tracing::info!(
                user_id = %user_id,
                milestones = ?transition.new_milestones,
                "streak milestone reached"
            );
        }
        tracing::info!(
            user_id = %user_id,
            %local_date,
            event = transition.event.as_str(),
            current = transition.state.current_streak,
            longest = transition.state.longest_streak,
            "study day recorded"
        );
        Ok(StreakUpdate::from(&transition))
    }

    fn apply_study_day(
        &self,
        user_id: &str,
        local_date: NaiveDate,
    ) -> SchedulerResult<streak::StreakTransition> {
        let existing = self.repo.get_streak_state(user_id)?;
        let transition = streak::apply_transition(existing.as_ref(), user_id, local_date);
        if transition.changed {
            self.repo.save_streak_state(&transition.state)?;
        }
        Ok(transition)
    }

    /// Read-time projection; never writes.
    pub fn displayed_streak(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> SchedulerResult<DisplayedStreak> {
        self.require_user(user_id)?;
        let state = self.repo.get_streak_state(user_id)?;
        Ok(streak::project_display(state.as_ref(), today))
    }

    /// Retention over the trailing window (config default when `None`).
    pub fn retention_rate(
        &self,
        user_id: &str,
        window_days: Option<i64>,
    ) -> SchedulerResult<RetentionSummary> {
        self.require_user(user_id)?;
        let days = window_days.unwrap_or(self.config.retention_window_days);
        let since = mastery::window_start(self.clock.now(), days);
        let events = self.repo.get_user_review_events(user_id, since, usize::MAX)?;
        Ok(retention::summarize(&events))
    }
}
