//! Study streaks.
//!
//! Two separate pieces of logic over the same [`StreakState`]:
//! [`apply_transition`] is the strict write-side state machine run once per
//! recorded study day, and [`project_display`] is the lenient read-side
//! projection that hides a stale streak without touching stored counters.
//!
//! All arithmetic uses plain calendar dates (`NaiveDate`), never instants.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::StreakState;

pub const MILESTONES: [u32; 6] = [7, 30, 50, 100, 200, 365];

/// Extra days of staleness tolerated on read to absorb timezone skew.
pub const DISPLAY_TOLERANCE_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakEvent {
    Started,
    Continued,
    Broken,
}

impl StreakEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Continued => "continued",
            Self::Broken => "broken",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakTransition {
    pub state: StreakState,
    pub event: StreakEvent,
    /// Ascending; empty when nothing new was reached.
    pub new_milestones: Vec<u32>,
    /// False for same-day replays, which leave the stored record untouched.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakUpdate {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub event: StreakEvent,
    pub is_new_milestone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u32>,
}

impl From<&StreakTransition> for StreakUpdate {
    fn from(transition: &StreakTransition) -> Self {
        let milestone = transition.new_milestones.last().copied();
        Self {
            current_streak: transition.state.current_streak,
            longest_streak: transition.state.longest_streak,
            event: transition.event,
            is_new_milestone: milestone.is_some(),
            milestone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedStreak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_study_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_study_date: Option<NaiveDate>,
    pub studied_today: bool,
    /// Alive, but today has no study yet.
    pub at_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_milestone: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_to_next_milestone: Option<u32>,
    pub milestones_reached: Vec<u32>,
}

fn reach_milestones(current: u32, reached: &mut BTreeSet<u32>) -> Vec<u32> {
    MILESTONES
        .iter()
        .copied()
        .filter(|m| *m <= current && reached.insert(*m))
        .collect()
}

fn next_milestone_after(current: u32) -> Option<u32> {
    MILESTONES.iter().copied().find(|m| *m > current)
}

/// Advance the streak for a study day in the user's local calendar.
pub fn apply_transition(
    existing: Option<&StreakState>,
    user_id: &str,
    study_date: NaiveDate,
) -> StreakTransition {
    let Some(prev) = existing else {
        let mut milestones_reached = BTreeSet::new();
        let new_milestones = reach_milestones(1, &mut milestones_reached);
        return StreakTransition {
            state: StreakState {
                user_id: user_id.to_string(),
                current_streak: 1,
                longest_streak: 1,
                last_study_date: study_date,
                streak_start_date: study_date,
                total_study_days: 1,
                last_milestone: new_milestones.last().copied(),
                milestones_reached,
            },
            event: StreakEvent::Started,
            new_milestones,
            changed: true,
        };
    };

    let gap = (study_date - prev.last_study_date).num_days();

    if gap <= 0 {
        if gap < 0 {
            tracing::warn!(
                user_id = %prev.user_id,
                last_study_date = %prev.last_study_date,
                %study_date,
                "study date precedes last recorded day, treating as replay"
            );
        }
        return StreakTransition {
            state: prev.clone(),
            event: StreakEvent::Continued,
            new_milestones: Vec::new(),
            changed: false,
        };
    }

    let mut state = prev.clone();
    state.last_study_date = study_date;
    state.total_study_days = state.total_study_days.saturating_add(1);

    let event = if gap == 1 {
        state.current_streak = state.current_streak.saturating_add(1);
        StreakEvent::Continued
    } else {
        state.current_streak = 1;
        state.streak_start_date = study_date;
        StreakEvent::Broken
    };
    state.longest_streak = state.longest_streak.max(state.current_streak);

    let new_milestones = reach_milestones(state.current_streak, &mut state.milestones_reached);
    if let Some(latest) = new_milestones.last() {
        state.last_milestone = Some(*latest);
    }

    StreakTransition {
        state,
        event,
        new_milestones,
        changed: true,
    }
}

/// Read-time view of the streak for `today` (user-local).
///
/// The stored counter goes stale when a user simply stops studying; the
/// projection reports 0 once the last study day is more than one day plus
/// [`DISPLAY_TOLERANCE_DAYS`] in the past.
pub fn project_display(state: Option<&StreakState>, today: NaiveDate) -> DisplayedStreak {
    let Some(state) = state else {
        return DisplayedStreak {
            current_streak: 0,
            longest_streak: 0,
            total_study_days: 0,
            last_study_date: None,
            studied_today: false,
            at_risk: false,
            next_milestone: next_milestone_after(0),
            days_to_next_milestone: next_milestone_after(0),
            milestones_reached: Vec::new(),
        };
    };

    let days_since = (today - state.last_study_date).num_days();
    let alive = days_since <= 1 + DISPLAY_TOLERANCE_DAYS;
    let current = if alive { state.current_streak } else { 0 };
    let next = next_milestone_after(current);

    DisplayedStreak {
        current_streak: current,
        longest_streak: state.longest_streak,
        total_study_days: state.total_study_days,
        last_study_date: Some(state.last_study_date),
        studied_today: days_since <= 0,
        at_risk: alive && days_since >= 1,
        next_milestone: next,
        days_to_next_milestone: next.map(|m| m - current),
        milestones_reached: state.milestones_reached.iter().copied().collect(),
    }
}
