//! Base SM-2 update.
//!
//! Quality 0-2 resets the repetition count; 3-5 advances 1 day -> 6 days ->
//! interval x ease factor. The ease factor never drops below 1.3. The
//! forgetting-curve estimate may later override the resulting interval.

use chrono::{DateTime, Duration, Utc};

use crate::models::{ItemSchedulingState, MIN_EASE_FACTOR};
use crate::sanitize::finite_or;

use super::forgetting_curve::MAX_OPTIMAL_DAYS;

pub fn next_state(
    state: &ItemSchedulingState,
    quality: u8,
    reviewed_at: DateTime<Utc>,
) -> ItemSchedulingState {
    let quality = quality.min(5);
    let q = f64::from(quality);

    let current_ease = finite_or(state.ease_factor, MIN_EASE_FACTOR);
    let ease_factor =
        (current_ease + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02))).max(MIN_EASE_FACTOR);

    let (interval_days, repetition_count) = if quality < 3 {
        (1, 0)
    } else {
        let reps = state.repetition_count + 1;
        let interval = match reps {
            1 => 1,
            2 => 6,
            _ => (f64::from(state.interval_days.max(1)) * ease_factor).round() as u32,
        };
        (interval, reps)
    };

    with_interval(
        ItemSchedulingState {
            repetition_count,
            ease_factor,
            interval_days,
            last_reviewed_at: Some(reviewed_at),
            due_date: None,
        },
        interval_days,
    )
}

/// Replace the interval and recompute the due date from the last review.
pub fn with_interval(mut state: ItemSchedulingState, interval_days: u32) -> ItemSchedulingState {
    state.interval_days = interval_days.clamp(1, MAX_OPTIMAL_DAYS as u32);
    state.due_date = state
        .last_reviewed_at
        .map(|at| at + Duration::days(i64::from(state.interval_days)));
    state
}
