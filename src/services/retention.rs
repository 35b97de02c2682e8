//! Retention-rate aggregation over a window of review events.
//!
//! Plain rate = successes / total. The ease-weighted rate weights each event
//! by `1 / easeFactorBefore` so that hard cards count more, and is only used
//! once the sample holds [`WEIGHTED_MIN_EVENTS`] events.

use serde::Serialize;

use crate::models::{ReviewEvent, MIN_EASE_FACTOR};
use crate::sanitize::{clamp_finite, round1, safe_ratio};

pub const WEIGHTED_MIN_EVENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSummary {
    pub total_reviews: usize,
    pub successful_reviews: usize,
    /// Percent, one decimal. `None` when the window is empty.
    pub plain_rate: Option<f64>,
    pub weighted_rate: Option<f64>,
    pub rate: Option<f64>,
    pub used_weighted: bool,
}

/// Fraction of successful events in `[0, 1]`; 0 for an empty slice.
pub fn success_rate<'a, I>(events: I) -> f64
where
    I: IntoIterator<Item = &'a ReviewEvent>,
{
    let (successes, total) = events.into_iter().fold((0usize, 0usize), |(s, t), e| {
        (s + usize::from(e.was_successful), t + 1)
    });
    safe_ratio(successes as f64, total as f64, 0.0)
}

fn event_weight(event: &ReviewEvent) -> f64 {
    let ease = if event.ease_factor_before.is_finite() {
        event.ease_factor_before.max(MIN_EASE_FACTOR)
    } else {
        MIN_EASE_FACTOR
    };
    1.0 / ease
}

fn to_percent(fraction: f64) -> f64 {
    clamp_finite(round1(fraction * 100.0), 0.0, 100.0)
}

pub fn plain_retention_rate(events: &[ReviewEvent]) -> Option<f64> {
    if events.is_empty() {
        return None;
    }
    Some(to_percent(success_rate(events)))
}

pub fn weighted_retention_rate(events: &[ReviewEvent]) -> Option<f64> {
    if events.is_empty() {
        return None;
    }
    let (weighted_success, total_weight) = events.iter().fold((0.0, 0.0), |(s, t), e| {
        let w = event_weight(e);
        (if e.was_successful { s + w } else { s }, t + w)
    });
    Some(to_percent(safe_ratio(weighted_success, total_weight, 0.0)))
}

/// Weighted rate at `>= 10` events, plain rate below.
pub fn retention_rate(events: &[ReviewEvent]) -> Option<f64> {
    if events.len() >= WEIGHTED_MIN_EVENTS {
        weighted_retention_rate(events)
    } else {
        plain_retention_rate(events)
    }
}

pub fn summarize(events: &[ReviewEvent]) -> RetentionSummary {
    let used_weighted = events.len() >= WEIGHTED_MIN_EVENTS;
    let weighted_rate = if used_weighted {
        weighted_retention_rate(events)
    } else {
        None
    };
    let plain_rate = plain_retention_rate(events);

    RetentionSummary {
        total_reviews: events.len(),
        successful_reviews: events.iter().filter(|e| e.was_successful).count(),
        plain_rate,
        weighted_rate,
        rate: if used_weighted { weighted_rate } else { plain_rate },
        used_weighted,
    }
}
