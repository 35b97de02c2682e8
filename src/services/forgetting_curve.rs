//! Personal forgetting curve per item.
//!
//! The curve is estimated from the item's review history and scales the
//! naive SM-2 interval against a population baseline of 0.7 retention /
//! 0.3 forgetting. Short or empty histories fall back to that prior; there
//! is no "insufficient data" failure.

use serde::{Deserialize, Serialize};

use crate::models::{ReviewEvent, MIN_EASE_FACTOR};
use crate::sanitize::{clamp_finite, finite_or, has_invalid_values};

use super::retention::success_rate;

pub const BASELINE_RETENTION: f64 = 0.7;
pub const BASELINE_FORGETTING: f64 = 0.3;
pub const BASELINE_STABILITY: f64 = 1.0;

const MAX_FORGETTING: f64 = 0.5;
const MIN_FORGETTING: f64 = 0.1;
const RECENT_WINDOW: usize = 3;
const TREND_SENSITIVITY: f64 = 1.0;

const STABILITY_STEP: f64 = 0.1;
const STABILITY_MAX_RUN: usize = 5;
const STABILITY_AFTER_LAPSE: f64 = 0.8;

pub const MIN_OPTIMAL_DAYS: f64 = 1.0;
pub const MAX_OPTIMAL_DAYS: f64 = 180.0;
pub const MAX_FORGETTING_SCORE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgettingCurve {
    pub retention_rate: f64,
    pub forgetting_rate: f64,
    pub stability_factor: f64,
}

impl Default for ForgettingCurve {
    fn default() -> Self {
        Self {
            retention_rate: BASELINE_RETENTION,
            forgetting_rate: BASELINE_FORGETTING,
            stability_factor: BASELINE_STABILITY,
        }
    }
}

/// Curve plus the interval derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgettingCurveReport {
    pub retention_rate: f64,
    pub forgetting_rate: f64,
    pub stability_factor: f64,
    pub optimal_review_time: f64,
    pub review_count: usize,
}

/// Estimate the curve from a history ordered oldest first.
pub fn calculate_personal_forgetting_curve(events: &[ReviewEvent]) -> ForgettingCurve {
    if events.is_empty() {
        return ForgettingCurve::default();
    }

    let retention_rate = success_rate(events);

    let mut forgetting_rate = BASELINE_FORGETTING;
    if events.len() >= RECENT_WINDOW {
        let recent = recent_success_rate(&events[events.len() - RECENT_WINDOW..]);
        let gap = retention_rate - recent;
        if gap > 0.0 {
            forgetting_rate = (BASELINE_FORGETTING + gap * TREND_SENSITIVITY).min(MAX_FORGETTING);
        } else if gap < 0.0 {
            forgetting_rate = (BASELINE_FORGETTING + gap * TREND_SENSITIVITY).max(MIN_FORGETTING);
        }
    }

    ForgettingCurve {
        retention_rate: clamp_finite(retention_rate, 0.0, 1.0),
        forgetting_rate: clamp_finite(forgetting_rate, MIN_FORGETTING, MAX_FORGETTING),
        stability_factor: stability_factor(events),
    }
}

/// Success rate over the recent window with weights 1..=n, newest heaviest.
fn recent_success_rate(window: &[ReviewEvent]) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (idx, event) in window.iter().enumerate() {
        let weight = (idx + 1) as f64;
        total += weight;
        if event.was_successful {
            weighted += weight;
        }
    }
    if total == 0.0 {
        0.0
    } else {
        weighted / total
    }
}

fn stability_factor(events: &[ReviewEvent]) -> f64 {
    match events.last() {
        None => BASELINE_STABILITY,
        Some(last) if !last.was_successful => STABILITY_AFTER_LAPSE,
        Some(_) => {
            let run = events
                .iter()
                .rev()
                .take_while(|e| e.was_successful)
                .count()
                .min(STABILITY_MAX_RUN);
            BASELINE_STABILITY + run as f64 * STABILITY_STEP
        }
    }
}

/// Next interval in days, clamped to `[1, 180]`.
pub fn optimal_review_time(curve: &ForgettingCurve, current_interval: f64, ease_factor: f64) -> f64 {
    if has_invalid_values(&[
        curve.retention_rate,
        curve.forgetting_rate,
        curve.stability_factor,
        current_interval,
    ]) {
        tracing::warn!(
            retention = curve.retention_rate,
            forgetting = curve.forgetting_rate,
            stability = curve.stability_factor,
            current_interval,
            "non-finite curve input, clamping"
        );
    }
    let interval = finite_or(current_interval, MIN_OPTIMAL_DAYS).max(MIN_OPTIMAL_DAYS);
    let ease = if ease_factor.is_finite() && ease_factor >= MIN_EASE_FACTOR {
        ease_factor
    } else {
        tracing::warn!(ease_factor, "ease factor below floor, clamping");
        MIN_EASE_FACTOR
    };
    let retention = clamp_finite(curve.retention_rate, 0.0, 1.0);
    let forgetting = clamp_finite(curve.forgetting_rate, MIN_FORGETTING, 1.0);
    let stability = finite_or(curve.stability_factor, BASELINE_STABILITY).max(0.0);

    let days = interval
        * ease
        * (retention / BASELINE_RETENTION)
        * (BASELINE_FORGETTING / forgetting)
        * stability;

    clamp_finite(days, MIN_OPTIMAL_DAYS, MAX_OPTIMAL_DAYS)
}

/// Review priority. Higher means more urgent, range `[0, 1.5]`.
///
/// The timing ratio `r = days_since / optimal` maps to a low score when
/// reviewing early, a linear ramp reaching 1.0 at the optimal point, and an
/// exponential approach towards 1.5 when overdue. Low-retention items are
/// boosted by `2 - retention`.
pub fn forgetting_score(
    days_since_last_review: f64,
    optimal_review_time: f64,
    retention_rate: f64,
    forgetting_rate: f64,
) -> f64 {
    let days = finite_or(days_since_last_review, 0.0).max(0.0);
    let optimal = finite_or(optimal_review_time, MIN_OPTIMAL_DAYS).max(f64::EPSILON);
    let forgetting = finite_or(forgetting_rate, BASELINE_FORGETTING).max(0.0);
    let retention = clamp_finite(retention_rate, 0.0, 1.0);

    let r = days / optimal;
    let base = timing_score(r, forgetting);

    clamp_finite(base * (2.0 - retention), 0.0, MAX_FORGETTING_SCORE)
}

fn timing_score(r: f64, forgetting_rate: f64) -> f64 {
    if r < 0.5 {
        r * 0.4
    } else if r <= 1.0 {
        0.2 + (r - 0.5) * 1.6
    } else {
        1.0 + (1.0 - (-forgetting_rate * (r - 1.0)).exp()) * 0.5
    }
}

pub fn build_report(
    events: &[ReviewEvent],
    current_interval: f64,
    ease_factor: f64,
) -> ForgettingCurveReport {
    let curve = calculate_personal_forgetting_curve(events);
    let optimal = optimal_review_time(&curve, current_interval, ease_factor);
    tracing::debug!(
        reviews = events.len(),
        retention = curve.retention_rate,
        forgetting = curve.forgetting_rate,
        optimal_days = optimal,
        "forgetting curve computed"
    );
    ForgettingCurveReport {
        retention_rate: curve.retention_rate,
        forgetting_rate: curve.forgetting_rate,
        stability_factor: curve.stability_factor,
        optimal_review_time: optimal,
        review_count: events.len(),
    }
}
