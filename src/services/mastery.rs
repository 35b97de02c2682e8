//! Concept mastery.
//!
//! Items are mapped to keyword concepts; each concept aggregates the review
//! events of its items inside the trailing window. Concepts with fewer than
//! [`MIN_REVIEWS`] events are left out of the result entirely.
//!
//! Full recomputation ([`analyze_concepts`]) is the source of truth.
//! [`apply_incremental`] smooths a stored record with a new batch of
//! interactions between recomputations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    ConceptMastery, ConceptMasteryRecord, DifficultyTrend, Item, MasteryCategory,
    MasteryDistribution, ReviewEvent,
};
use crate::sanitize::{clamp_unit, finite_or, safe_ratio};

use super::concepts::item_concepts;
use super::retention::success_rate;

pub const MIN_REVIEWS: u32 = 5;
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_EVENT_CAP: usize = 1000;
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.3;

const TREND_RECENT_WINDOW: usize = 10;
const TREND_THRESHOLD: f64 = 0.1;
const RESPONSE_TIME_REFERENCE_MS: f64 = 5000.0;
const RESPONSE_TIME_FLOOR_MS: f64 = 1000.0;
const RELIABILITY_FULL_REVIEWS: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryReport {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_id: Option<String>,
    pub concepts_analyzed: usize,
    pub average_mastery: f64,
    pub distribution: MasteryDistribution,
    pub has_data: bool,
    pub concepts: Vec<ConceptMastery>,
    pub computed_at: DateTime<Utc>,
    pub incremental: bool,
}

impl From<&ConceptMasteryRecord> for MasteryReport {
    fn from(record: &ConceptMasteryRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            deck_id: record.deck_id.clone(),
            concepts_analyzed: record.concepts.len(),
            average_mastery: record.average_mastery,
            distribution: record.distribution,
            has_data: !record.concepts.is_empty(),
            concepts: record.concepts.clone(),
            computed_at: record.computed_at,
            incremental: record.incremental,
        }
    }
}

/// Restrict to the trailing window and keep the newest `cap` events,
/// returned oldest first.
pub fn bound_window(events: &[ReviewEvent], since: DateTime<Utc>, cap: usize) -> Vec<ReviewEvent> {
    let mut windowed: Vec<ReviewEvent> = events
        .iter()
        .filter(|e| e.timestamp >= since)
        .cloned()
        .collect();
    windowed.sort_by_key(|e| e.timestamp);
    if windowed.len() > cap {
        windowed.drain(..windowed.len() - cap);
    }
    windowed
}

pub fn window_start(now: DateTime<Utc>, window_days: i64) -> DateTime<Utc> {
    now - Duration::days(window_days.max(1))
}

/// Mean of recorded, non-negative response times.
pub fn average_response_time<'a, I>(events: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a ReviewEvent>,
{
    let (sum, count) = events
        .into_iter()
        .filter_map(|e| e.response_time_ms.filter(|ms| *ms >= 0))
        .fold((0.0, 0usize), |(s, c), ms| (s + ms as f64, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Compare the newest ten events against everything older.
pub fn difficulty_trend(events_oldest_first: &[&ReviewEvent]) -> DifficultyTrend {
    if events_oldest_first.len() <= TREND_RECENT_WINDOW {
        return DifficultyTrend::Stable;
    }
    let split = events_oldest_first.len() - TREND_RECENT_WINDOW;
    let older = success_rate(events_oldest_first[..split].iter().copied());
    let recent = success_rate(events_oldest_first[split..].iter().copied());
    trend_from_delta(recent - older)
}

fn trend_from_delta(delta: f64) -> DifficultyTrend {
    if delta > TREND_THRESHOLD {
        DifficultyTrend::Improving
    } else if delta < -TREND_THRESHOLD {
        DifficultyTrend::Declining
    } else {
        DifficultyTrend::Stable
    }
}

/// Mastery in `[0, 1]`; 0 below [`MIN_REVIEWS`].
pub fn mastery_level(
    success_rate: f64,
    average_response_time: Option<f64>,
    trend: DifficultyTrend,
    review_count: u32,
) -> f64 {
    if review_count < MIN_REVIEWS {
        return 0.0;
    }

    // no recorded times counts as an average of 0 ms, same as the stored field
    let avg_ms = finite_or(average_response_time.unwrap_or(0.0), 0.0);
    let speed_factor =
        (RESPONSE_TIME_REFERENCE_MS / avg_ms.max(RESPONSE_TIME_FLOOR_MS)).clamp(0.5, 1.2);
    let trend_factor = match trend {
        DifficultyTrend::Improving => 1.1,
        DifficultyTrend::Stable => 1.0,
        DifficultyTrend::Declining => 0.9,
    };
    let reliability = 0.7 + 0.3 * (f64::from(review_count) / RELIABILITY_FULL_REVIEWS).min(1.0);

    clamp_unit(clamp_unit(success_rate) * speed_factor * trend_factor * reliability)
}

/// `1 - variance` of the 0/1 outcomes, i.e. `1 - p(1 - p)`.
pub fn confidence_level(success_rate: f64) -> f64 {
    let p = clamp_unit(success_rate);
    clamp_unit(1.0 - p * (1.0 - p))
}

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 86_400.0
}

/// Aggregate one concept. `None` when it has fewer than [`MIN_REVIEWS`] events.
pub fn aggregate_concept(
    concept_id: &str,
    item_count: usize,
    events: &[&ReviewEvent],
    now: DateTime<Utc>,
) -> Option<ConceptMastery> {
    let review_count = u32::try_from(events.len()).unwrap_or(u32::MAX);
    if review_count < MIN_REVIEWS {
        return None;
    }

    let mut sorted: Vec<&ReviewEvent> = events.to_vec();
    sorted.sort_by_key(|e| e.timestamp);

    let success = success_rate(sorted.iter().copied());
    let avg_rt = average_response_time(sorted.iter().copied());
    let trend = difficulty_trend(&sorted);
    let level = mastery_level(success, avg_rt, trend, review_count);

    let oldest = sorted.first().map(|e| e.timestamp).unwrap_or(now);
    let newest = sorted.last().map(|e| e.timestamp).unwrap_or(now);
    let velocity = safe_ratio(level, days_between(oldest, now).max(1.0), 0.0);

    Some(ConceptMastery {
        concept_id: concept_id.to_string(),
        mastery_level: level,
        confidence_level: confidence_level(success),
        review_count,
        item_count: u32::try_from(item_count).unwrap_or(u32::MAX),
        success_rate: success,
        average_response_time: avg_rt.unwrap_or(0.0),
        difficulty_trend: trend,
        mastery_category: MasteryCategory::from_level(level),
        learning_velocity: finite_or(velocity, 0.0).max(0.0),
        last_reviewed_at: newest,
    })
}

#[derive(Default)]
struct ConceptGroup<'a> {
    items: BTreeSet<&'a str>,
    events: Vec<&'a ReviewEvent>,
}

fn group_by_concept<'a>(
    items: &'a [Item],
    events: &'a [ReviewEvent],
    domain_hints: &[&str],
) -> BTreeMap<String, ConceptGroup<'a>> {
    let mut item_concepts_map: HashMap<&str, Vec<String>> = HashMap::with_capacity(items.len());
    let mut groups: BTreeMap<String, ConceptGroup<'a>> = BTreeMap::new();

    for item in items {
        let concepts = item_concepts(item, domain_hints);
        for concept in &concepts {
            groups
                .entry(concept.clone())
                .or_default()
                .items
                .insert(item.id.as_str());
        }
        item_concepts_map.insert(item.id.as_str(), concepts);
    }

    for event in events {
        if let Some(concepts) = item_concepts_map.get(event.item_id.as_str()) {
            for concept in concepts {
                if let Some(group) = groups.get_mut(concept) {
                    group.events.push(event);
                }
            }
        }
    }

    groups
}

fn sort_concepts(concepts: &mut [ConceptMastery]) {
    concepts.sort_by(|a, b| {
        b.mastery_level
            .total_cmp(&a.mastery_level)
            .then_with(|| a.concept_id.cmp(&b.concept_id))
    });
}

/// Full recomputation over the given items and windowed events.
pub fn analyze_concepts(
    items: &[Item],
    events: &[ReviewEvent],
    now: DateTime<Utc>,
    domain_hints: &[&str],
) -> Vec<ConceptMastery> {
    let groups = group_by_concept(items, events, domain_hints);
    let mut skipped = 0usize;

    let mut concepts: Vec<ConceptMastery> = groups
        .iter()
        .filter_map(|(concept, group)| {
            let result = aggregate_concept(concept, group.items.len(), &group.events, now);
            if result.is_none() {
                skipped += 1;
            }
            result
        })
        .collect();

    sort_concepts(&mut concepts);
    tracing::debug!(
        analyzed = concepts.len(),
        skipped,
        "concept mastery aggregated"
    );
    concepts
}

pub fn average_mastery(concepts: &[ConceptMastery]) -> f64 {
    let sum: f64 = concepts.iter().map(|c| c.mastery_level).sum();
    clamp_unit(safe_ratio(sum, concepts.len() as f64, 0.0))
}

pub fn build_record(
    user_id: &str,
    deck_id: Option<&str>,
    concepts: Vec<ConceptMastery>,
    now: DateTime<Utc>,
    incremental: bool,
) -> ConceptMasteryRecord {
    ConceptMasteryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        deck_id: deck_id.map(str::to_string),
        distribution: MasteryDistribution::from_concepts(&concepts),
        average_mastery: average_mastery(&concepts),
        concepts,
        computed_at: now,
        incremental,
    }
}

fn smooth(previous: f64, observed: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * previous + alpha * observed
}

fn smooth_concept(
    previous: &ConceptMastery,
    batch: &[&ReviewEvent],
    item_count: usize,
    alpha: f64,
) -> ConceptMastery {
    let batch_success = success_rate(batch.iter().copied());
    let success = clamp_unit(smooth(previous.success_rate, batch_success, alpha));

    let avg_rt = match (
        average_response_time(batch.iter().copied()),
        previous.average_response_time,
    ) {
        (Some(observed), prev) if prev > 0.0 => Some(smooth(prev, observed, alpha)),
        (Some(observed), _) => Some(observed),
        (None, prev) if prev > 0.0 => Some(prev),
        (None, _) => None,
    };

    let trend = trend_from_delta(batch_success - previous.success_rate);
    let review_count = previous
        .review_count
        .saturating_add(u32::try_from(batch.len()).unwrap_or(u32::MAX));
    let level = mastery_level(success, avg_rt, trend, review_count);

    ConceptMastery {
        concept_id: previous.concept_id.clone(),
        mastery_level: level,
        confidence_level: confidence_level(success),
        review_count,
        item_count: previous
            .item_count
            .max(u32::try_from(item_count).unwrap_or(u32::MAX)),
        success_rate: success,
        average_response_time: avg_rt.unwrap_or(0.0),
        difficulty_trend: trend,
        mastery_category: MasteryCategory::from_level(level),
        learning_velocity: previous.learning_velocity,
        last_reviewed_at: batch
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(previous.last_reviewed_at)
            .max(previous.last_reviewed_at),
    }
}

/// Smooth `previous` with a batch of new interactions.
///
/// Concepts touched by the batch blend success rate and response time with
/// weight `alpha`; concepts absent from the stored record enter only if the
/// batch alone meets [`MIN_REVIEWS`]. Learning velocity is carried over and
/// only refreshed by a full recomputation.
pub fn apply_incremental(
    previous: &ConceptMasteryRecord,
    items: &[Item],
    batch: &[ReviewEvent],
    now: DateTime<Utc>,
    alpha: f64,
    domain_hints: &[&str],
) -> ConceptMasteryRecord {
    let alpha = finite_or(alpha, DEFAULT_SMOOTHING_ALPHA).clamp(f64::EPSILON, 1.0);
    let groups = group_by_concept(items, batch, domain_hints);

    let mut by_id: BTreeMap<String, ConceptMastery> = previous
        .concepts
        .iter()
        .map(|c| (c.concept_id.clone(), c.clone()))
        .collect();

    for (concept, group) in &groups {
        if group.events.is_empty() {
            continue;
        }
        let updated = match by_id.get(concept) {
            Some(existing) => Some(smooth_concept(existing, &group.events, group.items.len(), alpha)),
            None => aggregate_concept(concept, group.items.len(), &group.events, now),
        };
        if let Some(updated) = updated {
            by_id.insert(concept.clone(), updated);
        }
    }

    let mut concepts: Vec<ConceptMastery> = by_id.into_values().collect();
    sort_concepts(&mut concepts);
    build_record(
        &previous.user_id,
        previous.deck_id.as_deref(),
        concepts,
        now,
        true,
    )
}
