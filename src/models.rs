use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// SM-2 ease factor floor.
pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Immutable outcome of a single review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub item_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// 0..=5
    pub quality: u8,
    pub was_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    pub ease_factor_before: f64,
}

impl ReviewEvent {
    pub fn new(
        item_id: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        quality: u8,
    ) -> Self {
        let quality = quality.min(5);
        Self {
            item_id: item_id.into(),
            user_id: user_id.into(),
            timestamp,
            quality,
            was_successful: quality >= 3,
            response_time_ms: None,
            ease_factor_before: DEFAULT_EASE_FACTOR,
        }
    }

    pub fn with_response_time(mut self, response_time_ms: i64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn with_ease_factor(mut self, ease_factor: f64) -> Self {
        self.ease_factor_before = ease_factor;
        self
    }
}

/// Per-item scheduling state maintained by the SM-2 update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSchedulingState {
    pub repetition_count: u32,
    pub ease_factor: f64,
    pub interval_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl Default for ItemSchedulingState {
    fn default() -> Self {
        Self {
            repetition_count: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0,
            last_reviewed_at: None,
            due_date: None,
        }
    }
}

impl ItemSchedulingState {
    /// Due date derived from the last review and the current interval.
    pub fn derived_due_date(&self) -> Option<DateTime<Utc>> {
        self.last_reviewed_at
            .map(|at| at + Duration::days(i64::from(self.interval_days)))
    }
}

/// A learned item (flashcard) owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_id: Option<String>,
    pub front_text: String,
    pub back_text: String,
    #[serde(flatten)]
    pub scheduling: ItemSchedulingState,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        front_text: impl Into<String>,
        back_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            deck_id: None,
            front_text: front_text.into(),
            back_text: back_text.into(),
            scheduling: ItemSchedulingState::default(),
        }
    }

    pub fn in_deck(mut self, deck_id: impl Into<String>) -> Self {
        self.deck_id = Some(deck_id.into());
        self
    }

    pub fn with_scheduling(mut self, scheduling: ItemSchedulingState) -> Self {
        self.scheduling = scheduling;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTrend {
    Improving,
    Stable,
    Declining,
}

impl DifficultyTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryCategory {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl MasteryCategory {
    pub fn from_level(level: f64) -> Self {
        if level >= 0.95 {
            Self::Expert
        } else if level >= 0.8 {
            Self::Advanced
        } else if level >= 0.6 {
            Self::Intermediate
        } else {
            Self::Beginner
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMastery {
    pub concept_id: String,
    pub mastery_level: f64,
    pub confidence_level: f64,
    pub review_count: u32,
    pub item_count: u32,
    pub success_rate: f64,
    /// Milliseconds; 0 when no review recorded a response time.
    pub average_response_time: f64,
    pub difficulty_trend: DifficultyTrend,
    pub mastery_category: MasteryCategory,
    pub learning_velocity: f64,
    pub last_reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryDistribution {
    pub beginner: u32,
    pub intermediate: u32,
    pub advanced: u32,
    pub expert: u32,
}

impl MasteryDistribution {
    pub fn from_concepts(concepts: &[ConceptMastery]) -> Self {
        let mut distribution = Self::default();
        for concept in concepts {
            match concept.mastery_category {
                MasteryCategory::Beginner => distribution.beginner += 1,
                MasteryCategory::Intermediate => distribution.intermediate += 1,
                MasteryCategory::Advanced => distribution.advanced += 1,
                MasteryCategory::Expert => distribution.expert += 1,
            }
        }
        distribution
    }

    pub fn total(&self) -> u32 {
        self.beginner + self.intermediate + self.advanced + self.expert
    }
}

/// Persisted per-user concept list; replaced wholesale on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMasteryRecord {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_id: Option<String>,
    pub concepts: Vec<ConceptMastery>,
    pub distribution: MasteryDistribution,
    pub average_mastery: f64,
    pub computed_at: DateTime<Utc>,
    /// Set when produced by the smoothing layer rather than a full recompute.
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub user_id: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// User-local calendar date.
    pub last_study_date: NaiveDate,
    pub streak_start_date: NaiveDate,
    pub total_study_days: u32,
    pub milestones_reached: BTreeSet<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_milestone: Option<u32>,
}
