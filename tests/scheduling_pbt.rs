//! Property-based checks over the pure scheduling services.

mod common;

use chrono::Duration;
use proptest::prelude::*;

use common::{date, review, t0};
use danci_scheduler::models::{DifficultyTrend, ItemSchedulingState, MIN_EASE_FACTOR};
use danci_scheduler::services::forgetting_curve::{
    calculate_personal_forgetting_curve, forgetting_score, optimal_review_time, ForgettingCurve,
};
use danci_scheduler::services::mastery::mastery_level;
use danci_scheduler::services::sm2;
use danci_scheduler::services::streak::{apply_transition, project_display};

fn trend_strategy() -> impl Strategy<Value = DifficultyTrend> {
    prop_oneof![
        Just(DifficultyTrend::Improving),
        Just(DifficultyTrend::Stable),
        Just(DifficultyTrend::Declining),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn forgetting_score_stays_in_range(
        days in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), -10.0f64..1000.0],
        optimal in prop_oneof![Just(0.0), Just(f64::NAN), 0.0f64..400.0],
        retention in prop_oneof![Just(f64::NAN), -1.0f64..2.0],
        forgetting in prop_oneof![Just(f64::NAN), 0.0f64..2.0],
    ) {
        let score = forgetting_score(days, optimal, retention, forgetting);
        prop_assert!(score.is_finite());
        prop_assert!((0.0..=1.5).contains(&score));
    }

    #[test]
    fn forgetting_score_grows_with_elapsed_time(
        a in 0.0f64..200.0,
        b in 0.0f64..200.0,
        optimal in 1.0f64..180.0,
        retention in 0.0f64..=1.0,
        forgetting in 0.1f64..0.5,
    ) {
        let (early, late) = if a <= b { (a, b) } else { (b, a) };
        let s_early = forgetting_score(early, optimal, retention, forgetting);
        let s_late = forgetting_score(late, optimal, retention, forgetting);
        prop_assert!(s_early <= s_late + 1e-12);
    }

    #[test]
    fn optimal_review_time_is_clamped(
        retention in prop_oneof![Just(f64::NAN), -1.0f64..2.0],
        forgetting in prop_oneof![Just(0.0), Just(f64::NAN), 0.0f64..2.0],
        stability in prop_oneof![Just(f64::NAN), 0.0f64..3.0],
        interval in prop_oneof![Just(f64::NAN), -5.0f64..500.0],
        ease in prop_oneof![Just(f64::NAN), 0.0f64..4.0],
    ) {
        let curve = ForgettingCurve {
            retention_rate: retention,
            forgetting_rate: forgetting,
            stability_factor: stability,
        };
        let days = optimal_review_time(&curve, interval, ease);
        prop_assert!((1.0..=180.0).contains(&days));
    }

    #[test]
    fn personal_curve_stays_bounded(outcomes in prop::collection::vec(any::<bool>(), 0..40)) {
        let events: Vec<_> = outcomes
            .iter()
            .enumerate()
            .map(|(idx, &ok)| review("p", t0() + Duration::hours(idx as i64), ok))
            .collect();
        let curve = calculate_personal_forgetting_curve(&events);
        prop_assert!((0.0..=1.0).contains(&curve.retention_rate));
        prop_assert!((0.1..=0.5).contains(&curve.forgetting_rate));
        prop_assert!(curve.stability_factor > 0.0);
    }

    #[test]
    fn mastery_level_is_unit_bounded(
        success in prop_oneof![Just(f64::NAN), -1.0f64..2.0],
        rt in prop::option::of(prop_oneof![Just(f64::NAN), -1000.0f64..60_000.0]),
        trend in trend_strategy(),
        count in 0u32..200,
    ) {
        let level = mastery_level(success, rt, trend, count);
        prop_assert!((0.0..=1.0).contains(&level));
        if count < 5 {
            prop_assert_eq!(level, 0.0);
        }
    }

    #[test]
    fn sm2_never_drops_below_floor(qualities in prop::collection::vec(0u8..=5, 1..30)) {
        let mut state = ItemSchedulingState::default();
        for (idx, quality) in qualities.iter().enumerate() {
            state = sm2::next_state(&state, *quality, t0() + Duration::days(idx as i64));
            prop_assert!(state.ease_factor >= MIN_EASE_FACTOR);
            prop_assert!(state.interval_days >= 1);
            if *quality < 3 {
                prop_assert_eq!(state.repetition_count, 0);
                prop_assert_eq!(state.interval_days, 1);
            }
        }
    }

    #[test]
    fn same_day_replay_is_a_no_op(offsets in prop::collection::vec(0i64..4, 1..20)) {
        let mut day = date(2024, 1, 1);
        let mut state = None;
        for offset in offsets {
            day += Duration::days(offset);
            let applied = apply_transition(state.as_ref(), "u1", day);
            let replay = apply_transition(Some(&applied.state), "u1", day);
            prop_assert!(!replay.changed);
            prop_assert_eq!(&replay.state, &applied.state);
            prop_assert!(replay.new_milestones.is_empty());
            prop_assert!(applied.state.current_streak <= applied.state.longest_streak);
            state = Some(applied.state);
        }
    }

    #[test]
    fn gap_of_two_days_resets_streak(run in 1u32..60, gap in 2i64..30) {
        let mut day = date(2024, 1, 1);
        let mut state = apply_transition(None, "u1", day).state;
        for _ in 1..run {
            day += Duration::days(1);
            state = apply_transition(Some(&state), "u1", day).state;
        }
        prop_assert_eq!(state.current_streak, run);

        let later = day + Duration::days(gap);
        let broken = apply_transition(Some(&state), "u1", later);
        prop_assert_eq!(broken.state.current_streak, 1);
        prop_assert_eq!(broken.state.longest_streak, run.max(1));
        prop_assert_eq!(broken.state.total_study_days, run + 1);
    }

    #[test]
    fn display_hides_stale_streaks(run in 1u32..30, idle in 0i64..10) {
        let mut day = date(2024, 1, 1);
        let mut state = apply_transition(None, "u1", day).state;
        for _ in 1..run {
            day += Duration::days(1);
            state = apply_transition(Some(&state), "u1", day).state;
        }
        let view = project_display(Some(&state), day + Duration::days(idle));
        if idle <= 2 {
            prop_assert_eq!(view.current_streak, run);
        } else {
            prop_assert_eq!(view.current_streak, 0);
        }
        prop_assert_eq!(view.longest_streak, run);
    }
}
