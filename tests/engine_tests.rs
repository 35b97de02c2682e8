//! Engine-level scenarios over the in-memory repository.

mod common;

use chrono::Duration;

use common::{add_item, create_test_engine, date, review, seed_reviews, t0};
use danci_scheduler::models::{Item, ItemSchedulingState, MasteryCategory, ReviewEvent};
use danci_scheduler::services::streak::StreakEvent;
use danci_scheduler::storage::Repository;
use danci_scheduler::SchedulerError;

#[test]
fn forgetting_curve_scenario() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    repo.upsert_item(Item::new("card", "u1", "front", "back").with_scheduling(
        ItemSchedulingState {
            repetition_count: 3,
            ease_factor: 2.3,
            interval_days: 6,
            last_reviewed_at: None,
            due_date: None,
        },
    ));
    for (offset, ok, ease) in [(3, true, 2.5), (2, true, 2.5), (1, false, 1.8)] {
        let event = review("card", t0() - Duration::days(offset), ok).with_ease_factor(ease);
        repo.append_review_event(&event).unwrap();
    }

    let report = engine.compute_forgetting_curve("card").unwrap();
    assert!((report.retention_rate - 2.0 / 3.0).abs() < 1e-12);
    assert!(report.forgetting_rate > 0.3);
    let expected = 6.0
        * 2.3
        * (report.retention_rate / 0.7)
        * (0.3 / report.forgetting_rate)
        * report.stability_factor;
    assert!((report.optimal_review_time - expected).abs() < 1e-9);
    assert!((1.0..=180.0).contains(&report.optimal_review_time));
    assert_eq!(report.review_count, 3);
}

#[test]
fn unknown_item_is_not_found() {
    let (engine, _clock) = create_test_engine();
    let err = engine.compute_forgetting_curve("nope").unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { entity: "item", .. }));
    assert!(engine.priority_score("nope", t0()).unwrap_err().is_not_found());
}

#[test]
fn review_queue_orders_by_priority() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "a", "overdue card", "");
    add_item(repo, "b", "fresh card", "");
    add_item(repo, "c", "new card", "");
    seed_reviews(repo, "a", t0() - Duration::days(30), &[true; 3], None);
    seed_reviews(repo, "b", t0(), &[true; 3], None);

    let queue = engine.review_queue("u1", None, t0(), 10).unwrap();
    let order: Vec<&str> = queue.iter().map(|e| e.item_id.as_str()).collect();
    assert_eq!(order, vec!["a", "c", "b"]);
    assert!(queue[0].priority_score > 1.0);
    assert!(queue.iter().all(|e| (0.0..=1.5).contains(&e.priority_score)));
    assert_eq!(queue[1].days_since_last_review, None);

    let top = engine.review_queue("u1", None, t0(), 1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].item_id, "a");

    let score = engine.priority_score("b", t0()).unwrap();
    assert!(score < 0.1);
}

#[test]
fn record_review_overrides_interval_with_curve() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "x", "mitochondria", "powerhouse");

    let s1 = engine.record_review(&review("x", t0(), true)).unwrap();
    assert_eq!((s1.repetition_count, s1.interval_days), (1, 1));
    let s2 = engine.record_review(&review("x", t0() + Duration::days(1), true)).unwrap();
    assert_eq!((s2.repetition_count, s2.interval_days), (2, 6));

    let third_at = t0() + Duration::days(7);
    let s3 = engine.record_review(&review("x", third_at, true)).unwrap();
    // 6 * 2.5 * (1.0 / 0.7) * (0.3 / 0.3) * 1.3 = 27.86, SM-2 alone gives 15
    assert_eq!(s3.interval_days, 28);
    assert_eq!(s3.due_date, Some(third_at + Duration::days(28)));

    let stored = engine.repository().get_item("x").unwrap().unwrap();
    assert_eq!(stored.scheduling, s3);

    let lapse = engine
        .record_review(&review("x", third_at + Duration::days(28), false))
        .unwrap();
    assert_eq!((lapse.repetition_count, lapse.interval_days), (0, 1));
    assert_eq!(engine.repository().get_review_events("x").unwrap().len(), 4);
}

#[test]
fn record_review_rejects_foreign_or_missing_items() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "x", "mitochondria", "");

    let missing = engine.record_review(&review("y", t0(), true)).unwrap_err();
    assert!(missing.is_not_found());

    let foreign = ReviewEvent::new("x", "someone-else", t0(), 5);
    assert!(engine.record_review(&foreign).unwrap_err().is_not_found());
    assert!(engine.repository().get_review_events("x").unwrap().is_empty());
}

#[test]
fn record_review_repairs_invalid_ease() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "x", "mitochondria", "");
    let event = review("x", t0(), true).with_ease_factor(0.2);
    engine.record_review(&event).unwrap();
    let stored = engine.repository().get_review_events("x").unwrap();
    assert_eq!(stored[0].ease_factor_before, 2.5);
}

#[test]
fn recalculate_mastery_excludes_thin_and_stale_concepts() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "chlorophyll");
    add_item(repo, "i2", "glacier", "");
    add_item(repo, "i3", "volcano", "");
    seed_reviews(repo, "i1", t0(), &[true; 6], Some(2000));
    seed_reviews(repo, "i2", t0(), &[true; 4], Some(2000));
    seed_reviews(repo, "i3", t0() - Duration::days(40), &[true; 10], Some(2000));

    let report = engine.recalculate_mastery("u1", None).unwrap();
    assert!(report.has_data);
    assert_eq!(report.concepts_analyzed, 2);
    let ids: Vec<&str> = report.concepts.iter().map(|c| c.concept_id.as_str()).collect();
    assert!(ids.contains(&"photosynthesis"));
    assert!(ids.contains(&"chlorophyll"));

    // 1.0 * 1.2 * 1.0 * (0.7 + 0.3 * 6 / 20) = 0.948
    for concept in &report.concepts {
        assert!((concept.mastery_level - 0.948).abs() < 1e-9);
        assert_eq!(concept.mastery_category, MasteryCategory::Advanced);
        assert_eq!(concept.review_count, 6);
        assert_eq!(concept.average_response_time, 2000.0);
    }
    assert_eq!(report.distribution.advanced, 2);

    let stored = repo.get_concept_mastery("u1").unwrap().unwrap();
    assert_eq!(stored.concepts, report.concepts);
    assert!(!stored.incremental);
}

#[test]
fn recalculate_mastery_without_data_is_empty() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "i1", "photosynthesis", "");

    let report = engine.recalculate_mastery("u1", None).unwrap();
    assert!(!report.has_data);
    assert_eq!(report.concepts_analyzed, 0);
    assert_eq!(report.average_mastery, 0.0);
    assert_eq!(report.distribution.total(), 0);
}

#[test]
fn mastery_scope_must_exist() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "i1", "photosynthesis", "");

    let err = engine.recalculate_mastery("ghost", None).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { entity: "user", .. }));
    let err = engine.recalculate_mastery("u1", Some("missing")).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { entity: "deck", .. }));
}

#[test]
fn mastery_is_scoped_to_deck() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    repo.upsert_item(Item::new("i1", "u1", "photosynthesis", "").in_deck("bio"));
    repo.upsert_item(Item::new("i2", "u1", "glacier", "").in_deck("geo"));
    seed_reviews(repo, "i1", t0(), &[true; 5], None);
    seed_reviews(repo, "i2", t0(), &[true; 5], None);

    let report = engine.recalculate_mastery("u1", Some("bio")).unwrap();
    assert_eq!(report.concepts_analyzed, 1);
    assert_eq!(report.concepts[0].concept_id, "photosynthesis");
    assert_eq!(report.deck_id.as_deref(), Some("bio"));
}

#[test]
fn mastery_report_is_cached_until_ttl() {
    let (engine, clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "");
    add_item(repo, "i2", "glacier", "");
    seed_reviews(repo, "i1", t0(), &[true; 5], None);
    seed_reviews(repo, "i2", t0(), &[true; 4], None);

    assert_eq!(engine.recalculate_mastery("u1", None).unwrap().concepts_analyzed, 1);

    seed_reviews(repo, "i2", t0() - Duration::hours(10), &[true; 2], None);
    assert_eq!(engine.mastery_report("u1", None, false).unwrap().concepts_analyzed, 1);

    clock.advance(Duration::minutes(6));
    assert_eq!(engine.mastery_report("u1", None, false).unwrap().concepts_analyzed, 2);
}

#[test]
fn mastery_report_force_refresh_bypasses_cache() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "");
    add_item(repo, "i2", "glacier", "");
    seed_reviews(repo, "i1", t0(), &[true; 5], None);
    seed_reviews(repo, "i2", t0(), &[true; 4], None);

    assert_eq!(engine.mastery_report("u1", None, false).unwrap().concepts_analyzed, 1);
    seed_reviews(repo, "i2", t0() - Duration::hours(10), &[true; 2], None);
    assert_eq!(engine.mastery_report("u1", None, true).unwrap().concepts_analyzed, 2);
}

#[test]
fn review_batch_smooths_then_full_recompute_supersedes() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "");
    seed_reviews(repo, "i1", t0(), &[true; 10], Some(3000));
    engine.recalculate_mastery("u1", None).unwrap();

    let batch = vec![
        review("i1", t0() - Duration::minutes(30), false),
        review("i1", t0() - Duration::minutes(20), false),
    ];
    let smoothed = engine.apply_review_batch("u1", &batch).unwrap();
    assert!(smoothed.incremental);
    let concept = &smoothed.concepts[0];
    assert!((concept.success_rate - 0.7).abs() < 1e-12);
    assert_eq!(concept.review_count, 12);
    assert!(repo.get_concept_mastery("u1").unwrap().unwrap().incremental);

    let full = engine.recalculate_mastery("u1", None).unwrap();
    assert!(!full.incremental);
    assert!((full.concepts[0].success_rate - 10.0 / 12.0).abs() < 1e-12);
}

#[test]
fn review_batch_without_stored_record_recomputes() {
    let (engine, _clock) = create_test_engine();
    add_item(engine.repository(), "i1", "photosynthesis", "");
    let batch: Vec<ReviewEvent> = (1..=5)
        .map(|m| review("i1", t0() - Duration::minutes(m), true))
        .collect();

    let report = engine.apply_review_batch("u1", &batch).unwrap();
    assert!(!report.incremental);
    assert_eq!(report.concepts_analyzed, 1);
}

#[test]
fn review_batch_with_unknown_item_writes_nothing() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "");
    add_item(repo, "i2", "glacier", "");
    repo.upsert_item(Item::new("foreign", "u2", "volcano", ""));
    seed_reviews(repo, "i1", t0(), &[true; 5], None);
    engine.recalculate_mastery("u1", None).unwrap();
    let stored_before = repo.get_concept_mastery("u1").unwrap();

    let batch = vec![
        review("i1", t0() - Duration::minutes(10), false),
        review("missing", t0() - Duration::minutes(5), true),
    ];
    let err = engine.apply_review_batch("u1", &batch).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { entity: "item", .. }));

    let owned_by_other = vec![
        review("i2", t0() - Duration::minutes(10), true),
        review("foreign", t0() - Duration::minutes(5), true),
    ];
    assert!(engine
        .apply_review_batch("u1", &owned_by_other)
        .unwrap_err()
        .is_not_found());

    assert_eq!(repo.get_review_events("i1").unwrap().len(), 5);
    assert!(repo.get_review_events("i2").unwrap().is_empty());
    assert!(repo.get_item("i1").unwrap().unwrap().scheduling.last_reviewed_at.is_none());
    assert_eq!(repo.get_concept_mastery("u1").unwrap(), stored_before);
}

#[test]
fn streak_scenario() {
    let (engine, _clock) = create_test_engine();
    engine.repository().add_user("u1");

    let first = engine.record_study_day("u1", date(2024, 1, 10)).unwrap();
    assert_eq!((first.current_streak, first.longest_streak), (1, 1));
    assert_eq!(first.event, StreakEvent::Started);

    let second = engine.record_study_day("u1", date(2024, 1, 11)).unwrap();
    assert_eq!(second.current_streak, 2);
    assert_eq!(second.event, StreakEvent::Continued);

    let replay = engine.record_study_day("u1", date(2024, 1, 11)).unwrap();
    assert_eq!(replay, second);

    let broken = engine.record_study_day("u1", date(2024, 1, 13)).unwrap();
    assert_eq!((broken.current_streak, broken.longest_streak), (1, 2));
    assert_eq!(broken.event, StreakEvent::Broken);

    let view = engine.displayed_streak("u1", date(2024, 1, 16)).unwrap();
    assert_eq!(view.current_streak, 0);
    let stored = engine.repository().get_streak_state("u1").unwrap().unwrap();
    assert_eq!(stored.current_streak, 1);
    assert_eq!(stored.total_study_days, 3);
}

#[test]
fn streak_milestone_fires_once() {
    let (engine, _clock) = create_test_engine();
    engine.repository().add_user("u1");

    for day in 1..=6 {
        let update = engine.record_study_day("u1", date(2024, 3, day)).unwrap();
        assert!(!update.is_new_milestone);
    }
    let seventh = engine.record_study_day("u1", date(2024, 3, 7)).unwrap();
    assert!(seventh.is_new_milestone);
    assert_eq!(seventh.milestone, Some(7));

    let again = engine.record_study_day("u1", date(2024, 3, 7)).unwrap();
    assert!(!again.is_new_milestone);
    assert_eq!(again.current_streak, 7);
}

#[test]
fn streak_requires_known_user() {
    let (engine, _clock) = create_test_engine();
    assert!(engine
        .record_study_day("ghost", date(2024, 1, 1))
        .unwrap_err()
        .is_not_found());
    assert!(engine
        .displayed_streak("ghost", date(2024, 1, 1))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn concurrent_same_day_updates_increment_once() {
    let (engine, _clock) = create_test_engine();
    engine.repository().add_user("u1");
    engine.record_study_day("u1", date(2024, 1, 10)).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                engine.record_study_day("u1", date(2024, 1, 11)).unwrap();
            });
        }
    });

    let stored = engine.repository().get_streak_state("u1").unwrap().unwrap();
    assert_eq!(stored.current_streak, 2);
    assert_eq!(stored.total_study_days, 2);
}

#[test]
fn retention_rate_switches_to_weighted_at_ten() {
    let (engine, _clock) = create_test_engine();
    let repo = engine.repository();
    add_item(repo, "i1", "photosynthesis", "");

    let empty = engine.retention_rate("u1", None).unwrap();
    assert_eq!(empty.rate, None);

    seed_reviews(repo, "i1", t0(), &[true; 7], None);
    for m in 1..=2 {
        let hard_fail = review("i1", t0() - Duration::minutes(m), false).with_ease_factor(1.3);
        repo.append_review_event(&hard_fail).unwrap();
    }
    let nine = engine.retention_rate("u1", None).unwrap();
    assert_eq!(nine.total_reviews, 9);
    assert!(!nine.used_weighted);
    assert_eq!(nine.rate, Some(77.8));

    repo.append_review_event(&review("i1", t0() - Duration::minutes(5), true))
        .unwrap();
    let ten = engine.retention_rate("u1", None).unwrap();
    assert!(ten.used_weighted);
    assert_eq!(ten.rate, ten.weighted_rate);
    assert_eq!(ten.rate, Some(67.5));
    assert_eq!(ten.plain_rate, Some(80.0));

    let narrow = engine.retention_rate("u1", Some(1)).unwrap();
    assert_eq!(narrow.total_reviews, 10);
}

#[test]
fn domain_hints_keep_matching_concepts() {
    let front = "alpha bravo charlie delta echo foxtrot golf";
    let (plain, _clock) = create_test_engine();
    add_item(plain.repository(), "i1", front, "");
    seed_reviews(plain.repository(), "i1", t0(), &[true; 5], None);
    let ids = |report: &danci_scheduler::services::mastery::MasteryReport| -> Vec<String> {
        report.concepts.iter().map(|c| c.concept_id.clone()).collect()
    };

    let without = plain.recalculate_mastery("u1", None).unwrap();
    assert_eq!(without.concepts_analyzed, 5);
    assert!(!ids(&without).contains(&"golf".to_string()));

    let (hinted, _clock) = create_test_engine();
    let hinted = hinted.with_domain_hints(["golf"]);
    add_item(hinted.repository(), "i1", front, "");
    seed_reviews(hinted.repository(), "i1", t0(), &[true; 5], None);
    let with = hinted.recalculate_mastery("u1", None).unwrap();
    assert_eq!(with.concepts_analyzed, 5);
    assert!(ids(&with).contains(&"golf".to_string()));
}

#[test]
fn empty_deck_yields_empty_report() {
    let (engine, _clock) = create_test_engine();
    engine.repository().add_deck("u1", "empty");
    let report = engine.recalculate_mastery("u1", Some("empty")).unwrap();
    assert!(!report.has_data);
    assert!(engine.review_queue("u1", Some("empty"), t0(), 10).unwrap().is_empty());
}

#[test]
fn system_clock_engine_serves_requests() {
    use danci_scheduler::storage::MemoryRepository;
    use danci_scheduler::{Config, SchedulerEngine};

    let repo = MemoryRepository::new();
    repo.add_user("u1");
    let engine = SchedulerEngine::with_system_clock(repo, Config::default());
    let summary = engine.retention_rate("u1", None).unwrap();
    assert_eq!(summary.total_reviews, 0);
    assert_eq!(summary.rate, None);
}
