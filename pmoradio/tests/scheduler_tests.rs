//! Scheduling properties: determinism, coverage, iteration boundaries

use chrono::{DateTime, Duration, TimeZone, Utc};
use pmoradio::{Catalog, Scheduler, Track};
use std::collections::HashSet;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 11, 9, 0, 0).unwrap()
}

fn after(seconds: f64) -> DateTime<Utc> {
    t0() + Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

fn sample_catalog() -> Catalog {
    Catalog::from_tracks(
        (0..12).map(|i| Track::new(format!("video-{:02}", i), 60.0 + 7.5 * i as f64, 16_000)),
        1,
    )
    .unwrap()
}

#[test]
fn test_same_instant_same_answer_across_instances() {
    let keyed = r#"{
        "x1": {"title": "One", "duration": 120.25},
        "x2": {"title": "Two", "duration": 300},
        "x3": {"title": "Three", "duration": 45.5},
        "x4": {"title": "Four", "duration": 600}
    }"#;
    let reordered = r#"[
        {"id": "x4", "title": "Four", "duration": 600},
        {"id": "x2", "title": "Two", "duration": 300},
        {"id": "x1", "title": "One", "duration": 120.25},
        {"id": "x3", "title": "Three", "duration": 45.5}
    ]"#;
    let a = Catalog::parse(keyed, 16_000, 1).unwrap();
    let b = Catalog::parse(reordered, 16_000, 1).unwrap();

    let first = Scheduler::new(t0());
    let second = Scheduler::new(t0());

    for step in 0..500 {
        let now = after(step as f64 * 97.3);
        let ra = first.resolve(&a, now).unwrap();
        let rb = second.resolve(&b, now).unwrap();
        assert_eq!(ra.current.id, rb.current.id);
        assert_eq!(ra.offset_seconds, rb.offset_seconds);
        assert_eq!(ra.iteration, rb.iteration);
    }
}

#[test]
fn test_every_track_plays_once_per_iteration() {
    let catalog = sample_catalog();
    let scheduler = Scheduler::new(t0());
    let total = catalog.total_duration();

    for iteration in [0u64, 1, 7] {
        let order = scheduler.order_for_iteration(&catalog, iteration);
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), catalog.len());

        // Échantillonner le début de chaque piste retrouve l'ordre
        let mut start = iteration as f64 * total;
        for id in &order {
            let r = scheduler.resolve(&catalog, after(start + 0.01)).unwrap();
            assert_eq!(&r.current.id, id);
            assert_eq!(r.iteration, iteration);
            start += catalog.get(id).unwrap().duration_seconds;
        }
    }
}

#[test]
fn test_iteration_boundary_has_no_gap() {
    let catalog = sample_catalog();
    let scheduler = Scheduler::new(t0());
    let total = catalog.total_duration();
    let eps = 0.25;

    let before = scheduler.resolve(&catalog, after(total - eps)).unwrap();
    let after_boundary = scheduler.resolve(&catalog, after(total + eps)).unwrap();

    assert_eq!(before.iteration, 0);
    assert_eq!(before.position, catalog.len() - 1);
    assert!((before.remaining_seconds - eps).abs() < 1e-6);

    assert_eq!(after_boundary.iteration, 1);
    assert_eq!(after_boundary.position, 0);
    assert!((after_boundary.offset_seconds - eps).abs() < 1e-6);

    assert_eq!(before.next.id, after_boundary.current.id);
    assert_ne!(before.current.id, after_boundary.current.id);
}

#[test]
fn test_two_track_scenario() {
    let catalog = Catalog::from_tracks(
        [Track::new("A", 100.0, 16_000), Track::new("B", 50.0, 16_000)],
        1,
    )
    .unwrap();
    let scheduler = Scheduler::new(t0());
    let first_pass = scheduler.order_for_iteration(&catalog, 0);
    let second_pass = scheduler.order_for_iteration(&catalog, 1);

    let r = scheduler.resolve(&catalog, after(30.0)).unwrap();
    assert_eq!(r.iteration, 0);
    assert_eq!(r.current.id, first_pass[0]);
    assert!((r.offset_seconds - 30.0).abs() < 1e-9);
    assert_eq!(r.byte_offset(), 480_000);

    let r = scheduler.resolve(&catalog, after(151.0)).unwrap();
    assert_eq!(r.iteration, 1);
    assert_eq!(r.current.id, second_pass[0]);
    assert!((r.offset_seconds - 1.0).abs() < 1e-9);
    assert_ne!(r.current.id, first_pass[1]);
}

#[test]
fn test_offset_matches_cumulative_durations() {
    let catalog = sample_catalog();
    let scheduler = Scheduler::new(t0());
    let order = scheduler.order_for_iteration(&catalog, 0);

    let cumulative: f64 = order[..3]
        .iter()
        .map(|id| catalog.get(id).unwrap().duration_seconds)
        .sum();
    let r = scheduler.resolve(&catalog, after(cumulative + 12.5)).unwrap();

    assert_eq!(r.current.id, order[3]);
    assert_eq!(r.previous.id, order[2]);
    assert_eq!(r.next.id, order[4]);
    assert_eq!(r.next_next.id, order[5]);
    assert!((r.offset_seconds - 12.5).abs() < 1e-6);
}

#[test]
fn test_reloaded_snapshot_is_used_as_given() {
    let scheduler = Scheduler::new(t0());
    let small = Catalog::from_tracks([Track::new("only", 10.0, 16_000)], 1).unwrap();
    let larger = Catalog::from_tracks(
        [Track::new("only", 10.0, 16_000), Track::new("new", 10.0, 16_000)],
        2,
    )
    .unwrap();

    let now = after(5.0);
    let r1 = scheduler.resolve(&small, now).unwrap();
    let r2 = scheduler.resolve(&larger, now).unwrap();
    assert_eq!(r1.catalog_version, 1);
    assert_eq!(r2.catalog_version, 2);

    // Le calcul sur l'ancien instantané reste stable après coup
    assert_eq!(scheduler.resolve(&small, now).unwrap().current.id, r1.current.id);
}
