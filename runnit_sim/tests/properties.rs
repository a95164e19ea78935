//! Property-based tests for the fix filter and the capture detector.
//!
//! Run with: cargo test --release -p runnit_sim --test properties

use proptest::prelude::*;

use h3o::Resolution;
use runnit_core::geodesy::{haversine_km, pace_min_per_km, speed_kmh};
use runnit_core::{CaptureConfig, CaptureDetector, FixOutcome, RunTracker};
use runnit_env::Coordinate;
use runnit_sim::routes::{cell_center, offset, SF_ORIGIN};

/// One step of a random walk: bearing (deg), length (m), gap (ms), accuracy (m).
fn step() -> impl Strategy<Value = (f64, f64, u64, f64)> {
    (0.0..360.0f64, 0.0..160.0f64, 200u64..4_000, 1.0..50.0f64)
}

fn walk(steps: &[(f64, f64, u64, f64)]) -> Vec<Coordinate> {
    let mut position = SF_ORIGIN;
    let mut time = 0;
    let mut fixes = vec![Coordinate::new(position.0, position.1, time).with_accuracy(5.0)];
    for &(bearing, length, gap, accuracy) in steps {
        let (sin, cos) = bearing.to_radians().sin_cos();
        position = offset(position, length * cos, length * sin);
        time += gap;
        fixes.push(Coordinate::new(position.0, position.1, time).with_accuracy(accuracy));
    }
    fixes
}

fn running_tracker() -> RunTracker {
    let mut tracker = RunTracker::with_defaults();
    tracker.start(0).unwrap();
    tracker
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Distance never shrinks and equals the accepted route's length.
    #[test]
    fn prop_distance_is_sum_of_accepted_segments(steps in prop::collection::vec(step(), 1..80)) {
        let mut tracker = running_tracker();
        let mut last = 0.0;

        for fix in walk(&steps) {
            tracker.ingest(fix);
            let distance = tracker.stats().distance_km;
            prop_assert!(distance >= last);
            last = distance;
        }

        let route = &tracker.stats().route;
        let expected: f64 = route
            .windows(2)
            .map(|w| haversine_km(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
            .sum();
        prop_assert!((tracker.stats().distance_km - expected).abs() < 1e-9);
    }

    /// A fix within 3 m of the reference changes nothing.
    #[test]
    fn prop_jitter_never_moves_reference(
        steps in prop::collection::vec(step(), 0..20),
        bearing in 0.0..360.0f64,
        meters in 0.0..2.9f64,
    ) {
        let mut tracker = running_tracker();
        for fix in walk(&steps) {
            tracker.ingest(fix);
        }
        let reference = *tracker.reference_point().unwrap();
        let before = tracker.stats().clone();

        let (sin, cos) = bearing.to_radians().sin_cos();
        let (lat, lng) = offset((reference.latitude, reference.longitude), meters * cos, meters * sin);
        let outcome = tracker.ingest(Coordinate::new(lat, lng, reference.timestamp + 1_000).with_accuracy(5.0));

        prop_assert!(matches!(outcome, FixOutcome::Jitter { .. }), "got {:?}", outcome);
        prop_assert_eq!(tracker.reference_point(), Some(&reference));
        prop_assert_eq!(tracker.stats(), &before);
    }

    /// A jump past 100 m is dropped and the next plausible fix still counts.
    #[test]
    fn prop_teleport_dropped_then_recovers(
        bearing in 0.0..360.0f64,
        jump in 105.0..5_000.0f64,
    ) {
        let mut tracker = running_tracker();
        tracker.ingest(Coordinate::new(SF_ORIGIN.0, SF_ORIGIN.1, 0).with_accuracy(5.0));

        let (sin, cos) = bearing.to_radians().sin_cos();
        let (lat, lng) = offset(SF_ORIGIN, jump * cos, jump * sin);
        let outcome = tracker.ingest(Coordinate::new(lat, lng, 1_000).with_accuracy(5.0));
        prop_assert!(matches!(outcome, FixOutcome::Teleport { .. }), "got {:?}", outcome);
        prop_assert_eq!(tracker.stats().distance_km, 0.0);

        let (lat, lng) = offset(SF_ORIGIN, 10.0, 0.0);
        let outcome = tracker.ingest(Coordinate::new(lat, lng, 2_000).with_accuracy(5.0));
        prop_assert!(matches!(outcome, FixOutcome::Accepted { .. }), "got {:?}", outcome);
        prop_assert!((tracker.stats().distance_km - 0.01).abs() < 1e-9);
    }

    /// Pace and speed are zero at the edges and reciprocal elsewhere.
    #[test]
    fn prop_pace_speed_purity(distance in 0.001..100.0f64, seconds in 1.0..50_000.0f64) {
        prop_assert_eq!(pace_min_per_km(0.0, seconds), 0.0);
        prop_assert_eq!(speed_kmh(distance, 0.0), 0.0);

        let product = pace_min_per_km(distance, seconds) * speed_kmh(distance, seconds);
        prop_assert!((product - 60.0).abs() < 1e-9);
    }

    /// However the runner wanders between cells, each is captured at most
    /// once and captures respect the cooldown.
    #[test]
    fn prop_capture_idempotent_and_spaced(
        visits in prop::collection::vec((0usize..3, 100u64..3_000), 1..120),
    ) {
        let anchors: Vec<(f64, f64)> = [0.0, 450.0, 900.0]
            .iter()
            .map(|east| cell_center(offset(SF_ORIGIN, 0.0, *east), Resolution::Nine))
            .collect();

        let config = CaptureConfig::default();
        let cooldown = config.cooldown_ms;
        let mut detector = CaptureDetector::new(config);
        let mut now = 0;
        let mut events = Vec::new();

        for (anchor, gap) in visits {
            now += gap;
            let (lat, lng) = anchors[anchor];
            if let Some(event) = detector.on_location_update(lat, lng, now).unwrap() {
                events.push(event);
            }
        }

        let mut cells: Vec<_> = events.iter().map(|e| e.cell_id).collect();
        cells.sort();
        cells.dedup();
        prop_assert_eq!(cells.len(), events.len());
        prop_assert_eq!(detector.stats().cells_captured.len(), events.len());
        for pair in events.windows(2) {
            prop_assert!(pair[1].timestamp - pair[0].timestamp >= cooldown);
        }
    }
}
