use assert_matches::assert_matches;

use vigil::engine::StatisticsEngine;
use vigil::error::Error;
use vigil::histogram::BinChunk;
use vigil::snapshot::ComputeStatisticsInput;
use vigil::store::{ChartRecord, SqliteStore, StatisticsStore, TelemetryPoint};

fn point(y: f64) -> TelemetryPoint {
    TelemetryPoint {
        y,
        ..Default::default()
    }
}

fn stop_on_signal(y: f64) -> TelemetryPoint {
    TelemetryPoint {
        is_useful_ai_signal: true,
        is_stop: true,
        ..point(y)
    }
}

fn continue_after_signal(y: f64) -> TelemetryPoint {
    TelemetryPoint {
        is_deceptive_ai_signal: true,
        ..point(y)
    }
}

#[test]
fn mixed_decision_history_end_to_end() {
    let mut store = SqliteStore::open_in_memory().unwrap();

    let chart = store.create_chart(1, 2, false).unwrap();
    store
        .record_points_batch(
            chart,
            &[
                stop_on_signal(0.10),
                stop_on_signal(0.20),
                stop_on_signal(0.30),
                // hint on a deceptive warning, lets the process continue
                TelemetryPoint {
                    is_deceptive_ai_signal: true,
                    is_check: true,
                    ..point(0.40)
                },
                // unprompted stop, no warning active
                TelemetryPoint {
                    is_stop: true,
                    ..point(0.50)
                },
                // crash without any warning
                TelemetryPoint {
                    is_crash: true,
                    ..point(0.60)
                },
            ],
        )
        .unwrap();

    let second_chart = store.create_chart(1, 2, false).unwrap();
    store
        .record_point(second_chart, &continue_after_signal(0.70))
        .unwrap();

    // A training run full of stops must not show up anywhere.
    let training = store.create_chart(1, 2, true).unwrap();
    store
        .record_points_batch(training, &[stop_on_signal(0.91), stop_on_signal(0.92)])
        .unwrap();

    store.set_total_score(1, 2, 250).unwrap();

    let engine = StatisticsEngine::new(store);
    let snapshot = engine
        .compute_statistics(&ComputeStatisticsInput::new(1, 2))
        .unwrap();

    assert_eq!(snapshot.games_count, 2);
    assert_eq!(snapshot.stops_count, 4);
    assert_eq!(snapshot.crashes_count, 1);
    assert_eq!(snapshot.total_score, 250);

    assert_eq!(snapshot.stop_on_signal.count, 3);
    assert_eq!(snapshot.stop_on_signal.mean, 20.0);
    assert!((snapshot.stop_on_signal.stdev - 8.1649658).abs() < 1e-6);

    assert_eq!(snapshot.stop_without_signal.count, 1);
    assert_eq!(snapshot.stop_without_signal.mean, 50.0);
    assert_eq!(snapshot.stop_without_signal.stdev, 0.0);

    assert_eq!(snapshot.hint_on_signal.count, 1);
    assert_eq!(snapshot.hint_on_signal.mean, 40.0);

    assert_eq!(snapshot.hint_without_signal.count, 0);
    assert_eq!(snapshot.hint_without_signal.mean, 0.0);
    assert_eq!(snapshot.hint_without_signal.stdev, 0.0);

    // the hint event continued, so it counts here too
    assert_eq!(snapshot.continue_after_signal.count, 2);
    assert_eq!(snapshot.continue_after_signal.mean, 55.0);

    // Five qualifying events form one remainder chunk; every bin with
    // observations is a proper proportion.
    let chunks: Vec<BinChunk> = serde_json::from_str(&snapshot.histogram).unwrap();
    assert_eq!(chunks.len(), 1);
    let mut nonzero_bins = 0;
    for bin in chunks[0].values() {
        let sum = bin.hint + bin.cont + bin.stop;
        if sum != 0.0 {
            nonzero_bins += 1;
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }
    assert_eq!(nonzero_bins, 5);
}

#[test]
fn histogram_chunks_expose_decision_drift() {
    let mut store = SqliteStore::open_in_memory().unwrap();

    // First twenty qualifying events stop at position 5, the next five
    // continue at position 6: the chunks should show the shift.
    let mut points: Vec<TelemetryPoint> = (0..20).map(|_| stop_on_signal(0.05)).collect();
    points.extend((0..5).map(|_| continue_after_signal(0.06)));

    let chart = store.create_chart(7, 3, false).unwrap();
    store.record_points_batch(chart, &points).unwrap();

    let engine = StatisticsEngine::new(store);
    let snapshot = engine
        .compute_statistics(&ComputeStatisticsInput::new(7, 3))
        .unwrap();

    let chunks: Vec<BinChunk> = serde_json::from_str(&snapshot.histogram).unwrap();
    assert_eq!(chunks.len(), 2);

    assert_eq!(chunks[0][&5].stop, 1.0);
    assert_eq!(chunks[0][&6].cont, 0.0);
    assert_eq!(chunks[1][&6].cont, 1.0);
    assert_eq!(chunks[1][&5].stop, 0.0);
}

#[test]
fn snapshot_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("vigil.db");

    {
        let mut store = SqliteStore::open(&db_path).unwrap();
        let chart = store.create_chart(1, 1, false).unwrap();
        store
            .record_points_batch(chart, &[stop_on_signal(0.10), stop_on_signal(0.20)])
            .unwrap();

        let engine = StatisticsEngine::new(store);
        engine
            .compute_statistics(&ComputeStatisticsInput::new(1, 1))
            .unwrap();
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let snapshot = store.get_snapshot(1, 1).unwrap();
    assert_eq!(snapshot.stop_on_signal.count, 2);
    assert_eq!(snapshot.stop_on_signal.mean, 15.0);

    // Recomputing over the unchanged history replaces the row with
    // identical values.
    let engine = StatisticsEngine::new(store);
    let recomputed = engine
        .compute_statistics(&ComputeStatisticsInput::new(1, 1))
        .unwrap();
    assert_eq!(recomputed, snapshot);
}

#[test]
fn ingest_surface_feeds_the_engine() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store
        .ingest_chart(&ChartRecord {
            user_id: 4,
            par_set_id: 9,
            is_training: false,
            points: vec![stop_on_signal(0.10), continue_after_signal(0.20)],
        })
        .unwrap();

    let engine = StatisticsEngine::new(store);
    let snapshot = engine
        .compute_statistics(&ComputeStatisticsInput::new(4, 9))
        .unwrap();

    assert_eq!(snapshot.games_count, 1);
    assert_eq!(snapshot.stop_on_signal.count, 1);
    assert_eq!(snapshot.continue_after_signal.count, 1);
}

#[test]
fn ingest_rejects_malformed_records() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let err = store
        .ingest_chart(&ChartRecord {
            user_id: 0,
            par_set_id: 9,
            is_training: false,
            points: vec![],
        })
        .unwrap_err();
    assert_matches!(err, Error::Validation(_));
}

#[test]
fn compute_validates_before_reading() {
    let engine = StatisticsEngine::new(SqliteStore::open_in_memory().unwrap());
    assert_matches!(
        engine
            .compute_statistics(&ComputeStatisticsInput::new(0, 5))
            .unwrap_err(),
        Error::Validation(_)
    );
    assert_matches!(
        engine
            .compute_statistics(&ComputeStatisticsInput::new(5, -1))
            .unwrap_err(),
        Error::Validation(_)
    );
}
