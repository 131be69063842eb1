use tracing::{debug, info};

use crate::classify::classify_events;
use crate::error::Result;
use crate::histogram::build_histogram;
use crate::snapshot::{ComputeStatisticsInput, DecisionStats, StatisticsSnapshot};
use crate::store::StatisticsStore;
use crate::util::mean_and_stdev;

/// Builds statistics snapshots over a persistence store.
///
/// Computation is synchronous per request: blocking store reads, pure
/// in-memory aggregation, one blocking upsert. The engine itself holds no
/// cross-request state.
#[derive(Debug)]
pub struct StatisticsEngine<S> {
    store: S,
}

impl<S: StatisticsStore> StatisticsEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Recomputes the snapshot for one (user, parameter set) pair from the
    /// recorded event history and persists it, replacing any prior snapshot
    /// for that pair.
    ///
    /// Fail-fast: the first store failure aborts the computation and no
    /// partial snapshot is written.
    pub fn compute_statistics(
        &self,
        input: &ComputeStatisticsInput,
    ) -> Result<StatisticsSnapshot> {
        input.validate()?;

        let games_count = self.store.count_games(input)?;
        let stops_count = self.store.count_stops(input)?;
        let crashes_count = self.store.count_crashes(input)?;

        let stop_on_signal = category_stats(&self.store.positions_stop_on_signal(input)?);
        let stop_without_signal =
            category_stats(&self.store.positions_stop_without_signal(input)?);
        let hint_on_signal = category_stats(&self.store.positions_hint_on_signal(input)?);
        let hint_without_signal =
            category_stats(&self.store.positions_hint_without_signal(input)?);
        let continue_after_signal =
            category_stats(&self.store.positions_continue_after_signal(input)?);

        let total_score = self.store.total_score(input)?;

        let events = self.store.all_events(input)?;
        let choices = classify_events(&events);
        debug!(
            points = events.len(),
            qualifying = choices.len(),
            "classified event stream"
        );

        let chunks = build_histogram(&choices);
        let histogram = serde_json::to_string(&chunks)?;

        let snapshot = StatisticsSnapshot {
            games_count,
            stops_count,
            crashes_count,
            total_score,
            stop_on_signal,
            stop_without_signal,
            hint_on_signal,
            hint_without_signal,
            continue_after_signal,
            histogram,
        };

        self.store.upsert_snapshot(input, &snapshot)?;
        info!(
            user_id = input.user_id,
            par_set_id = input.par_set_id,
            games = games_count,
            chunks = chunks.len(),
            "statistics snapshot updated"
        );

        Ok(snapshot)
    }

    /// Returns the stored snapshot verbatim; no computation happens on the
    /// read path.
    pub fn get_statistics(&self, user_id: i64, par_set_id: i64) -> Result<StatisticsSnapshot> {
        self.store.get_snapshot(user_id, par_set_id)
    }
}

fn category_stats(positions: &[f64]) -> DecisionStats {
    let (mean, stdev) = mean_and_stdev(positions);
    DecisionStats {
        count: positions.len() as i64,
        mean,
        stdev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::error::Error;
    use crate::histogram::BinChunk;
    use crate::store::{SqliteStore, TelemetryPoint};

    fn engine_with_store() -> StatisticsEngine<SqliteStore> {
        StatisticsEngine::new(SqliteStore::open_in_memory().unwrap())
    }

    fn signal_stop(y: f64) -> TelemetryPoint {
        TelemetryPoint {
            y,
            is_useful_ai_signal: true,
            is_stop: true,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_non_positive_user_id() {
        let engine = engine_with_store();
        let err = engine
            .compute_statistics(&ComputeStatisticsInput::new(0, 5))
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[test]
    fn rejects_negative_par_set_id() {
        let engine = engine_with_store();
        let err = engine
            .compute_statistics(&ComputeStatisticsInput::new(5, -1))
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[test]
    fn three_stops_on_signal_end_to_end() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let chart_id = store.create_chart(1, 2, false).unwrap();
        store
            .record_points_batch(
                chart_id,
                &[signal_stop(0.10), signal_stop(0.20), signal_stop(0.30)],
            )
            .unwrap();

        let engine = StatisticsEngine::new(store);
        let input = ComputeStatisticsInput::new(1, 2);
        let snapshot = engine.compute_statistics(&input).unwrap();

        assert_eq!(snapshot.games_count, 1);
        assert_eq!(snapshot.stops_count, 3);
        assert_eq!(snapshot.crashes_count, 0);
        assert_eq!(snapshot.total_score, 0);

        assert_eq!(snapshot.stop_on_signal.count, 3);
        assert_eq!(snapshot.stop_on_signal.mean, 20.0);
        // population stdev of positions 10/20/30: sqrt(200/3) ~ 8.165
        assert!((snapshot.stop_on_signal.stdev - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!((snapshot.stop_on_signal.stdev - 8.1649658).abs() < 1e-6);

        for category in [
            snapshot.stop_without_signal,
            snapshot.hint_on_signal,
            snapshot.hint_without_signal,
            snapshot.continue_after_signal,
        ] {
            assert_eq!(category, DecisionStats::default());
        }

        // Three qualifying events form a single remainder chunk covering
        // positions 10 through 30, all of it stop.
        let chunks: Vec<BinChunk> = serde_json::from_str(&snapshot.histogram).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 21);
        assert_eq!(chunks[0][&10].stop, 1.0);
        assert_eq!(chunks[0][&20].stop, 1.0);
        assert_eq!(chunks[0][&30].stop, 1.0);
        assert_eq!(chunks[0][&15].stop, 0.0);
    }

    #[test]
    fn training_charts_are_invisible_to_the_computation() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let training = store.create_chart(1, 2, true).unwrap();
        store
            .record_points_batch(training, &[signal_stop(0.9), signal_stop(0.8)])
            .unwrap();

        let engine = StatisticsEngine::new(store);
        let snapshot = engine
            .compute_statistics(&ComputeStatisticsInput::new(1, 2))
            .unwrap();

        assert_eq!(snapshot.games_count, 0);
        assert_eq!(snapshot.stops_count, 0);
        assert_eq!(snapshot.stop_on_signal, DecisionStats::default());
        assert_eq!(snapshot.histogram, "[]");
    }

    #[test]
    fn recompute_is_idempotent_over_an_unchanged_event_set() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let chart_id = store.create_chart(1, 2, false).unwrap();
        store
            .record_points_batch(chart_id, &[signal_stop(0.10), signal_stop(0.20)])
            .unwrap();
        store.set_total_score(1, 2, 42).unwrap();

        let engine = StatisticsEngine::new(store);
        let input = ComputeStatisticsInput::new(1, 2);

        let first = engine.compute_statistics(&input).unwrap();
        let second = engine.compute_statistics(&input).unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.get_statistics(1, 2).unwrap(), second);
    }

    #[test]
    fn read_path_surfaces_missing_snapshot_as_store_error() {
        let engine = engine_with_store();
        let err = engine.get_statistics(1, 2).unwrap_err();
        assert_matches!(err, Error::Store(_));
    }

    #[test]
    fn total_score_flows_from_the_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_total_score(3, 4, 512).unwrap();

        let engine = StatisticsEngine::new(store);
        let snapshot = engine
            .compute_statistics(&ComputeStatisticsInput::new(3, 4))
            .unwrap();
        assert_eq!(snapshot.total_score, 512);
    }
}
