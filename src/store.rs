use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::app_dirs::AppDirs;
use crate::error::{Error, Result};
use crate::snapshot::{ComputeStatisticsInput, DecisionStats, StatisticsSnapshot};

/// One recorded telemetry event. Immutable once recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Elapsed simulation time at the event.
    #[serde(default)]
    pub x: f64,
    /// Operator-observed position, conventionally on a 0-1 scale.
    pub y: f64,
    /// Running score at the event.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub is_crash: bool,
    #[serde(default)]
    pub is_useful_ai_signal: bool,
    #[serde(default)]
    pub is_deceptive_ai_signal: bool,
    #[serde(default)]
    pub is_stop: bool,
    #[serde(default)]
    pub is_pause: bool,
    #[serde(default)]
    pub is_check: bool,
}

/// One chart (play-through) plus its points, as accepted by the ingest
/// surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecord {
    pub user_id: i64,
    pub par_set_id: i64,
    #[serde(default)]
    pub is_training: bool,
    pub points: Vec<TelemetryPoint>,
}

/// Simulation parameters defining one testing scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub gain_coef: f64,
    pub time_const: f64,
    pub noise_coef: f64,
    pub false_warning_prob: f64,
    pub missing_danger_prob: f64,
}

/// Persistence seam used by the statistics engine. All operations are scoped
/// to one (user, parameter set) pair and exclude training charts.
pub trait StatisticsStore {
    fn count_games(&self, input: &ComputeStatisticsInput) -> Result<i64>;
    fn count_stops(&self, input: &ComputeStatisticsInput) -> Result<i64>;
    fn count_crashes(&self, input: &ComputeStatisticsInput) -> Result<i64>;
    fn positions_stop_on_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>>;
    fn positions_stop_without_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>>;
    fn positions_hint_on_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>>;
    fn positions_hint_without_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>>;
    fn positions_continue_after_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>>;
    /// Full event stream for the pair, ordered by chart then arrival.
    /// Qualification (signal present) happens in the classifier.
    fn all_events(&self, input: &ComputeStatisticsInput) -> Result<Vec<TelemetryPoint>>;
    fn total_score(&self, input: &ComputeStatisticsInput) -> Result<i64>;
    /// Replace any prior snapshot for the pair in one statement.
    fn upsert_snapshot(
        &self,
        input: &ComputeStatisticsInput,
        snapshot: &StatisticsSnapshot,
    ) -> Result<()>;
    fn get_snapshot(&self, user_id: i64, par_set_id: i64) -> Result<StatisticsSnapshot>;
}

const SNAPSHOT_COLUMNS: &str = "games_count, stops_count, crashes_count, total_score, \
     stop_on_signal_count, stop_on_signal_mean, stop_on_signal_stdev, \
     stop_without_signal_count, stop_without_signal_mean, stop_without_signal_stdev, \
     hint_on_signal_count, hint_on_signal_mean, hint_on_signal_stdev, \
     hint_without_signal_count, hint_without_signal_mean, hint_without_signal_stdev, \
     continue_after_signal_count, continue_after_signal_mean, continue_after_signal_stdev, \
     histogram";

/// SQLite-backed store for charts, points, scores, and snapshots.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the default location.
    pub fn new() -> Result<Self> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("vigil.db"));
        Self::open(db_path)
    }

    /// Open (or create) the database at `path`, creating parent directories
    /// as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("failed to create directory: {}", e)),
                    )
                })?;
            }
        }

        Self::with_connection(Connection::open(path)?)
    }

    /// In-memory store; used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS parameter_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gain_coef REAL NOT NULL,
                time_const REAL NOT NULL,
                noise_coef REAL NOT NULL,
                false_warning_prob REAL NOT NULL,
                missing_danger_prob REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS charts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                par_set_id INTEGER NOT NULL,
                is_training BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chart_id INTEGER NOT NULL REFERENCES charts(id) ON DELETE CASCADE,
                x REAL NOT NULL,
                y REAL NOT NULL,
                score REAL NOT NULL,
                is_crash BOOLEAN NOT NULL,
                is_useful_ai_signal BOOLEAN NOT NULL,
                is_deceptive_ai_signal BOOLEAN NOT NULL,
                is_stop BOOLEAN NOT NULL,
                is_pause BOOLEAN NOT NULL,
                is_check BOOLEAN NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pair_scores (
                user_id INTEGER NOT NULL,
                par_set_id INTEGER NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, par_set_id)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS statistics (
                user_id INTEGER NOT NULL,
                par_set_id INTEGER NOT NULL,
                games_count INTEGER NOT NULL,
                stops_count INTEGER NOT NULL,
                crashes_count INTEGER NOT NULL,
                total_score INTEGER NOT NULL,
                stop_on_signal_count INTEGER NOT NULL,
                stop_on_signal_mean REAL NOT NULL,
                stop_on_signal_stdev REAL NOT NULL,
                stop_without_signal_count INTEGER NOT NULL,
                stop_without_signal_mean REAL NOT NULL,
                stop_without_signal_stdev REAL NOT NULL,
                hint_on_signal_count INTEGER NOT NULL,
                hint_on_signal_mean REAL NOT NULL,
                hint_on_signal_stdev REAL NOT NULL,
                hint_without_signal_count INTEGER NOT NULL,
                hint_without_signal_mean REAL NOT NULL,
                hint_without_signal_stdev REAL NOT NULL,
                continue_after_signal_count INTEGER NOT NULL,
                continue_after_signal_mean REAL NOT NULL,
                continue_after_signal_stdev REAL NOT NULL,
                histogram TEXT NOT NULL,
                PRIMARY KEY (user_id, par_set_id)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_charts_pair ON charts(user_id, par_set_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_points_chart ON points(chart_id)",
            [],
        )?;

        Ok(SqliteStore { conn })
    }

    /// Register a parameter set and return its id.
    pub fn create_parameter_set(&self, par_set: &ParameterSet) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO parameter_sets
            (gain_coef, time_const, noise_coef, false_warning_prob, missing_danger_prob, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                par_set.gain_coef,
                par_set.time_const,
                par_set.noise_coef,
                par_set.false_warning_prob,
                par_set.missing_danger_prob,
                Local::now().to_rfc3339(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// All registered parameter sets, oldest first.
    pub fn list_parameter_sets(&self) -> Result<Vec<(i64, ParameterSet)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, gain_coef, time_const, noise_coef, false_warning_prob, missing_danger_prob
            FROM parameter_sets
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                ParameterSet {
                    gain_coef: row.get(1)?,
                    time_const: row.get(2)?,
                    noise_coef: row.get(3)?,
                    false_warning_prob: row.get(4)?,
                    missing_danger_prob: row.get(5)?,
                },
            ))
        })?;

        let mut sets = Vec::new();
        for row in rows {
            sets.push(row?);
        }

        Ok(sets)
    }

    /// Create a chart and return its id.
    pub fn create_chart(&self, user_id: i64, par_set_id: i64, is_training: bool) -> Result<i64> {
        if user_id <= 0 {
            return Err(Error::Validation(
                "user id is equal or less than zero".into(),
            ));
        }
        if par_set_id <= 0 {
            return Err(Error::Validation(
                "parameter set id is equal or less than zero".into(),
            ));
        }

        self.conn.execute(
            r#"
            INSERT INTO charts (user_id, par_set_id, is_training, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![user_id, par_set_id, is_training, Local::now().to_rfc3339()],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(chart_id = id, user_id, par_set_id, is_training, "created chart");
        Ok(id)
    }

    /// Append one point to a chart.
    pub fn record_point(&self, chart_id: i64, point: &TelemetryPoint) -> Result<()> {
        if chart_id <= 0 {
            return Err(Error::Validation(
                "chart id is equal or less than zero".into(),
            ));
        }

        self.conn.execute(
            r#"
            INSERT INTO points
            (chart_id, x, y, score, is_crash, is_useful_ai_signal, is_deceptive_ai_signal,
             is_stop, is_pause, is_check)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                chart_id,
                point.x,
                point.y,
                point.score,
                point.is_crash,
                point.is_useful_ai_signal,
                point.is_deceptive_ai_signal,
                point.is_stop,
                point.is_pause,
                point.is_check,
            ],
        )?;

        Ok(())
    }

    /// Append points to a chart in one transaction.
    pub fn record_points_batch(&mut self, chart_id: i64, points: &[TelemetryPoint]) -> Result<()> {
        if chart_id <= 0 {
            return Err(Error::Validation(
                "chart id is equal or less than zero".into(),
            ));
        }

        let tx = self.conn.transaction()?;

        for point in points {
            tx.execute(
                r#"
                INSERT INTO points
                (chart_id, x, y, score, is_crash, is_useful_ai_signal, is_deceptive_ai_signal,
                 is_stop, is_pause, is_check)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    chart_id,
                    point.x,
                    point.y,
                    point.score,
                    point.is_crash,
                    point.is_useful_ai_signal,
                    point.is_deceptive_ai_signal,
                    point.is_stop,
                    point.is_pause,
                    point.is_check,
                ],
            )?;
        }

        tx.commit()?;
        debug!(chart_id, points = points.len(), "recorded point batch");
        Ok(())
    }

    /// Ingest a whole chart record (chart row plus its points) atomically and
    /// return the new chart id.
    pub fn ingest_chart(&mut self, record: &ChartRecord) -> Result<i64> {
        if record.user_id <= 0 {
            return Err(Error::Validation(
                "user id is equal or less than zero".into(),
            ));
        }
        if record.par_set_id <= 0 {
            return Err(Error::Validation(
                "parameter set id is equal or less than zero".into(),
            ));
        }

        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO charts (user_id, par_set_id, is_training, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.user_id,
                record.par_set_id,
                record.is_training,
                Local::now().to_rfc3339(),
            ],
        )?;
        let chart_id = tx.last_insert_rowid();

        for point in &record.points {
            tx.execute(
                r#"
                INSERT INTO points
                (chart_id, x, y, score, is_crash, is_useful_ai_signal, is_deceptive_ai_signal,
                 is_stop, is_pause, is_check)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    chart_id,
                    point.x,
                    point.y,
                    point.score,
                    point.is_crash,
                    point.is_useful_ai_signal,
                    point.is_deceptive_ai_signal,
                    point.is_stop,
                    point.is_pause,
                    point.is_check,
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            chart_id,
            user_id = record.user_id,
            par_set_id = record.par_set_id,
            points = record.points.len(),
            "ingested chart"
        );
        Ok(chart_id)
    }

    /// Set the running total score for a pair, replacing any previous value.
    pub fn set_total_score(&self, user_id: i64, par_set_id: i64, score: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO pair_scores (user_id, par_set_id, score)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id, par_set_id) DO UPDATE SET score = excluded.score
            "#,
            params![user_id, par_set_id, score],
        )?;

        Ok(())
    }

    fn count_points_where(&self, input: &ComputeStatisticsInput, predicate: &str) -> Result<i64> {
        let query = format!(
            r#"
            SELECT COUNT(*)
            FROM points
            WHERE chart_id IN (
                SELECT id FROM charts
                WHERE user_id = ?1 AND par_set_id = ?2 AND NOT is_training
            )
            AND {predicate}
            "#
        );

        let count = self
            .conn
            .query_row(&query, params![input.user_id, input.par_set_id], |row| {
                row.get(0)
            })?;

        Ok(count)
    }

    // Position lists are reported on the 0-100 scale snapshots use; stored
    // y values are the raw 0-1 process positions.
    fn positions_where(&self, input: &ComputeStatisticsInput, predicate: &str) -> Result<Vec<f64>> {
        let query = format!(
            r#"
            SELECT y * 100.0
            FROM points
            WHERE chart_id IN (
                SELECT id FROM charts
                WHERE user_id = ?1 AND par_set_id = ?2 AND NOT is_training
            )
            AND {predicate}
            "#
        );

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![input.user_id, input.par_set_id], |row| row.get(0))?;

        let mut positions = Vec::new();
        for y in rows {
            positions.push(y?);
        }

        Ok(positions)
    }
}

impl StatisticsStore for SqliteStore {
    fn count_games(&self, input: &ComputeStatisticsInput) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM charts WHERE user_id = ?1 AND par_set_id = ?2 AND NOT is_training",
            params![input.user_id, input.par_set_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    fn count_stops(&self, input: &ComputeStatisticsInput) -> Result<i64> {
        self.count_points_where(input, "is_stop")
    }

    fn count_crashes(&self, input: &ComputeStatisticsInput) -> Result<i64> {
        self.count_points_where(input, "is_crash")
    }

    fn positions_stop_on_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>> {
        self.positions_where(
            input,
            "is_stop AND (is_useful_ai_signal OR is_deceptive_ai_signal)",
        )
    }

    fn positions_stop_without_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>> {
        self.positions_where(
            input,
            "is_stop AND NOT (is_useful_ai_signal OR is_deceptive_ai_signal)",
        )
    }

    fn positions_hint_on_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>> {
        self.positions_where(
            input,
            "is_check AND (is_useful_ai_signal OR is_deceptive_ai_signal)",
        )
    }

    fn positions_hint_without_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>> {
        self.positions_where(
            input,
            "is_check AND NOT (is_useful_ai_signal OR is_deceptive_ai_signal)",
        )
    }

    fn positions_continue_after_signal(&self, input: &ComputeStatisticsInput) -> Result<Vec<f64>> {
        self.positions_where(
            input,
            "NOT is_stop AND (is_useful_ai_signal OR is_deceptive_ai_signal)",
        )
    }

    fn all_events(&self, input: &ComputeStatisticsInput) -> Result<Vec<TelemetryPoint>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT x, y, score, is_crash, is_useful_ai_signal, is_deceptive_ai_signal,
                   is_stop, is_pause, is_check
            FROM points
            WHERE chart_id IN (
                SELECT id FROM charts
                WHERE user_id = ?1 AND par_set_id = ?2 AND NOT is_training
            )
            ORDER BY chart_id, id
            "#,
        )?;

        let rows = stmt.query_map(params![input.user_id, input.par_set_id], |row| {
            Ok(TelemetryPoint {
                x: row.get(0)?,
                y: row.get(1)?,
                score: row.get(2)?,
                is_crash: row.get(3)?,
                is_useful_ai_signal: row.get(4)?,
                is_deceptive_ai_signal: row.get(5)?,
                is_stop: row.get(6)?,
                is_pause: row.get(7)?,
                is_check: row.get(8)?,
            })
        })?;

        let mut points = Vec::new();
        for point in rows {
            points.push(point?);
        }

        Ok(points)
    }

    fn total_score(&self, input: &ComputeStatisticsInput) -> Result<i64> {
        // A pair that has never been scored reads as zero, matching the
        // COUNT(*) behavior of the counts.
        let score = self
            .conn
            .query_row(
                "SELECT score FROM pair_scores WHERE user_id = ?1 AND par_set_id = ?2",
                params![input.user_id, input.par_set_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(score.unwrap_or(0))
    }

    fn upsert_snapshot(
        &self,
        input: &ComputeStatisticsInput,
        snapshot: &StatisticsSnapshot,
    ) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO statistics (user_id, par_set_id, {SNAPSHOT_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
            ON CONFLICT (user_id, par_set_id) DO UPDATE SET
                games_count = excluded.games_count,
                stops_count = excluded.stops_count,
                crashes_count = excluded.crashes_count,
                total_score = excluded.total_score,
                stop_on_signal_count = excluded.stop_on_signal_count,
                stop_on_signal_mean = excluded.stop_on_signal_mean,
                stop_on_signal_stdev = excluded.stop_on_signal_stdev,
                stop_without_signal_count = excluded.stop_without_signal_count,
                stop_without_signal_mean = excluded.stop_without_signal_mean,
                stop_without_signal_stdev = excluded.stop_without_signal_stdev,
                hint_on_signal_count = excluded.hint_on_signal_count,
                hint_on_signal_mean = excluded.hint_on_signal_mean,
                hint_on_signal_stdev = excluded.hint_on_signal_stdev,
                hint_without_signal_count = excluded.hint_without_signal_count,
                hint_without_signal_mean = excluded.hint_without_signal_mean,
                hint_without_signal_stdev = excluded.hint_without_signal_stdev,
                continue_after_signal_count = excluded.continue_after_signal_count,
                continue_after_signal_mean = excluded.continue_after_signal_mean,
                continue_after_signal_stdev = excluded.continue_after_signal_stdev,
                histogram = excluded.histogram
            "#
        );

        self.conn.execute(
            &query,
            params![
                input.user_id,
                input.par_set_id,
                snapshot.games_count,
                snapshot.stops_count,
                snapshot.crashes_count,
                snapshot.total_score,
                snapshot.stop_on_signal.count,
                snapshot.stop_on_signal.mean,
                snapshot.stop_on_signal.stdev,
                snapshot.stop_without_signal.count,
                snapshot.stop_without_signal.mean,
                snapshot.stop_without_signal.stdev,
                snapshot.hint_on_signal.count,
                snapshot.hint_on_signal.mean,
                snapshot.hint_on_signal.stdev,
                snapshot.hint_without_signal.count,
                snapshot.hint_without_signal.mean,
                snapshot.hint_without_signal.stdev,
                snapshot.continue_after_signal.count,
                snapshot.continue_after_signal.mean,
                snapshot.continue_after_signal.stdev,
                snapshot.histogram,
            ],
        )?;

        Ok(())
    }

    fn get_snapshot(&self, user_id: i64, par_set_id: i64) -> Result<StatisticsSnapshot> {
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM statistics WHERE user_id = ?1 AND par_set_id = ?2"
        );

        let snapshot = self
            .conn
            .query_row(&query, params![user_id, par_set_id], |row| {
                Ok(StatisticsSnapshot {
                    games_count: row.get(0)?,
                    stops_count: row.get(1)?,
                    crashes_count: row.get(2)?,
                    total_score: row.get(3)?,
                    stop_on_signal: DecisionStats {
                        count: row.get(4)?,
                        mean: row.get(5)?,
                        stdev: row.get(6)?,
                    },
                    stop_without_signal: DecisionStats {
                        count: row.get(7)?,
                        mean: row.get(8)?,
                        stdev: row.get(9)?,
                    },
                    hint_on_signal: DecisionStats {
                        count: row.get(10)?,
                        mean: row.get(11)?,
                        stdev: row.get(12)?,
                    },
                    hint_without_signal: DecisionStats {
                        count: row.get(13)?,
                        mean: row.get(14)?,
                        stdev: row.get(15)?,
                    },
                    continue_after_signal: DecisionStats {
                        count: row.get(16)?,
                        mean: row.get(17)?,
                        stdev: row.get(18)?,
                    },
                    histogram: row.get(19)?,
                })
            })?;

        Ok(snapshot)
    }
}
