use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scope of one statistics computation: which user played which parameter
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeStatisticsInput {
    pub user_id: i64,
    pub par_set_id: i64,
}

impl ComputeStatisticsInput {
    pub fn new(user_id: i64, par_set_id: i64) -> Self {
        Self {
            user_id,
            par_set_id,
        }
    }

    /// Rejects non-positive ids. Runs before any store access.
    pub fn validate(&self) -> Result<()> {
        if self.user_id <= 0 {
            return Err(Error::Validation(
                "user id is equal or less than zero".into(),
            ));
        }
        if self.par_set_id <= 0 {
            return Err(Error::Validation(
                "parameter set id is equal or less than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Count, mean, and population standard deviation of the observed positions
/// in one decision category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub count: i64,
    pub mean: f64,
    pub stdev: f64,
}

/// Aggregate statistics for one (user, parameter set) pair. Upserted as a
/// whole on every recompute; there is no snapshot history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub games_count: i64,
    pub stops_count: i64,
    pub crashes_count: i64,
    pub total_score: i64,
    pub stop_on_signal: DecisionStats,
    pub stop_without_signal: DecisionStats,
    pub hint_on_signal: DecisionStats,
    pub hint_without_signal: DecisionStats,
    pub continue_after_signal: DecisionStats,
    /// Chunked decision histogram, serialized as JSON (see `histogram`).
    pub histogram: String,
}
