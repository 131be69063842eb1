use crate::store::TelemetryPoint;

/// Decision flags carried by one classified event. `hint` can combine with
/// either of the other two; `stop` and `cont` are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Choices {
    pub hint: bool,
    pub stop: bool,
    pub cont: bool,
}

/// One qualifying event: the operator-observed position rounded to an
/// integer, plus the decisions taken at that position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceStat {
    pub y: i64,
    pub choices: Choices,
}

/// Tags each qualifying point with its decision categories.
///
/// A point qualifies only if it carries an AI signal (useful or deceptive);
/// everything else has no decision context and is dropped. Input order is
/// preserved.
pub fn classify_events(points: &[TelemetryPoint]) -> Vec<ChoiceStat> {
    points
        .iter()
        .filter(|p| p.is_useful_ai_signal || p.is_deceptive_ai_signal)
        .map(|p| ChoiceStat {
            y: (p.y * 100.0).round() as i64,
            choices: Choices {
                hint: p.is_check,
                stop: p.is_stop,
                cont: !p.is_stop,
            },
        })
        .collect()
}
