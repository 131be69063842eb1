pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// Population standard deviation (divisor N, not N-1). Stored snapshots were
/// produced with this divisor, so it must not change.
pub fn std_dev(data: &[f64]) -> Option<f64> {
    match (mean(data), data.len()) {
        (Some(data_mean), count) if count > 0 => {
            let variance = data
                .iter()
                .map(|value| {
                    let diff = data_mean - *value;

                    diff * diff
                })
                .sum::<f64>()
                / count as f64;

            Some(variance.sqrt())
        }
        _ => None,
    }
}

/// Combined mean and population standard deviation with the zero default
/// used by snapshots: an empty list yields `(0.0, 0.0)`.
pub fn mean_and_stdev(data: &[f64]) -> (f64, f64) {
    match (mean(data), std_dev(data)) {
        (Some(m), Some(s)) => (m, s),
        _ => (0.0, 0.0),
    }
}
