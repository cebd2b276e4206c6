//! Group-mean spread arithmetic.

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `mean(outcome | label) - mean(outcome | !label)` over labeled
/// observations. An empty group on either side leaves the spread
/// undefined; that is a legitimate degenerate-stratum result, not an
/// error.
pub fn group_spread(labeled: impl IntoIterator<Item = (bool, f64)>) -> Option<f64> {
    let mut sum = [0.0f64; 2];
    let mut count = [0usize; 2];
    for (label, value) in labeled {
        let side = usize::from(label);
        sum[side] += value;
        count[side] += 1;
    }
    if count[0] == 0 || count[1] == 0 {
        return None;
    }
    Some(sum[1] / count[1] as f64 - sum[0] / count[0] as f64)
}
