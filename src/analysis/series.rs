use crate::models::history::{SeriesStats, WindowChange};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Stats over a newest-first series: `current` is index 0, `previous` the
/// last element. Reversing the input flips the sign of `change`.
pub fn series_stats(values_desc: &[f64]) -> Option<SeriesStats> {
    let current = *values_desc.first()?;
    let previous = *values_desc.last()?;

    let min = values_desc.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values_desc.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values_desc.iter().sum::<f64>() / values_desc.len() as f64;

    Some(SeriesStats {
        min,
        max,
        avg,
        current,
        previous,
        change: current - previous,
    })
}

/// Percentage change, 0 when the baseline is not positive.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else {
        0.0
    }
}

/// Change between the newest and oldest values of a newest-first window.
pub fn window_change(values_desc: &[f64]) -> Option<WindowChange> {
    let current = *values_desc.first()?;
    let previous = *values_desc.last()?;
    Some(WindowChange {
        current,
        previous,
        change: current - previous,
        percent_change: percent_change(current, previous),
    })
}

/// Units gained per hour between the oldest and newest observation.
pub fn earning_rate(change: f64, newest_ts: i64, oldest_ts: i64) -> f64 {
    let hours = (newest_ts - oldest_ts) as f64 / MS_PER_HOUR;
    if hours > 0.0 {
        change / hours
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
