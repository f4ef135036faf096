use crate::models::node::{NetworkBaseline, NodeRecord, NodeStatus, ScoreBreakdown};

pub const UPTIME_MAX: f64 = 30.0;
pub const RESPONSE_TIME_MAX: f64 = 25.0;
pub const STORAGE_MAX: f64 = 20.0;
pub const VERSION_MAX: f64 = 15.0;
pub const RELIABILITY_MAX: f64 = 10.0;

const FAST_RESPONSE_MS: u64 = 100;
const SLOW_RESPONSE_MS: u64 = 2_000;

/// Grade bands, highest first. Independent of the network baseline.
const GRADES: [(f64, &str, &str); 6] = [
    (90.0, "A+", "#10b981"),
    (80.0, "A", "#22c55e"),
    (70.0, "B", "#84cc16"),
    (60.0, "C", "#eab308"),
    (50.0, "D", "#f97316"),
    (f64::NEG_INFINITY, "F", "#ef4444"),
];

/// Composite health score of one node against this sweep's peer baseline.
/// Pure and deterministic; missing inputs score zero for their component.
pub fn score(record: &NodeRecord, baseline: &NetworkBaseline) -> ScoreBreakdown {
    let uptime = round1(relative_points(record.uptime, baseline.avg_uptime, UPTIME_MAX));
    let response_time = round1(response_points(record.response_time_ms));
    let storage = round1(relative_points(
        record.storage_committed as f64,
        baseline.avg_storage_committed,
        STORAGE_MAX,
    ));
    let version = version_points(&record.version, &baseline.known_good_version);
    let reliability = reliability_points(record.status, baseline);

    let total = round1(uptime + response_time + storage + version + reliability);
    let (grade, color) = grade_for(total);

    ScoreBreakdown {
        uptime,
        response_time,
        storage,
        version,
        reliability,
        total,
        grade: grade.to_string(),
        color: color.to_string(),
    }
}

/// Applies `score` and copies the total onto the record.
pub fn apply_score(record: &mut NodeRecord, baseline: &NetworkBaseline) {
    let breakdown = score(record, baseline);
    record.score = breakdown.total;
    record.score_breakdown = Some(breakdown);
}

pub fn grade_for(total: f64) -> (&'static str, &'static str) {
    GRADES
        .iter()
        .find(|(floor, _, _)| total >= *floor)
        .map(|(_, grade, color)| (*grade, *color))
        .unwrap_or(("F", "#ef4444"))
}

fn relative_points(value: f64, peer_average: f64, max: f64) -> f64 {
    if !value.is_finite() || !peer_average.is_finite() || peer_average <= 0.0 || value <= 0.0 {
        return 0.0;
    }
    (value / peer_average).min(1.0) * max
}

fn response_points(response_time_ms: Option<u64>) -> f64 {
    let Some(ms) = response_time_ms else {
        return 0.0;
    };
    if ms <= FAST_RESPONSE_MS {
        return RESPONSE_TIME_MAX;
    }
    if ms >= SLOW_RESPONSE_MS {
        return 0.0;
    }
    let span = (SLOW_RESPONSE_MS - FAST_RESPONSE_MS) as f64;
    RESPONSE_TIME_MAX * (SLOW_RESPONSE_MS - ms) as f64 / span
}

fn version_points(version: &str, known_good: &str) -> f64 {
    let (Some(current), Some(target)) = (parse_version(version), parse_version(known_good)) else {
        return 0.0;
    };

    if current >= target {
        VERSION_MAX
    } else if current.0 == target.0 && current.1 == target.1 {
        10.0
    } else if current.0 == target.0 {
        5.0
    } else {
        0.0
    }
}

fn reliability_points(status: NodeStatus, baseline: &NetworkBaseline) -> f64 {
    match status {
        NodeStatus::Active => RELIABILITY_MAX,
        // With no active peer at all the lag is network-wide, not this node's.
        NodeStatus::Syncing if baseline.active_nodes == 0 => RELIABILITY_MAX,
        NodeStatus::Syncing => RELIABILITY_MAX / 2.0,
        NodeStatus::Offline => 0.0,
    }
}

/// `v0.7.3-trynet` → (0, 7, 3). Missing parts are zero.
pub fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    let mut parts = trimmed.split('.').map(leading_number);

    let major = parts.next().flatten()?;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

fn leading_number(part: &str) -> Option<u64> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
