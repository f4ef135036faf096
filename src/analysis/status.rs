use crate::models::node::NodeStatus;

pub const ACTIVE_WINDOW_MS: i64 = 60_000;
pub const SYNCING_WINDOW_MS: i64 = 300_000;

/// Liveness from the age of the last heartbeat. No hysteresis.
/// - age < 60s → active
/// - age < 5min → syncing
/// - otherwise, or never seen → offline
pub fn derive_status(now_ms: i64, last_seen_ms: Option<i64>) -> NodeStatus {
    let Some(last_seen) = last_seen_ms else {
        return NodeStatus::Offline;
    };

    let age = now_ms - last_seen;
    if age < ACTIVE_WINDOW_MS {
        NodeStatus::Active
    } else if age < SYNCING_WINDOW_MS {
        NodeStatus::Syncing
    } else {
        NodeStatus::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_split_into_three_bands() {
        let now = 1_000_000_000;
        assert_eq!(derive_status(now, Some(now)), NodeStatus::Active);
        assert_eq!(derive_status(now, Some(now - 59_999)), NodeStatus::Active);
        assert_eq!(derive_status(now, Some(now - 60_000)), NodeStatus::Syncing);
        assert_eq!(derive_status(now, Some(now - 299_999)), NodeStatus::Syncing);
        assert_eq!(derive_status(now, Some(now - 300_000)), NodeStatus::Offline);
        assert_eq!(derive_status(now, None), NodeStatus::Offline);
    }

    #[test]
    fn every_age_maps_to_the_expected_band() {
        let now = 10_000_000;
        for age in (0..400_000).step_by(1_250) {
            let expected = if age < 60_000 {
                NodeStatus::Active
            } else if age < 300_000 {
                NodeStatus::Syncing
            } else {
                NodeStatus::Offline
            };
            assert_eq!(derive_status(now, Some(now - age)), expected, "age {age}");
        }
    }
}
