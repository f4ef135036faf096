use crate::models::node::{NetworkBaseline, NetworkStats, NodeRecord, NodeStatus};

/// Peer averages over the current roster. An empty roster yields zeros.
pub fn compute_baseline(records: &[NodeRecord], known_good_version: &str) -> NetworkBaseline {
    let count = records.len().max(1) as f64;
    let uptime_sum: f64 = records.iter().map(|r| r.uptime).sum();
    let storage_sum: f64 = records.iter().map(|r| r.storage_committed as f64).sum();

    NetworkBaseline {
        avg_uptime: uptime_sum / count,
        avg_storage_committed: storage_sum / count,
        active_nodes: records
            .iter()
            .filter(|r| r.status == NodeStatus::Active)
            .count(),
        known_good_version: known_good_version.to_string(),
    }
}

pub fn compute_network_stats(records: &[NodeRecord]) -> NetworkStats {
    let count_status = |status: NodeStatus| records.iter().filter(|r| r.status == status).count();
    let score_sum: f64 = records.iter().map(|r| r.score).sum();

    NetworkStats {
        total: records.len(),
        active: count_status(NodeStatus::Active),
        syncing: count_status(NodeStatus::Syncing),
        offline: count_status(NodeStatus::Offline),
        avg_score: score_sum / records.len().max(1) as f64,
        total_storage: records.iter().map(|r| r.storage_committed).sum(),
        used_storage: records.iter().map(|r| r.storage_used).sum(),
    }
}

/// Share of the population strictly below `value`, as a rounded percentage.
pub fn percentile_rank(value: f64, population: &[f64]) -> u32 {
    if population.is_empty() {
        return 0;
    }
    let below = population.iter().filter(|v| **v < value).count();
    (below as f64 / population.len() as f64 * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::status::derive_status;

    fn node(pubkey: &str, uptime: f64, committed: u64, last_seen: i64, now: i64) -> NodeRecord {
        NodeRecord {
            id: format!("pnode-{pubkey}"),
            pubkey: pubkey.to_string(),
            version: "0.7.3".to_string(),
            status: derive_status(now, Some(last_seen)),
            uptime,
            last_seen,
            rpc_port: 0,
            ip_address: String::new(),
            is_public: false,
            storage_committed: committed,
            storage_used: committed / 2,
            storage_usage_percent: 50.0,
            response_time_ms: None,
            details: None,
            score_breakdown: None,
            score: 0.0,
        }
    }

    #[test]
    fn three_node_roster_has_one_active_peer() {
        let now = 5_000_000;
        let roster = vec![
            node("a", 100.0, 1_000, now, now),
            node("b", 200.0, 2_000, now - 120_000, now),
            node("c", 300.0, 3_000, now - 600_000, now),
        ];
        let statuses: Vec<NodeStatus> = roster.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![NodeStatus::Active, NodeStatus::Syncing, NodeStatus::Offline]);

        let baseline = compute_baseline(&roster, "0.7.3");
        assert_eq!(baseline.active_nodes, 1);
        assert_eq!(baseline.avg_uptime, 200.0);
        assert_eq!(baseline.avg_storage_committed, 2_000.0);

        let stats = compute_network_stats(&roster);
        assert_eq!((stats.active, stats.syncing, stats.offline), (1, 1, 1));
        assert_eq!(stats.total_storage, 6_000);
        assert_eq!(stats.used_storage, 3_000);
    }

    #[test]
    fn empty_roster_produces_zero_baseline() {
        let baseline = compute_baseline(&[], "0.7.3");
        assert_eq!(baseline.avg_uptime, 0.0);
        assert_eq!(baseline.active_nodes, 0);
        assert_eq!(compute_network_stats(&[]).avg_score, 0.0);
    }

    #[test]
    fn percentile_counts_strictly_lower_peers() {
        let peers = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile_rank(30.0, &peers), 50);
        assert_eq!(percentile_rank(5.0, &peers), 0);
        assert_eq!(percentile_rank(99.0, &peers), 100);
        assert_eq!(percentile_rank(1.0, &[]), 0);
    }
}
