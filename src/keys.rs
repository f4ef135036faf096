use crate::models::network::Network;

/// Record families stored in the cache and time-series tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Roster,
    Stats,
    LastUpdate,
    NodeMetrics,
    PodCredits,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Roster => "nodes",
            KeyKind::Stats => "stats",
            KeyKind::LastUpdate => "last_update",
            KeyKind::NodeMetrics => "node_metrics",
            KeyKind::PodCredits => "pod_credits",
        }
    }
}

/// Builds `<kind>:<network>[:<id>]`. Every tier goes through here.
pub fn key(kind: KeyKind, network: Network, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{}:{}:{}", kind.as_str(), network.as_str(), id),
        None => format!("{}:{}", kind.as_str(), network.as_str()),
    }
}

/// Prefix shared by all entity keys of one kind within one network.
pub fn entity_prefix(kind: KeyKind, network: Network) -> String {
    format!("{}:{}:", kind.as_str(), network.as_str())
}

/// Inverse of `key` for entity keys; `None` when the key belongs elsewhere.
pub fn entity_id<'a>(kind: KeyKind, network: Network, full_key: &'a str) -> Option<&'a str> {
    let prefix = entity_prefix(kind, network);
    full_key
        .strip_prefix(prefix.as_str())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks_never_share_a_key() {
        let devnet = key(KeyKind::Roster, Network::Devnet, None);
        let mainnet = key(KeyKind::Roster, Network::Mainnet, None);
        assert_eq!(devnet, "nodes:devnet");
        assert_ne!(devnet, mainnet);
    }

    #[test]
    fn entity_id_round_trips_only_for_matching_prefix() {
        let full = key(KeyKind::NodeMetrics, Network::Mainnet, Some("abc"));
        assert_eq!(full, "node_metrics:mainnet:abc");
        assert_eq!(entity_id(KeyKind::NodeMetrics, Network::Mainnet, &full), Some("abc"));
        assert_eq!(entity_id(KeyKind::NodeMetrics, Network::Devnet, &full), None);
        assert_eq!(entity_id(KeyKind::PodCredits, Network::Mainnet, &full), None);
    }
}
