use crate::commands::settings::NetworkEndpoints;
use crate::error::{PodwatchError, Result};
use crate::models::network::Network;
use crate::models::snapshot::PodCredit;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct LedgerResponse {
    #[serde(default)]
    pods_credits: Vec<RawPodCredit>,
}

#[derive(Debug, Deserialize)]
struct RawPodCredit {
    #[serde(default)]
    pod_id: String,
    #[serde(default)]
    credits: Option<f64>,
}

/// Per-network credit ledger. Read-only GET endpoints.
#[derive(Clone)]
pub struct LedgerClient {
    http: Client,
    endpoints: NetworkEndpoints,
}

impl LedgerClient {
    pub fn new(endpoints: NetworkEndpoints, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PodwatchError::Config(format!("Failed to build ledger client: {e}")))?;
        Ok(Self { http, endpoints })
    }

    pub fn is_configured(&self, network: Network) -> bool {
        !self.endpoints.for_network(network).trim().is_empty()
    }

    pub async fn fetch_credits(&self, network: Network) -> Result<Vec<PodCredit>> {
        let endpoint = self.endpoints.for_network(network).trim();
        if endpoint.is_empty() {
            return Err(PodwatchError::upstream(
                format!("{network} credit ledger"),
                "not configured",
            ));
        }

        let response = self
            .http
            .get(endpoint)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint, e.to_string()))?;

        if !response.status().is_success() {
            return Err(PodwatchError::upstream(
                endpoint,
                format!("ledger returned {}", response.status()),
            ));
        }

        let body: LedgerResponse = response
            .json()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint, format!("malformed ledger payload: {e}")))?;

        Ok(body
            .pods_credits
            .into_iter()
            .filter_map(|raw| match validate_credit(raw) {
                Ok(credit) => Some(credit),
                Err(e) => {
                    log::warn!("[{network}] dropping ledger entry: {e}");
                    None
                }
            })
            .collect())
    }

    /// Pod ids present in the mainnet ledger.
    pub async fn mainnet_members(&self) -> Result<HashSet<String>> {
        let credits = self.fetch_credits(Network::Mainnet).await?;
        Ok(credits.into_iter().map(|c| c.pod_id).collect())
    }
}

fn validate_credit(raw: RawPodCredit) -> Result<PodCredit> {
    let pod_id = raw.pod_id.trim().to_string();
    if pod_id.is_empty() {
        return Err(PodwatchError::RecordInvalid("ledger entry without pod_id".to_string()));
    }
    match raw.credits {
        Some(credits) if credits.is_finite() => Ok(PodCredit { pod_id, credits }),
        _ => Err(PodwatchError::RecordInvalid(format!(
            "ledger entry {pod_id} has no finite credit balance"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_without_pod_id_or_finite_credits_are_rejected() {
        let ok = validate_credit(RawPodCredit {
            pod_id: " pod-a ".to_string(),
            credits: Some(12.5),
        })
        .expect("valid");
        assert_eq!(ok.pod_id, "pod-a");

        assert!(matches!(
            validate_credit(RawPodCredit { pod_id: String::new(), credits: Some(1.0) }),
            Err(PodwatchError::RecordInvalid(_))
        ));
        assert!(matches!(
            validate_credit(RawPodCredit { pod_id: "pod".to_string(), credits: None }),
            Err(PodwatchError::RecordInvalid(_))
        ));
    }

    #[test]
    fn ledger_payload_tolerates_missing_fields() {
        let parsed: LedgerResponse =
            serde_json::from_str(r#"{"pods_credits":[{"pod_id":"a","credits":3}],"network":"devnet"}"#)
                .expect("parse");
        assert_eq!(parsed.pods_credits.len(), 1);

        let empty: LedgerResponse = serde_json::from_str("{}").expect("parse");
        assert!(empty.pods_credits.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_upstream_unavailable() {
        let client = LedgerClient::new(
            NetworkEndpoints {
                devnet: String::new(),
                mainnet: String::new(),
            },
            Duration::from_secs(1),
        )
        .expect("client");

        assert!(!client.is_configured(Network::Devnet));
        let err = client.fetch_credits(Network::Devnet).await.expect_err("not configured");
        assert!(matches!(err, PodwatchError::UpstreamUnavailable { .. }));
    }
}
