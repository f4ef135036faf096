use axum::extract::{Path, State};
use axum::http::StatusCode as UpstreamStatus;
use axum::routing::{get, post};
use axum::{Json, Router};
use podwatch_lib::clock::ManualClock;
use podwatch_lib::commands::settings::Settings;
use podwatch_lib::{router, AppState};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const NOW: i64 = 1_700_000_000_000;
const SECRET: &str = "s3cret";
const DEV_PUBLIC: &str = "DEVPUBLIC1xyz";
const DEV_PRIVATE: &str = "DEVPRIVATE2abc";
const MAIN_NODE: &str = "MAINNODE3def";

/// How the fake node answers `get-stats`.
#[derive(Clone, Copy, PartialEq)]
enum DetailBehaviour {
    Healthy,
    Failing,
    /// Answers after the configured detail timeout.
    Slow,
}

#[derive(Clone)]
struct FakeUpstream {
    port: u16,
    devnet_credits: Arc<Mutex<f64>>,
    mainnet_ledger_down: Arc<AtomicBool>,
    details: Arc<Mutex<DetailBehaviour>>,
    roster_calls: Arc<AtomicUsize>,
}

impl FakeUpstream {
    fn pods(&self) -> Value {
        let last_seen = NOW / 1000;
        json!([
            {
                "pubkey": DEV_PUBLIC,
                "version": "0.7.3",
                "uptime": 3600,
                "last_seen_timestamp": last_seen,
                "address": "127.0.0.1:9001",
                "rpc_port": self.port,
                "is_public": true,
                "storage_committed": 1000,
                "storage_used": 250,
                "storage_usage_percent": 25.0
            },
            {
                "pubkey": DEV_PRIVATE,
                "version": "0.6.0",
                "uptime": 1800,
                "last_seen_timestamp": last_seen - 120,
                "is_public": false,
                "storage_committed": 500,
                "storage_used": 100
            },
            {
                "pubkey": MAIN_NODE,
                "uptime": 7200,
                "last_seen_timestamp": last_seen,
                "storage_committed": 2000
            },
            { "version": "0.7.3", "uptime": 10 }
        ])
    }
}

async fn fake_rpc(
    State(up): State<FakeUpstream>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, UpstreamStatus> {
    let response = match body["method"].as_str() {
        Some("get-pods-with-stats") => {
            up.roster_calls.fetch_add(1, Ordering::SeqCst);
            json!({"jsonrpc": "2.0", "id": 1, "result": {"pods": up.pods()}})
        }
        Some("get-stats") => {
            let behaviour = *up.details.lock().expect("details lock");
            match behaviour {
                DetailBehaviour::Failing => return Err(UpstreamStatus::INTERNAL_SERVER_ERROR),
                DetailBehaviour::Slow => tokio::time::sleep(Duration::from_millis(1_500)).await,
                DetailBehaviour::Healthy => {}
            }
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"cpu_percent": 12.5, "ram_total": 1000, "ram_used": 250}
            })
        }
        _ => json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "method not found"}}),
    };
    Ok(Json(response))
}

async fn fake_credits(
    State(up): State<FakeUpstream>,
    Path(network): Path<String>,
) -> Result<Json<Value>, UpstreamStatus> {
    let pods = match network.as_str() {
        "mainnet" if up.mainnet_ledger_down.load(Ordering::SeqCst) => {
            return Err(UpstreamStatus::SERVICE_UNAVAILABLE)
        }
        "mainnet" => json!([{"pod_id": MAIN_NODE, "credits": 500.0}]),
        _ => {
            let credits = *up.devnet_credits.lock().expect("credits lock");
            json!([{"pod_id": DEV_PUBLIC, "credits": credits}, {"pod_id": "", "credits": 1.0}])
        }
    };
    Ok(Json(json!({"pods_credits": pods, "network": network})))
}

async fn serve(listener: TcpListener, app: Router) -> SocketAddr {
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

struct Harness {
    _tmp: TempDir,
    clock: Arc<ManualClock>,
    upstream: FakeUpstream,
    devnet_credits: Arc<Mutex<f64>>,
    base: String,
    http: Client,
}

impl Harness {
    async fn start(mainnet_cluster_override: Option<&str>) -> Harness {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
        let upstream_port = upstream_listener.local_addr().expect("addr").port();
        let devnet_credits = Arc::new(Mutex::new(100.0));
        let upstream = FakeUpstream {
            port: upstream_port,
            devnet_credits: devnet_credits.clone(),
            mainnet_ledger_down: Arc::new(AtomicBool::new(false)),
            details: Arc::new(Mutex::new(DetailBehaviour::Healthy)),
            roster_calls: Arc::new(AtomicUsize::new(0)),
        };
        let upstream_app = Router::new()
            .route("/rpc", post(fake_rpc))
            .route("/credits/{network}", get(fake_credits))
            .with_state(upstream.clone());
        let upstream_addr = serve(upstream_listener, upstream_app).await;

        let tmp = tempfile::tempdir().expect("temp dir");
        let rpc = format!("http://{upstream_addr}/rpc");
        let settings = Settings::from_json(json!({
            "clusterEndpoints": {
                "devnet": rpc,
                "mainnet": mainnet_cluster_override.unwrap_or(&rpc)
            },
            "creditEndpoints": {
                "devnet": format!("http://{upstream_addr}/credits/devnet"),
                "mainnet": format!("http://{upstream_addr}/credits/mainnet")
            },
            "databasePath": tmp.path().join("history.db").to_string_lossy(),
            "cronSecret": SECRET,
            "rosterTimeoutMs": 2000,
            "detailTimeoutMs": 1000
        }))
        .expect("settings");

        let clock = Arc::new(ManualClock::new(NOW));
        let state = AppState::from_settings(&settings, clock.clone()).expect("app state");
        let app_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind app");
        let app_addr = serve(app_listener, router(state)).await;

        Harness {
            _tmp: tmp,
            clock,
            upstream,
            devnet_credits,
            base: format!("http://{app_addr}"),
            http: Client::new(),
        }
    }

    async fn collect(&self) -> Value {
        let resp = self
            .http
            .post(format!("{}/api/analytics/collect", self.base))
            .bearer_auth(SECRET)
            .send()
            .await
            .expect("collect request");
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.expect("collect body")
    }

    fn set_details(&self, behaviour: DetailBehaviour) {
        *self.upstream.details.lock().expect("details lock") = behaviour;
    }

    fn roster_calls(&self) -> usize {
        self.upstream.roster_calls.load(Ordering::SeqCst)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("get request");
        let status = resp.status();
        (status, resp.json().await.expect("json body"))
    }
}

#[tokio::test]
async fn collect_rejects_missing_or_wrong_bearer_token() {
    let h = Harness::start(None).await;

    let resp = h
        .http
        .post(format!("{}/api/analytics/collect", h.base))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.expect("body");
    assert_eq!(body["success"], false);

    let resp = h
        .http
        .post(format!("{}/api/cron/cleanup", h.base))
        .bearer_auth("wrong")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (_, overview) = h.get("/api/analytics/overview?network=devnet").await;
    assert_eq!(overview["data"]["nodes"]["total"], 0);
}

#[tokio::test]
async fn sweep_splits_networks_and_persists_history() {
    let h = Harness::start(None).await;

    let body = h.collect().await;
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 2);
    assert_eq!(body["stats"]["devnet"]["podsProcessed"], 1);
    assert_eq!(body["stats"]["mainnet"]["nodesProcessed"], 1);
    assert_eq!(body["stats"]["mainnet"]["podsProcessed"], 1);

    let (status, node) = h
        .get(&format!("/api/analytics/node/{DEV_PUBLIC}?network=devnet&period=all"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node["data"]["stats"]["dataPoints"], 1);
    let latest = &node["data"]["history"][0];
    assert_eq!(latest["timestamp"], NOW);
    assert_eq!(latest["cpuPercent"], 12.5);
    assert_eq!(latest["ramPercent"], 25.0);
    assert_eq!(node["data"]["stats"]["networkComparison"]["totalNodes"], 2);

    let (_, other) = h
        .get(&format!("/api/analytics/node/{DEV_PUBLIC}?network=mainnet&period=all"))
        .await;
    assert_eq!(other["success"], true);
    assert_eq!(other["data"]["stats"]["dataPoints"], 0);
    assert_eq!(other["data"]["history"], json!([]));
    assert!(other["message"].is_string());

    let (_, roster) = h.get("/api/pnodes?network=devnet").await;
    assert_eq!(roster["cached"], true);
    assert_eq!(roster["count"], 2);
    assert_eq!(roster["stats"]["active"], 1);
    assert_eq!(roster["stats"]["syncing"], 1);

    let (_, active_only) = h.get("/api/pnodes?network=devnet&status=active").await;
    assert_eq!(active_only["count"], 1);
    assert_eq!(active_only["data"][0]["pubkey"], DEV_PUBLIC);
    assert!(active_only["data"][0]["responseTimeMs"].is_u64());
}

#[tokio::test]
async fn credit_delta_over_ten_minutes_matches_two_sweeps() {
    let h = Harness::start(None).await;

    h.collect().await;
    *h.devnet_credits.lock().expect("credits lock") = 150.0;
    h.clock.advance(600_000);
    h.collect().await;

    let (_, pod) = h
        .get(&format!("/api/analytics/pod/{DEV_PUBLIC}?network=devnet&period=10min"))
        .await;
    let credits = &pod["data"]["stats"]["credits"];
    assert_eq!(pod["data"]["stats"]["dataPoints"], 2);
    assert_eq!(credits["current"], 150.0);
    assert_eq!(credits["previous"], 100.0);
    assert_eq!(credits["change"], 50.0);
    assert_eq!(credits["percentChange"], 50.0);
    assert_eq!(pod["data"]["stats"]["timeRange"]["start"], NOW);
    assert_eq!(pod["data"]["stats"]["timeRange"]["end"], NOW + 600_000);

    let (_, overview) = h.get("/api/analytics/overview?network=devnet&limit=5").await;
    assert_eq!(overview["data"]["pods"]["total"], 1);
    assert_eq!(overview["data"]["pods"]["data"][0]["latest"]["credits"], 150.0);
    assert_eq!(overview["data"]["nodes"]["tracked"], 2);

    let (_, aggregate) = h
        .get(&format!("/api/analytics/aggregate/{DEV_PUBLIC}?network=devnet&metric=credits&period=all"))
        .await;
    assert_eq!(aggregate["data"]["avg"], 125.0);
    assert_eq!(aggregate["data"]["count"], 2);
}

#[tokio::test]
async fn one_network_failing_leaves_the_other_untouched() {
    let h = Harness::start(Some("http://127.0.0.1:1/rpc")).await;

    let body = h.collect().await;
    assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 2);
    assert_eq!(body["stats"]["mainnet"]["nodesProcessed"], 0);
    assert!(body["stats"]["mainnet"]["error"].is_string());

    let (_, overview) = h.get("/api/analytics/overview?network=mainnet").await;
    assert_eq!(overview["data"]["nodes"]["total"], 0);
}

#[tokio::test]
async fn retention_endpoints_run_with_a_valid_token() {
    let h = Harness::start(None).await;
    h.collect().await;

    h.clock.advance(8 * 86_400_000);
    let resp = h
        .http
        .post(format!("{}/api/cron/cleanup", h.base))
        .bearer_auth(SECRET)
        .send()
        .await
        .expect("cleanup request");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("body");
    assert_eq!(body["data"]["entriesRemoved"], 5);

    let resp = h
        .http
        .post(format!("{}/api/cron/init-expirations", h.base))
        .bearer_auth(SECRET)
        .send()
        .await
        .expect("init request");
    assert_eq!(resp.status(), StatusCode::OK);

    // Durable history survives the soft prune.
    let (_, node) = h
        .get(&format!("/api/analytics/node/{DEV_PUBLIC}?network=devnet&period=all"))
        .await;
    assert_eq!(node["data"]["stats"]["dataPoints"], 1);
}

#[tokio::test]
async fn invalid_query_parameters_are_bad_requests() {
    let h = Harness::start(None).await;

    let (status, body) = h.get("/api/pnodes?network=testnet").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = h.get("/api/analytics/pod/x?startTime=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mainnet_ledger_outage_never_aborts_the_devnet_sweep() {
    let h = Harness::start(None).await;
    h.upstream.mainnet_ledger_down.store(true, Ordering::SeqCst);

    // No membership set seen yet: devnet goes unfiltered, mainnet cannot split.
    let body = h.collect().await;
    assert!(body["stats"]["devnet"]["error"].is_null());
    assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 3);
    assert_eq!(body["stats"]["mainnet"]["nodesProcessed"], 0);
    assert!(body["stats"]["mainnet"]["error"].is_string());

    h.upstream.mainnet_ledger_down.store(false, Ordering::SeqCst);
    h.clock.advance(31_000);
    let body = h.collect().await;
    assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 2);
    assert_eq!(body["stats"]["mainnet"]["nodesProcessed"], 1);

    // Once a set has been seen, it keeps filtering devnet through an outage.
    h.upstream.mainnet_ledger_down.store(true, Ordering::SeqCst);
    h.clock.advance(31_000);
    let body = h.collect().await;
    assert!(body["stats"]["devnet"]["error"].is_null());
    assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 2);
    assert_eq!(body["stats"]["devnet"]["podsProcessed"], 1);
    assert!(body["stats"]["mainnet"]["error"].is_string());
}

#[tokio::test]
async fn failed_or_slow_detail_fetch_degrades_only_that_node() {
    let h = Harness::start(None).await;

    for behaviour in [DetailBehaviour::Failing, DetailBehaviour::Slow] {
        h.set_details(behaviour);
        let body = h.collect().await;
        assert_eq!(body["stats"]["devnet"]["nodesProcessed"], 2);
        assert!(body["stats"]["devnet"]["error"].is_null());

        let (_, roster) = h.get("/api/pnodes?network=devnet&status=active").await;
        let node = &roster["data"][0];
        assert_eq!(node["pubkey"], DEV_PUBLIC);
        assert!(node["responseTimeMs"].is_null());
        assert!(node["details"].is_null());
        assert_eq!(node["scoreBreakdown"]["responseTime"], 0.0);
    }

    h.set_details(DetailBehaviour::Healthy);
    h.collect().await;
    let (_, roster) = h.get("/api/pnodes?network=devnet&status=active").await;
    assert!(roster["data"][0]["responseTimeMs"].is_u64());
}

#[tokio::test]
async fn uncached_roster_read_goes_back_upstream() {
    let h = Harness::start(None).await;

    let (_, cold) = h.get("/api/pnodes?network=devnet").await;
    assert_eq!(cold["cached"], false);
    assert_eq!(cold["count"], 2);
    assert_eq!(h.roster_calls(), 1);

    let (_, warm) = h.get("/api/pnodes?network=devnet").await;
    assert_eq!(warm["cached"], true);
    assert_eq!(h.roster_calls(), 1);

    // The roster cache is still fresh; a forced read bypasses it anyway.
    let (_, forced) = h.get("/api/pnodes?network=devnet&cache=false").await;
    assert_eq!(forced["cached"], false);
    assert_eq!(forced["count"], 2);
    assert_eq!(h.roster_calls(), 2);
}
