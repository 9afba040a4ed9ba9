//! In-process fake gateway and fake evidence service

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;

pub const CONTROL_PLANE_ID: &str = "cp-0001";
pub const KONNECT_TOKEN: &str = "kpat_fake_token";
pub const DRATA_KEY: &str = "drata_fake_key";

struct FakeConsumer {
    id: &'static str,
    username: &'static str,
    custom_id: &'static str,
    key: &'static str,
    limit: Option<u32>,
}

static CONSUMERS: [FakeConsumer; 2] = [
    FakeConsumer {
        id: "c-free",
        username: "free-user",
        custom_id: "tier_free",
        key: "free-trial-key",
        limit: Some(5),
    },
    FakeConsumer {
        id: "c-pro",
        username: "pro-user",
        custom_id: "tier_pro",
        key: "pro-key",
        limit: Some(60),
    },
];

static UNLIMITED: FakeConsumer = FakeConsumer {
    id: "c-partner",
    username: "partner-user",
    custom_id: "tier_partner",
    key: "partner-key",
    limit: None,
};

/// Gateway behavior knobs
#[derive(Clone, Default)]
pub struct GatewayOptions {
    /// Register a consumer with no rate limit
    pub unlimited_consumer: bool,
    /// Name reported for the control plane
    pub control_plane_name: Option<String>,
}

struct GatewayState {
    consumers: Vec<&'static FakeConsumer>,
    control_plane_name: String,
    counters: Mutex<HashMap<&'static str, u32>>,
}

/// Handle to a spawned server; shuts it down on drop
pub struct ServerHandle {
    pub base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn spawn(app: Router) -> ServerHandle {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    ServerHandle {
        base_url: format!("http://{addr}"),
        shutdown: Some(shutdown_tx),
    }
}

/// Serve both the control-plane admin API and the data plane
pub async fn spawn_gateway(options: GatewayOptions) -> ServerHandle {
    let mut registered: Vec<&'static FakeConsumer> = CONSUMERS.iter().collect();
    if options.unlimited_consumer {
        registered.push(&UNLIMITED);
    }

    let state = Arc::new(GatewayState {
        consumers: registered,
        control_plane_name: options
            .control_plane_name
            .unwrap_or_else(|| gatecheck::DEFAULT_CONTROL_PLANE_NAME.to_string()),
        counters: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/api/hello", get(hello))
        .route("/api/health", get(health))
        .route("/api/whoami", get(whoami))
        .route("/v2/control-planes", get(control_planes))
        .route("/v2/control-planes/:id/core-entities/plugins", get(list_plugins))
        .route("/v2/control-planes/:id/core-entities/consumers", get(list_consumers))
        .with_state(state);
    spawn(app).await
}

fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<&'static FakeConsumer, Response> {
    let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "No API key found in request"})),
        )
            .into_response());
    };
    state
        .consumers
        .iter()
        .copied()
        .find(|c| c.key == key)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "Invalid authentication credentials"})),
            )
                .into_response()
        })
}

fn identified(consumer: &FakeConsumer, body: Value) -> Response {
    (
        StatusCode::OK,
        [
            ("x-consumer-id", consumer.id),
            ("x-consumer-username", consumer.username),
            ("x-consumer-custom-id", consumer.custom_id),
        ],
        Json(body),
    )
        .into_response()
}

/// Key-auth followed by the consumer's minute limit, on every route
fn admit(state: &GatewayState, headers: &HeaderMap) -> Result<&'static FakeConsumer, Response> {
    let consumer = authenticate(state, headers)?;
    if let Some(limit) = consumer.limit {
        let mut counters = state.counters.lock().unwrap();
        let count = counters.entry(consumer.id).or_insert(0);
        *count += 1;
        if *count > limit {
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                [("x-ratelimit-remaining-minute", "0")],
                Json(json!({"message": "API rate limit exceeded"})),
            )
                .into_response());
        }
    }
    Ok(consumer)
}

async fn hello(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    match admit(&state, &headers) {
        Ok(consumer) => identified(consumer, json!({"message": "hello"})),
        Err(rejection) => rejection,
    }
}

async fn health(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    match admit(&state, &headers) {
        Ok(consumer) => identified(consumer, json!({"status": "ok"})),
        Err(rejection) => rejection,
    }
}

async fn whoami(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    match admit(&state, &headers) {
        Ok(consumer) => identified(
            consumer,
            json!({"consumer": {
                "id": consumer.id,
                "username": consumer.username,
                "custom_id": consumer.custom_id,
            }}),
        ),
        Err(rejection) => rejection,
    }
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {KONNECT_TOKEN}"))
}

async fn control_planes(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"data": [
        {"id": "cp-other", "name": "some-other-control-plane"},
        {"id": CONTROL_PLANE_ID, "name": state.control_plane_name},
    ]}))
    .into_response()
}

/// Two pages: key-auth plus the first rate-limit, then the rest
async fn list_plugins(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&headers) || id != CONTROL_PLANE_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    let mut all = vec![json!({
        "id": "plugin-key-auth",
        "name": "key-auth",
        "enabled": true,
        "config": {"key_names": ["X-API-Key"], "hide_credentials": true},
        "consumer": null,
        "route": null,
        "service": null,
    })];
    for consumer in state.consumers.iter().filter(|c| c.limit.is_some()) {
        all.push(json!({
            "id": format!("plugin-rl-{}", consumer.id),
            "name": "rate-limiting",
            "enabled": true,
            "config": {"minute": consumer.limit, "policy": "local"},
            "consumer": {"id": consumer.id},
            "route": null,
            "service": null,
        }));
    }

    match query.get("offset").map(String::as_str) {
        None => Json(json!({"data": all[..2].to_vec(), "offset": "page-2"})).into_response(),
        Some("page-2") => Json(json!({"data": all[2..].to_vec(), "offset": null})).into_response(),
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn list_consumers(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&headers) || id != CONTROL_PLANE_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    let data: Vec<Value> = state
        .consumers
        .iter()
        .map(|c| json!({"id": c.id, "username": c.username, "custom_id": c.custom_id}))
        .collect();
    Json(json!({"data": data, "offset": null})).into_response()
}

/// One submission as seen by the fake evidence service
#[derive(Debug, Clone)]
pub struct Submission {
    pub monitor: String,
    pub authorization: Option<String>,
    pub idempotency_key: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct EvidenceState {
    submissions: Mutex<Vec<Submission>>,
    fail_first: Mutex<u32>,
}

/// Fake evidence service that records every hit
pub struct EvidenceService {
    pub handle: ServerHandle,
    state: Arc<EvidenceState>,
}

impl EvidenceService {
    /// Every request received, including rejected ones
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().unwrap().clone()
    }
}

/// Serve the evidence API; the first `fail_first` requests get a 503
pub async fn spawn_evidence_service(fail_first: u32) -> EvidenceService {
    let state = Arc::new(EvidenceState {
        submissions: Mutex::new(Vec::new()),
        fail_first: Mutex::new(fail_first),
    });
    let app = Router::new()
        .route("/public/monitors/:monitor/evidence", post(submit_evidence))
        .with_state(state.clone());
    EvidenceService {
        handle: spawn(app).await,
        state,
    }
}

async fn submit_evidence(
    State(state): State<Arc<EvidenceState>>,
    Path(monitor): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.submissions.lock().unwrap().push(Submission {
        monitor,
        authorization: header("authorization"),
        idempotency_key: header("idempotency-key"),
        body,
    });

    let mut remaining = state.fail_first.lock().unwrap();
    if *remaining > 0 {
        *remaining -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }
    (StatusCode::CREATED, Json(json!({"status": "accepted"}))).into_response()
}

/// Writer whose contents can be inspected after the run
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configuration pointing at the fake servers
pub fn run_config(gateway: &ServerHandle, evidence: Option<&EvidenceService>) -> gatecheck::RunConfig {
    run_config_with(gateway, evidence, &[])
}

/// Configuration pointing at the fake servers, with some variables replaced
pub fn run_config_with(
    gateway: &ServerHandle,
    evidence: Option<&EvidenceService>,
    overrides: &[(&'static str, &str)],
) -> gatecheck::RunConfig {
    let mut vars: HashMap<&'static str, String> = HashMap::new();
    vars.insert("KONNECT_TOKEN", KONNECT_TOKEN.to_string());
    vars.insert("KONNECT_API_BASE", gateway.base_url.clone());
    vars.insert("DATAPLANE_URL", gateway.base_url.clone());
    vars.insert("WAIT_FOR_WINDOW", "false".to_string());
    vars.insert("PROBE_TIMEOUT", "5s".to_string());
    if let Some(service) = evidence {
        vars.insert("DRATA_API_KEY", DRATA_KEY.to_string());
        vars.insert("DRATA_API_BASE", service.handle.base_url.clone());
    }
    for (name, value) in overrides {
        vars.insert(*name, value.to_string());
    }
    gatecheck::RunConfig::from_lookup(move |name: &str| vars.get(name).cloned()).unwrap()
}
