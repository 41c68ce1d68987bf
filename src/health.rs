//! Health checks and the non-TLS admin surface
//!
//! Serves `/admin`, `/live`, `/ready` and the metrics endpoint. Liveness is
//! backed by a background prober that dials the API server on a fixed-rate
//! ticker and publishes its most recent result into a single-slot channel;
//! readers never block and never trigger a dial. Readiness dials
//! synchronously per request. Before the first probe completes, liveness
//! reports a distinguished "no data yet" failure so the pod is not
//! considered live until connectivity has been demonstrated once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::info;

use crate::metrics::WebhookMetrics;

/// Failure reported by a periodic probe before its first result lands
pub const NO_DATA: &str = "no data yet";

/// Outcome of a single health check
pub type CheckResult = Result<(), String>;

/// A TCP connectivity check against a `host:port` endpoint
#[derive(Debug, Clone)]
pub struct TcpCheck {
    addr: String,
    timeout: Duration,
}

impl TcpCheck {
    /// Create a check that dials `addr` with the given timeout
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Dial once
    pub async fn run(&self) -> CheckResult {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("dial {}: {}", self.addr, e)),
            Err(_) => Err(format!(
                "dial {} timed out after {:?}",
                self.addr, self.timeout
            )),
        }
    }
}

/// Run `check` forever on a fixed-rate ticker, publishing the latest result
///
/// The returned receiver holds [`NO_DATA`] until the first probe completes.
/// At most one probe is in flight (a single task awaits each dial before the
/// next tick), and readers observe the latest result without blocking. The
/// task exits when every receiver is dropped.
pub fn spawn_periodic(check: TcpCheck, interval: Duration) -> watch::Receiver<CheckResult> {
    let (tx, rx) = watch::channel(Err(NO_DATA.to_string()));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            // the first tick fires immediately
            ticker.tick().await;
            let result = check.run().await;
            if tx.send(result).is_err() {
                return;
            }
        }
    });
    rx
}

/// How a named check is evaluated
pub enum Probe {
    /// Read the latest result of a background prober
    Periodic(watch::Receiver<CheckResult>),
    /// Dial at request time
    OnDemand(TcpCheck),
}

impl Probe {
    async fn status(&self) -> CheckResult {
        match self {
            Probe::Periodic(rx) => rx.borrow().clone(),
            Probe::OnDemand(check) => check.run().await,
        }
    }
}

/// Named liveness and readiness checks
///
/// Every liveness check is also evaluated for readiness, mirroring the
/// semantics of the upstream healthcheck handler.
#[derive(Default)]
pub struct HealthRegistry {
    liveness: Vec<(String, Probe)>,
    readiness: Vec<(String, Probe)>,
}

impl HealthRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a liveness check; failure means the pod should restart
    pub fn add_liveness_check(&mut self, name: impl Into<String>, probe: Probe) {
        self.liveness.push((name.into(), probe));
    }

    /// Register a readiness check; failure means traffic should stop
    pub fn add_readiness_check(&mut self, name: impl Into<String>, probe: Probe) {
        self.readiness.push((name.into(), probe));
    }

    /// Evaluate liveness checks
    pub async fn live(&self) -> (bool, BTreeMap<String, String>) {
        let mut healthy = true;
        let mut results = BTreeMap::new();
        Self::collect(&self.liveness, &mut healthy, &mut results).await;
        (healthy, results)
    }

    /// Evaluate readiness checks, including every liveness check
    pub async fn ready(&self) -> (bool, BTreeMap<String, String>) {
        let mut healthy = true;
        let mut results = BTreeMap::new();
        Self::collect(&self.readiness, &mut healthy, &mut results).await;
        Self::collect(&self.liveness, &mut healthy, &mut results).await;
        (healthy, results)
    }

    async fn collect(
        checks: &[(String, Probe)],
        healthy: &mut bool,
        results: &mut BTreeMap<String, String>,
    ) {
        for (name, probe) in checks {
            match probe.status().await {
                Ok(()) => {
                    results.insert(name.clone(), "OK".to_string());
                }
                Err(e) => {
                    *healthy = false;
                    results.insert(name.clone(), e);
                }
            }
        }
    }
}

/// Shared state for the admin router
pub struct AdminState {
    /// Registered health checks
    pub health: HealthRegistry,
    /// Metric registry exposed on the metrics endpoint
    pub metrics: Arc<WebhookMetrics>,
}

/// Build the non-TLS router: `/admin`, `/live`, `/ready`, and the metrics
/// endpoint at the configured path
pub fn admin_router(state: Arc<AdminState>, metrics_endpoint: &str) -> Router {
    info!(endpoint = %metrics_endpoint, "serving metrics");
    Router::new()
        .route("/admin", get(admin_handler))
        .route("/live", get(live_handler))
        .route("/ready", get(ready_handler))
        .route(metrics_endpoint, get(metrics_handler))
        .with_state(state)
}

async fn admin_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "GOOD\r\n")
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    full: Option<String>,
}

async fn live_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let (healthy, results) = state.health.live().await;
    health_response(healthy, &results, query.full.as_deref() == Some("1"))
}

async fn ready_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let (healthy, results) = state.health.ready().await;
    health_response(healthy, &results, query.full.as_deref() == Some("1"))
}

/// Render a health endpoint response
///
/// Kubernetes only looks at the status code, so the body stays `{}` unless
/// `?full=1` asks for the per-check map.
fn health_response(healthy: bool, results: &BTreeMap<String, String>, full: bool) -> Response {
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = if full {
        serde_json::to_string_pretty(results).unwrap_or_else(|_| "{}".to_string())
    } else {
        "{}".to_string()
    };
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("could not encode metrics: {e}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn tcp_check_succeeds_against_listener() {
        let (_listener, addr) = local_listener().await;
        let check = TcpCheck::new(addr, Duration::from_millis(500));
        assert!(check.run().await.is_ok());
    }

    #[tokio::test]
    async fn tcp_check_fails_against_closed_port() {
        let (listener, addr) = local_listener().await;
        drop(listener);
        let check = TcpCheck::new(addr, Duration::from_millis(500));
        assert!(check.run().await.is_err());
    }

    #[tokio::test]
    async fn periodic_probe_starts_with_no_data() {
        let (_listener, addr) = local_listener().await;
        // long interval: the initial state must be observable before the
        // first probe publishes
        let rx = spawn_periodic(
            TcpCheck::new(addr, Duration::from_millis(100)),
            Duration::from_secs(3600),
        );
        match &*rx.borrow() {
            Err(e) => assert_eq!(e, NO_DATA),
            Ok(()) => {
                // the first immediate tick may already have landed; that is
                // also a valid observation
            }
        };
    }

    #[tokio::test]
    async fn periodic_probe_publishes_latest_result() {
        let (_listener, addr) = local_listener().await;
        let mut rx = spawn_periodic(
            TcpCheck::new(addr, Duration::from_millis(500)),
            Duration::from_secs(3600),
        );
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("probe publishes within the timeout")
            .unwrap();
        assert!(rx.borrow().is_ok());
    }

    #[tokio::test]
    async fn registry_reports_failures() {
        let (listener, open_addr) = local_listener().await;
        let (closed, closed_addr) = local_listener().await;
        drop(closed);

        let mut registry = HealthRegistry::new();
        registry.add_liveness_check(
            "apiserver connectivity",
            Probe::OnDemand(TcpCheck::new(open_addr, Duration::from_millis(500))),
        );
        registry.add_readiness_check(
            "upstream connectivity",
            Probe::OnDemand(TcpCheck::new(closed_addr, Duration::from_millis(500))),
        );

        let (live, live_results) = registry.live().await;
        assert!(live);
        assert_eq!(live_results["apiserver connectivity"], "OK");

        // readiness aggregates readiness and liveness checks
        let (ready, ready_results) = registry.ready().await;
        assert!(!ready);
        assert_eq!(ready_results.len(), 2);
        assert_eq!(ready_results["apiserver connectivity"], "OK");
        assert_ne!(ready_results["upstream connectivity"], "OK");

        drop(listener);
    }

    #[tokio::test]
    async fn unprobed_liveness_is_not_live() {
        let (tx, rx) = watch::channel(Err(NO_DATA.to_string()));
        let mut registry = HealthRegistry::new();
        registry.add_liveness_check("apiserver connectivity", Probe::Periodic(rx));

        let (live, results) = registry.live().await;
        assert!(!live);
        assert_eq!(results["apiserver connectivity"], NO_DATA);

        // once the prober publishes a success, liveness follows
        tx.send(Ok(())).unwrap();
        let (live, _) = registry.live().await;
        assert!(live);
    }

    #[test]
    fn health_response_body_is_empty_unless_full() {
        let mut results = BTreeMap::new();
        results.insert("check".to_string(), "OK".to_string());

        let brief = health_response(true, &results, false);
        assert_eq!(brief.status(), StatusCode::OK);

        let failed = health_response(false, &results, false);
        assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
