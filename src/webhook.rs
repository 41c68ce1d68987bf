//! Admission dispatcher
//!
//! Handles AdmissionReview requests on the mutation endpoint: decodes the
//! envelope, runs the patch builder against the admitted object, and
//! returns an AdmissionReview whose response carries the JSON Patch. Every
//! decoded request produces exactly one response with the request's UID;
//! the response is `allowed` unless the review itself could not be decoded
//! or patch construction failed, in which case the response carries the
//! error message and no patch.
//!
//! The decoded document flows through as a local value; the shared state is
//! immutable config plus concurrency-safe metrics, so any number of
//! requests may be in flight.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics::WebhookMetrics;
use crate::patch::build_patch;

/// Shared state for the mutation endpoint
///
/// Loaded once at startup and read-only afterwards.
pub struct WebhookState {
    /// Decoration config
    pub config: Config,
    /// Annotation key appended to each discovered path
    pub annotation_key: String,
    /// Webhook metrics, shared with the admin server
    pub metrics: Arc<WebhookMetrics>,
}

/// Build the TLS-side router: `POST /mutate` with request instrumentation
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_metrics,
        ))
        .with_state(state)
}

/// Record in-flight count, latency, status and response size per request
async fn track_metrics(
    State(state): State<Arc<WebhookState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    state.metrics.in_flight.inc();
    let response = next.run(request).await;
    state.metrics.in_flight.dec();

    state.metrics.duration.observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .requests
        .with_label_values(&[response.status().as_str(), &method])
        .inc();

    // buffer the body to observe its size before it goes out
    let (parts, body) = response.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            state.metrics.response_size.observe(bytes.len() as f64);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            error!(error = %e, "could not write response body");
            state.metrics.write_errors.inc();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not write response: {e}"),
            )
                .into_response()
        }
    }
}

/// Handle a mutation request
///
/// Content type and body checks come first so malformed traffic is counted
/// and rejected without touching the admission machinery.
async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        warn!(content_type = %content_type, "rejecting request with unexpected content type");
        state.metrics.invalid_content_type.inc();
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response();
    }

    if body.is_empty() {
        warn!("rejecting request with empty body");
        state.metrics.bad_requests.inc();
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "could not decode admission review");
            state.metrics.decode_errors.inc();
            return respond(&state, AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "admission review carried no request");
            state.metrics.decode_errors.inc();
            return respond(&state, AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate(&state, &request);
    respond(&state, response.into_review())
}

/// Main mutation process: resolve the configured selectors against the
/// admitted object and wrap the resulting patch in an AdmissionResponse
pub fn mutate(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let username = request.user_info.username.clone().unwrap_or_default();
    let resource = &request.resource.resource;

    info!(
        kind = %request.kind.kind,
        resource = %resource,
        namespace = ?request.namespace,
        name = %request.name,
        uid = %request.uid,
        operation = ?request.operation,
        username = %username,
        "admission review"
    );

    let doc = match &request.object {
        Some(object) => match serde_json::to_value(object) {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, "could not decode admitted object");
                return AdmissionResponse::from(request).deny(e.to_string());
            }
        },
        None => {
            error!(uid = %request.uid, "admission request carried no object");
            return AdmissionResponse::from(request).deny("request contains no object");
        }
    };

    let operations = match build_patch(
        &username,
        resource,
        &doc,
        &state.config,
        &state.annotation_key,
    ) {
        Ok(operations) => operations,
        Err(e) => {
            error!(error = %e, uid = %request.uid, "could not build patch");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    info!(uid = %request.uid, operations = operations.len(), "built patch");
    match AdmissionResponse::from(request).with_patch(json_patch::Patch(operations)) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, uid = %request.uid, "could not serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Encode the review; counts success and encode failures
fn respond(state: &WebhookState, review: AdmissionReview<DynamicObject>) -> Response {
    match serde_json::to_vec(&review) {
        Ok(body) => {
            state.metrics.success_responses.inc();
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "could not encode admission response");
            state.metrics.encode_errors.inc();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not encode response: {e}"),
            )
                .into_response()
        }
    }
}
