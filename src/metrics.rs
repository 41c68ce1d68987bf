//! Prometheus metrics for the webhook
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `in_flight_requests` | Gauge | |
//! | `requests_total` | Counter | `code`, `method` |
//! | `request_duration_seconds` | Histogram | |
//! | `response_size_bytes` | Histogram | |
//! | `admissionRequests_server_bad_requests_count` | Counter | |
//! | `admissionRequests_server_invalid_content_type_count` | Counter | |
//! | `admissionRequests_server_decode_error_count` | Counter | |
//! | `admissionResponse_server_encode_error_count` | Counter | |
//! | `admissionResponse_server_response_write_error_count` | Counter | |
//! | `admissionResponse_server_success_response_count` | Counter | |
//!
//! All metrics are registered on an instance-held registry; the struct is
//! `Clone`-free and shared behind an `Arc`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::Result;

const REQUEST_NAMESPACE: &str = "admissionRequests";
const RESPONSE_NAMESPACE: &str = "admissionResponse";
const SUBSYSTEM: &str = "server";

/// Expected request latency buckets, in seconds
const DURATION_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Admission responses are small; buckets are in bytes
const RESPONSE_SIZE_BUCKETS: &[f64] = &[200.0, 500.0, 900.0, 1500.0];

/// All webhook metrics plus the registry that exposes them
pub struct WebhookMetrics {
    registry: Registry,

    /// Requests currently being served by the mutation handler
    pub in_flight: IntGauge,
    /// Requests by response code and method
    pub requests: IntCounterVec,
    /// Latency of mutation requests
    pub duration: Histogram,
    /// Size of mutation responses
    pub response_size: Histogram,

    /// Requests rejected for an empty body
    pub bad_requests: IntCounter,
    /// Requests rejected for a content type other than `application/json`
    pub invalid_content_type: IntCounter,
    /// AdmissionReview envelopes that failed to decode
    pub decode_errors: IntCounter,
    /// Responses that failed to encode
    pub encode_errors: IntCounter,
    /// Responses that failed to reach the client
    pub write_errors: IntCounter,
    /// Successfully written admission responses
    pub success_responses: IntCounter,
}

impl WebhookMetrics {
    /// Create the metrics and register them on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let in_flight = IntGauge::with_opts(Opts::new(
            "in_flight_requests",
            "A gauge of requests currently being served by the wrapped handler.",
        ))?;
        registry.register(Box::new(in_flight.clone()))?;

        let requests = IntCounterVec::new(
            Opts::new(
                "requests_total",
                "A counter for requests to the wrapped handler.",
            ),
            &["code", "method"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "request_duration_seconds",
                "A histogram of latencies for requests.",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(duration.clone()))?;

        let response_size = Histogram::with_opts(
            HistogramOpts::new(
                "response_size_bytes",
                "A histogram of response sizes for requests.",
            )
            .buckets(RESPONSE_SIZE_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(response_size.clone()))?;

        let bad_requests = IntCounter::with_opts(
            Opts::new(
                "bad_requests_count",
                "The number of requests that generate an http bad request.",
            )
            .namespace(REQUEST_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(bad_requests.clone()))?;

        let invalid_content_type = IntCounter::with_opts(
            Opts::new(
                "invalid_content_type_count",
                "The number of requests with an invalid content type.",
            )
            .namespace(REQUEST_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(invalid_content_type.clone()))?;

        let decode_errors = IntCounter::with_opts(
            Opts::new(
                "decode_error_count",
                "The number of request decode errors.",
            )
            .namespace(REQUEST_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(decode_errors.clone()))?;

        let encode_errors = IntCounter::with_opts(
            Opts::new(
                "encode_error_count",
                "The number of errors occurred encoding the response.",
            )
            .namespace(RESPONSE_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(encode_errors.clone()))?;

        let write_errors = IntCounter::with_opts(
            Opts::new(
                "response_write_error_count",
                "The number of errors occurred writing the response.",
            )
            .namespace(RESPONSE_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(write_errors.clone()))?;

        let success_responses = IntCounter::with_opts(
            Opts::new(
                "success_response_count",
                "The number of successful admission responses.",
            )
            .namespace(RESPONSE_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(success_responses.clone()))?;

        Ok(Self {
            registry,
            in_flight,
            requests,
            duration,
            response_size,
            bad_requests,
            invalid_content_type,
            decode_errors,
            encode_errors,
            write_errors,
            success_responses,
        })
    }

    /// Encode all metrics in Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(crate::Error::from)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::metrics(e.to_string()))
    }
}
