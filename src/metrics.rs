use axum::{http::StatusCode, response::Response, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

// Global metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();

    registry.register(Box::new(DECISIONS_TOTAL.clone())).unwrap();
    registry.register(Box::new(BANS_TOTAL.clone())).unwrap();
    registry.register(Box::new(PAYLOAD_DETECTIONS.clone())).unwrap();
    registry.register(Box::new(ANOMALY_DETECTIONS.clone())).unwrap();
    registry.register(Box::new(EVALUATION_DURATION.clone())).unwrap();
    registry.register(Box::new(API_RATE_LIMITED.clone())).unwrap();
    registry.register(Box::new(BANNED_ADDRESSES.clone())).unwrap();
    registry.register(Box::new(TRACKED_ADDRESSES.clone())).unwrap();

    registry
});

pub static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatewatch_decisions_total", "Evaluations by decision"),
        &["decision"],
    )
    .expect("metric can be created")
});

pub static BANS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("gatewatch_bans_total", "Total number of bans created")
        .expect("metric can be created")
});

pub static PAYLOAD_DETECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatewatch_payload_detections_total", "Malicious payloads by attack type"),
        &["attack_type"],
    )
    .expect("metric can be created")
});

pub static ANOMALY_DETECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatewatch_anomaly_detections_total", "Behavioral anomalies by type"),
        &["anomaly_type"],
    )
    .expect("metric can be created")
});

pub static EVALUATION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("gatewatch_evaluation_duration_seconds", "Evaluation duration in seconds")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .expect("metric can be created")
});

pub static API_RATE_LIMITED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatewatch_api_rate_limited_total", "API calls rejected by the rate limiter"),
        &["endpoint"],
    )
    .expect("metric can be created")
});

pub static BANNED_ADDRESSES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("gatewatch_banned_addresses", "Number of live bans")
        .expect("metric can be created")
});

pub static TRACKED_ADDRESSES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("gatewatch_tracked_addresses", "Number of addresses with activity records")
        .expect("metric can be created")
});

pub fn create_metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families)
}

async fn metrics_handler() -> Result<Response<String>, StatusCode> {
    match render() {
        Ok(output) => {
            let response = Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4")
                .body(output)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(response)
        }
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
