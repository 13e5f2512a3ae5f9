use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all persona-server metrics
const PREFIX: &str = "persona";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Job Metrics
    pub static ref JOBS_CREATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_created_total"), "Total asynchronous jobs created"),
        &["kind"]
    ).expect("Failed to create jobs_created_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs that reached a terminal state"),
        &["kind", "status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Time from job pickup to terminal state"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 240.0, 600.0]),
        &["kind"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOBS_EVICTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_jobs_evicted_total"),
        "Jobs removed by the retention sweeper"
    ).expect("Failed to create jobs_evicted_total metric");

    pub static ref JOB_STORE_SIZE: Gauge = Gauge::new(
        format!("{PREFIX}_job_store_size"),
        "Number of jobs currently held in memory"
    ).expect("Failed to create job_store_size metric");

    pub static ref SYNC_TIMEOUTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_sync_timeouts_total"), "Synchronous image calls that hit the ceiling"),
        &["kind"]
    ).expect("Failed to create sync_timeouts_total metric");

    // Relay Metrics
    pub static ref RELAY_SESSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_relay_sessions_total"), "Chat stream relays by outcome"),
        &["outcome"]
    ).expect("Failed to create relay_sessions_total metric");

    pub static ref RELAY_EVENTS_FORWARDED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_relay_events_forwarded_total"),
        "Event lines forwarded to clients"
    ).expect("Failed to create relay_events_forwarded_total metric");

    pub static ref REPLIES_PERSISTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_replies_persisted_total"),
        "Assistant replies appended to conversations"
    ).expect("Failed to create replies_persisted_total metric");

    // Upstream Metrics
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_errors_total"), "Errors returned by generation APIs"),
        &["upstream"]
    ).expect("Failed to create upstream_errors_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_EVICTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_STORE_SIZE.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_TIMEOUTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RELAY_SESSIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RELAY_EVENTS_FORWARDED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REPLIES_PERSISTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_job_created(kind: &str) {
    JOBS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_job_finished(kind: &str, status: &str, duration: Duration) {
    JOBS_FINISHED_TOTAL.with_label_values(&[kind, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a retention sweep pass
pub fn record_sweep(evicted: usize, remaining: usize) {
    JOBS_EVICTED_TOTAL.inc_by(evicted as f64);
    JOB_STORE_SIZE.set(remaining as f64);
}

pub fn set_job_store_size(size: usize) {
    JOB_STORE_SIZE.set(size as f64);
}

pub fn record_sync_timeout(kind: &str) {
    SYNC_TIMEOUTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record how a relay session ended: "completed", "disconnected",
/// "upstream_error" or "rejected".
pub fn record_relay_session(outcome: &str) {
    RELAY_SESSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_event_forwarded() {
    RELAY_EVENTS_FORWARDED_TOTAL.inc();
}

pub fn record_reply_persisted() {
    REPLIES_PERSISTED_TOTAL.inc();
}

pub fn record_upstream_error(upstream: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[upstream]).inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|s| s.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        return;
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
