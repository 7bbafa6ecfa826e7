//! Metrics
//!
//! Prometheus text and JSON exports of HTTP counters, queue depth per status
//! and delivery outcome counters.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sh_models::QueueStats;
use sh_notifications::{CounterSnapshot, PoolCounters, QueueStore};
use tracing::{debug, info_span, warn, Instrument};

/// HTTP request counters
pub struct Metrics {
    pub http_requests_total: AtomicU64,
    pub http_requests_2xx: AtomicU64,
    pub http_requests_4xx: AtomicU64,
    pub http_requests_5xx: AtomicU64,
    pub http_request_duration_ms_total: AtomicU64,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_requests_2xx: AtomicU64::new(0),
            http_requests_4xx: AtomicU64::new(0),
            http_requests_5xx: AtomicU64::new(0),
            http_request_duration_ms_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an HTTP request
    pub fn record_request(&self, status: StatusCode, duration_ms: u64) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
        self.http_request_duration_ms_total
            .fetch_add(duration_ms, Ordering::Relaxed);

        let code = status.as_u16();
        if (200..300).contains(&code) {
            self.http_requests_2xx.fetch_add(1, Ordering::Relaxed);
        } else if (400..500).contains(&code) {
            self.http_requests_4xx.fetch_add(1, Ordering::Relaxed);
        } else if code >= 500 {
            self.http_requests_5xx.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Everything the metrics endpoints read from
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<Metrics>,
    pub queue: Arc<dyn QueueStore>,
    pub counters: Arc<PoolCounters>,
}

impl MetricsState {
    /// Queue stats, or `None` when the store cannot be read
    async fn queue_stats(&self) -> Option<QueueStats> {
        match self.queue.get_queue_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Failed to read queue stats for metrics");
                None
            }
        }
    }
}

fn metric(output: &mut String, name: &str, kind: &str, help: &str, samples: &[(&str, u64)]) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    for (labels, value) in samples {
        if labels.is_empty() {
            let _ = writeln!(output, "{} {}", name, value);
        } else {
            let _ = writeln!(output, "{}{{{}}} {}", name, labels, value);
        }
    }
}

/// Render the Prometheus text exposition
pub fn export_prometheus(
    metrics: &Metrics,
    stats: Option<&QueueStats>,
    counters: CounterSnapshot,
) -> String {
    let mut output = String::new();
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

    metric(
        &mut output,
        "http_requests_total",
        "counter",
        "Total number of HTTP requests",
        &[("", load(&metrics.http_requests_total))],
    );
    metric(
        &mut output,
        "http_requests_by_status",
        "counter",
        "HTTP requests by status code range",
        &[
            ("status=\"2xx\"", load(&metrics.http_requests_2xx)),
            ("status=\"4xx\"", load(&metrics.http_requests_4xx)),
            ("status=\"5xx\"", load(&metrics.http_requests_5xx)),
        ],
    );
    metric(
        &mut output,
        "http_request_duration_ms_total",
        "counter",
        "Total HTTP request duration in milliseconds",
        &[("", load(&metrics.http_request_duration_ms_total))],
    );

    if let Some(stats) = stats {
        let gauge = |n: i64| u64::try_from(n).unwrap_or(0);
        metric(
            &mut output,
            "notification_queue_items",
            "gauge",
            "Notification queue items by status",
            &[
                ("status=\"pending\"", gauge(stats.pending)),
                ("status=\"processing\"", gauge(stats.processing)),
                ("status=\"sent\"", gauge(stats.sent)),
                ("status=\"failed\"", gauge(stats.failed)),
            ],
        );
    }

    metric(
        &mut output,
        "notification_deliveries_total",
        "counter",
        "Delivery outcomes since process start",
        &[
            ("outcome=\"sent\"", counters.sent),
            ("outcome=\"retried\"", counters.retried),
            ("outcome=\"failed\"", counters.failed),
        ],
    );

    metric(
        &mut output,
        "uptime_seconds",
        "gauge",
        "Server uptime in seconds",
        &[("", metrics.uptime_seconds())],
    );

    output
}

/// Render the JSON export
pub fn export_json(
    metrics: &Metrics,
    stats: Option<&QueueStats>,
    counters: CounterSnapshot,
) -> serde_json::Value {
    serde_json::json!({
        "http": {
            "requests_total": metrics.http_requests_total.load(Ordering::Relaxed),
            "requests_2xx": metrics.http_requests_2xx.load(Ordering::Relaxed),
            "requests_4xx": metrics.http_requests_4xx.load(Ordering::Relaxed),
            "requests_5xx": metrics.http_requests_5xx.load(Ordering::Relaxed),
            "request_duration_ms_total": metrics.http_request_duration_ms_total.load(Ordering::Relaxed),
        },
        "queue": stats.map(|s| serde_json::json!({
            "pending": s.pending,
            "processing": s.processing,
            "sent": s.sent,
            "failed": s.failed,
            "total": s.total(),
        })),
        "deliveries": counters,
        "uptime_seconds": metrics.uptime_seconds(),
    })
}

/// Metrics middleware
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let response = next
        .run(request)
        .instrument(info_span!("http_request", %method, %uri))
        .await;

    let duration = start.elapsed();
    let status = response.status();

    debug!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    metrics.record_request(status, duration.as_millis() as u64);
    response
}

/// Handler for /metrics endpoint (Prometheus format)
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    let stats = state.queue_stats().await;
    let body = export_prometheus(&state.metrics, stats.as_ref(), state.counters.snapshot());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Handler for /metrics.json endpoint
pub async fn json_metrics(State(state): State<MetricsState>) -> axum::Json<serde_json::Value> {
    let stats = state.queue_stats().await;
    axum::Json(export_json(
        &state.metrics,
        stats.as_ref(),
        state.counters.snapshot(),
    ))
}
