//! Prometheus metrics HTTP endpoint
//!
//! Exposes counter metrics in Prometheus text format at /metrics and the
//! latest aggregate snapshot as JSON at /snapshot.
//! Uses hyper for the HTTP server.

use crate::domain::transit::AggregateSnapshot;
use crate::domain::types::VehicleClass;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, snapshot: &AggregateSnapshot, site_id: &str) -> String {
    let summary = metrics.scrape();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, site_id, &summary);
    write_transit_metrics(&mut output, site_id, &summary);
    write_class_metrics(&mut output, site_id, snapshot);

    output
}

fn write_frame_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "vehicle_frames_total",
        "Total frames processed",
        MetricType::Counter,
        site,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP vehicle_frames_per_sec Frames processed per second since start");
    let _ = writeln!(output, "# TYPE vehicle_frames_per_sec gauge");
    let _ = writeln!(output, "vehicle_frames_per_sec{{site=\"{site}\"}} {:.2}", summary.frames_per_sec);

    write_histogram(
        output,
        "vehicle_frame_latency_us",
        "Frame processing latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.latency_sum_us,
    );
    write_metric(
        output,
        "vehicle_frame_latency_p99_us",
        "99th percentile frame latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );

    write_metric(
        output,
        "vehicle_regions_total",
        "Detection regions received",
        MetricType::Counter,
        site,
        summary.regions_total,
    );
    write_metric(
        output,
        "vehicle_regions_kept_total",
        "Detection regions above the area threshold",
        MetricType::Counter,
        site,
        summary.regions_kept_total,
    );
    write_metric(
        output,
        "vehicle_feed_lines_skipped_total",
        "Malformed feed lines skipped",
        MetricType::Counter,
        site,
        summary.feed_lines_skipped_total,
    );
}

fn write_transit_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "vehicle_counted_total",
        "Vehicles registered at the counting line",
        MetricType::Counter,
        site,
        summary.vehicles_counted_total,
    );
    write_metric(
        output,
        "vehicle_transits_completed_total",
        "Transits matched at the speed line",
        MetricType::Counter,
        site,
        summary.transits_completed_total,
    );
    write_metric(
        output,
        "vehicle_transits_expired_total",
        "Transits evicted without a speed measurement",
        MetricType::Counter,
        site,
        summary.transits_expired_total,
    );
    write_metric(
        output,
        "vehicle_speed_triggers_unmatched_total",
        "Speed line triggers with no pending transit",
        MetricType::Counter,
        site,
        summary.speed_triggers_unmatched_total,
    );
    write_metric(
        output,
        "vehicle_egress_dropped_total",
        "Egress records dropped due to channel full",
        MetricType::Counter,
        site,
        summary.egress_dropped_total,
    );
}

fn write_class_metrics(output: &mut String, site: &str, snapshot: &AggregateSnapshot) {
    write_metric(
        output,
        "vehicle_pending_transits",
        "Transits waiting for the speed line",
        MetricType::Gauge,
        site,
        snapshot.pending as u64,
    );

    let _ = writeln!(output, "# HELP vehicle_class_count Confirmed vehicles per size class");
    let _ = writeln!(output, "# TYPE vehicle_class_count gauge");
    for class in VehicleClass::ALL {
        let agg = snapshot.class(class);
        let _ = writeln!(output, "vehicle_class_count{{site=\"{site}\",class=\"{class}\"}} {}", agg.count);
    }

    let _ = writeln!(output, "# HELP vehicle_class_average_kmh Average measured speed per size class");
    let _ = writeln!(output, "# TYPE vehicle_class_average_kmh gauge");
    for class in VehicleClass::ALL {
        let agg = snapshot.class(class);
        let _ = writeln!(
            output,
            "vehicle_class_average_kmh{{site=\"{site}\",class=\"{class}\"}} {:.3}",
            agg.average_kmh
        );
    }
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
    snapshot: watch::Receiver<AggregateSnapshot>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &metrics, &site_id, &snapshot))
}

fn route(
    method: &Method,
    path: &str,
    metrics: &Metrics,
    site_id: &str,
    snapshot: &watch::Receiver<AggregateSnapshot>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            let current = *snapshot.borrow();
            let body = format_prometheus_metrics(metrics, &current, site_id);
            text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        (&Method::GET, "/snapshot") => {
            let current = *snapshot.borrow();
            match serde_json::to_string(&current) {
                Ok(body) => text_response(StatusCode::OK, "application/json", body),
                Err(e) => {
                    error!(error = %e, "snapshot_serialize_failed");
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
                }
            }
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    snapshot: watch::Receiver<AggregateSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();
                        let snapshot = snapshot.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                let snapshot = snapshot.clone();
                                async move { handle_request(req, metrics, site_id, snapshot).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
