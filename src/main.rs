//! Vehicle counter - counts vehicles and measures their speed between two lines
//!
//! Reads a region feed produced by the foreground extractor, runs the
//! counting pipeline frame by frame and writes counts and transits to a
//! JSONL egress file.
//!
//! Module structure:
//! - `domain/` - Geometry, regions, classes and transit records
//! - `io/` - External interfaces (region feed, egress, Prometheus)
//! - `services/` - Counting pipeline (gates, analyzer, estimator, counter)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use vehicle_counter::infra::{Config, Metrics};
use vehicle_counter::io::{create_egress_channel, new_run_id, Egress, FeedReader};
use vehicle_counter::services::{RunParams, VehicleCounter};

/// Vehicle counter - line crossing counts and transit speeds
#[derive(Parser, Debug)]
#[command(name = "vehicle-counter", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Region feed to read (overrides feed.file)
    #[arg(short, long)]
    feed: Option<String>,

    /// Egress file to write (overrides egress.file)
    #[arg(short, long)]
    egress: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-frame detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let started_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    info!(started_at = %started_at, "vehicle-counter starting");

    let mut config = Config::load_from_path(&args.config);
    if let Some(ref feed) = args.feed {
        config = config.with_feed_file(feed);
    }
    if let Some(ref egress) = args.egress {
        config = config.with_egress_file(egress);
    }
    config.validate().context("invalid configuration")?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        area_threshold = %config.area_threshold(),
        vehicle_size_threshold = %config.vehicle_size_threshold(),
        line_distance_m = %config.line_distance_m(),
        feed_file = %config.feed_file(),
        feed_realtime = %config.feed_realtime(),
        egress_file = %config.egress_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    // Frame rate comes from the feed, so the feed is opened before anything runs
    let feed = FeedReader::open(config.feed_file()).await?.with_metrics(metrics.clone());
    let fps = feed.header().fps;
    let params = RunParams::new(fps, config.line_distance_m()).context("invalid run parameters")?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Egress writer fed by a bounded channel
    let run_id = new_run_id();
    let (egress_sender, egress_rx) = create_egress_channel(1000);
    let egress = Egress::new(config.egress_file(), &run_id, config.site_id());
    let egress_handle = tokio::spawn(egress.run(egress_rx));

    let mut counter =
        VehicleCounter::new(&config, params, metrics.clone(), Some(egress_sender.with_metrics(metrics.clone())));
    info!(run = %run_id, "counter_created");

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_snapshot = counter.subscribe();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = vehicle_counter::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_snapshot,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Frame channel (bounded for backpressure against the feed)
    let (frame_tx, frame_rx) = mpsc::channel(256);
    let pacing = config.feed_realtime().then(|| Duration::from_secs_f64(1.0 / fps));
    let feed_shutdown = shutdown_rx.clone();
    let feed_handle = tokio::spawn(async move {
        if let Err(e) = feed.pump(frame_tx, pacing, feed_shutdown).await {
            error!(error = %format!("{e:#}"), "feed_error");
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run counter - consumes frames until the feed ends or shutdown
    let final_snapshot = counter.run(frame_rx, shutdown_rx).await;

    // Dropping the counter closes the egress channel so the writer drains and exits
    drop(counter);
    feed_handle.abort();
    reporter.abort();
    let written = egress_handle.await.context("egress writer task failed")?;
    metrics.report().log();

    info!(
        run = %run_id,
        frames = %final_snapshot.frame,
        total_counted = %final_snapshot.total_counted,
        egress_records = %written,
        "vehicle-counter shutdown complete"
    );
    Ok(())
}
