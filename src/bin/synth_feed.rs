//! Synthetic region feed generator
//!
//! Writes a JSONL region feed in which square vehicles travel from the
//! counting line to the speed line at a fixed real-world speed, so the
//! pipeline can be exercised without a video decoder.
//!
//! Vehicles move along the straight path joining the midpoints of the two
//! configured lines. The pixel scale is derived from the configured line
//! distance, so a vehicle needs `distance_m / speed` seconds to get from
//! one line to the other.
//!
//! Usage:
//!   synth-feed --config config/dev.toml --out regions.jsonl --vehicles 10 --speed-kmh 54

use anyhow::{bail, Context};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use vehicle_counter::domain::{BoundingBox, FeedHeader, FrameRegions, Point, Region};
use vehicle_counter::infra::Config;

#[derive(Parser, Debug)]
#[command(name = "synth-feed", about = "Write a synthetic region feed")]
struct Args {
    /// Path to TOML configuration file (lines and distance)
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Output feed file (defaults to feed.file from config)
    #[arg(short, long)]
    out: Option<String>,

    /// Frame rate written to the feed header
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Number of vehicles
    #[arg(long, default_value_t = 5)]
    vehicles: u32,

    /// Vehicle speed (km/h)
    #[arg(long, default_value_t = 40.0)]
    speed_kmh: f64,

    /// Region area reported for every vehicle (pixels)
    #[arg(long, default_value_t = 18000.0)]
    area: f64,

    /// Frames between consecutive vehicle entries
    #[arg(long, default_value_t = 90)]
    gap_frames: u64,
}

/// One simulated vehicle moving along the path
struct Vehicle {
    start_frame: u64,
}

/// Straight path from before the counting line to past the speed line
struct Path {
    origin: Point,
    dir: Point,
    length_px: f64,
    step_px: f64,
    side_px: f64,
}

impl Path {
    fn new(from: Point, to: Point, args: &Args, distance_m: f64) -> anyhow::Result<Self> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let gap_px = (dx * dx + dy * dy).sqrt();
        if gap_px < 1.0 {
            bail!("counting and speed lines share a midpoint, no path to drive along");
        }

        let transit_frames = distance_m / (args.speed_kmh / 3.6) * args.fps;
        let side_px = args.area.sqrt();
        let dir = Point::new(dx / gap_px, dy / gap_px);
        // Start and finish one box length clear of either line
        let origin = Point::new(from.x - dir.x * side_px, from.y - dir.y * side_px);

        Ok(Self {
            origin,
            dir,
            length_px: gap_px + 2.0 * side_px,
            step_px: gap_px / transit_frames,
            side_px,
        })
    }

    fn frames(&self) -> u64 {
        (self.length_px / self.step_px).ceil() as u64
    }

    fn bbox_at(&self, t: u64) -> BoundingBox {
        let travelled = self.step_px * t as f64;
        let cx = self.origin.x + self.dir.x * travelled;
        let cy = self.origin.y + self.dir.y * travelled;
        let half = self.side_px / 2.0;
        BoundingBox::new((cx - half) as i32, (cy - half) as i32, (cx + half) as i32, (cy + half) as i32)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_timer(UtcTime::rfc_3339()).with_target(false).init();

    let args = Args::parse();
    if !args.fps.is_finite() || args.fps <= 0.0 {
        bail!("--fps must be positive");
    }
    if !args.speed_kmh.is_finite() || args.speed_kmh <= 0.0 {
        bail!("--speed-kmh must be positive");
    }
    if !args.area.is_finite() || args.area <= 0.0 {
        bail!("--area must be positive");
    }

    let config = Config::from_file(&args.config)?;
    config.validate()?;
    let out = args.out.clone().unwrap_or_else(|| config.feed_file().to_string());

    let path = Path::new(
        config.counting_line().midpoint(),
        config.speed_line().midpoint(),
        &args,
        config.line_distance_m(),
    )?;

    let vehicles: Vec<Vehicle> =
        (0..u64::from(args.vehicles)).map(|i| Vehicle { start_frame: i * args.gap_frames }).collect();
    let path_frames = path.frames();
    let total_frames = vehicles.last().map_or(0, |v| v.start_frame + path_frames + 1);

    let file = File::create(&out).with_context(|| format!("failed to create {out}"))?;
    let mut writer = BufWriter::new(file);

    let header = FeedHeader { fps: args.fps, width: None, height: None };
    serde_json::to_writer(&mut writer, &header)?;
    writeln!(writer)?;

    for frame in 0..total_frames {
        let regions: Vec<Region> = vehicles
            .iter()
            .filter(|v| frame >= v.start_frame && frame - v.start_frame <= path_frames)
            .map(|v| Region::new(path.bbox_at(frame - v.start_frame), args.area))
            .collect();
        serde_json::to_writer(&mut writer, &FrameRegions::new(frame, regions))?;
        writeln!(writer)?;
    }
    writer.flush()?;

    info!(
        out = %out,
        frames = %total_frames,
        vehicles = %args.vehicles,
        speed_kmh = %args.speed_kmh,
        frames_per_vehicle = %path_frames,
        "synthetic_feed_written"
    );
    Ok(())
}
