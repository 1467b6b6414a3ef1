//! Configuration loading from TOML files
//!
//! The file path comes from the binary's `--config` argument
//! (default: config/dev.toml). Missing sections and fields fall back to
//! the defaults below.

use crate::domain::types::{Point, ReferenceLine};
use crate::services::frame_analyzer::DetectionParams;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier included in egress records and metrics labels
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Regions with area at or below this are ignored
    #[serde(default = "default_area_threshold")]
    pub area_threshold: u32,
    /// Boundary between small/medium/large vehicles
    #[serde(default = "default_vehicle_size_threshold")]
    pub vehicle_size_threshold: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            area_threshold: default_area_threshold(),
            vehicle_size_threshold: default_vehicle_size_threshold(),
        }
    }
}

fn default_area_threshold() -> u32 {
    1700
}

fn default_vehicle_size_threshold() -> u32 {
    20000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinesConfig {
    /// Counting line endpoints [[x, y], [x, y]]
    pub counting: [[f64; 2]; 2],
    /// Speed line endpoints [[x, y], [x, y]]
    pub speed: [[f64; 2]; 2],
    /// Real-world distance between the two lines (meters)
    #[serde(default = "default_distance_m")]
    pub distance_m: f64,
}

impl Default for LinesConfig {
    fn default() -> Self {
        Self {
            counting: DEFAULT_COUNTING_LINE,
            speed: DEFAULT_SPEED_LINE,
            distance_m: default_distance_m(),
        }
    }
}

const DEFAULT_COUNTING_LINE: [[f64; 2]; 2] = [[100.0, 200.0], [500.0, 260.0]];
const DEFAULT_SPEED_LINE: [[f64; 2]; 2] = [[100.0, 300.0], [500.0, 360.0]];

fn default_distance_m() -> f64 {
    6.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Region feed path (JSONL)
    #[serde(default = "default_feed_file")]
    pub file: String,
    /// Release frames at the feed's frame rate instead of as fast as possible
    #[serde(default)]
    pub realtime: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { file: default_feed_file(), realtime: false }
    }
}

fn default_feed_file() -> String {
    "regions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for transit egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "transits.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub lines: LinesConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    area_threshold: u32,
    vehicle_size_threshold: u32,
    counting_line: ReferenceLine,
    speed_line: ReferenceLine,
    line_distance_m: f64,
    feed_file: String,
    feed_realtime: bool,
    egress_file: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

fn line_from(points: [[f64; 2]; 2]) -> ReferenceLine {
    ReferenceLine::new(Point::from(points[0]), Point::from(points[1]))
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            area_threshold: toml_config.detection.area_threshold,
            vehicle_size_threshold: toml_config.detection.vehicle_size_threshold,
            counting_line: line_from(toml_config.lines.counting),
            speed_line: line_from(toml_config.lines.speed),
            line_distance_m: toml_config.lines.distance_m,
            feed_file: toml_config.feed.file,
            feed_realtime: toml_config.feed.realtime,
            egress_file: toml_config.egress.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Reject values that would make a run meaningless
    ///
    /// Degenerate reference lines are allowed; they only produce a warning
    /// since such a line never reports a crossing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.area_threshold == 0 {
            bail!("detection.area_threshold must be positive");
        }
        if self.vehicle_size_threshold == 0 {
            bail!("detection.vehicle_size_threshold must be positive");
        }
        if !self.line_distance_m.is_finite() || self.line_distance_m <= 0.0 {
            bail!("lines.distance_m must be positive, got {}", self.line_distance_m);
        }
        if self.metrics_interval_secs == 0 {
            bail!("metrics.interval_secs must be positive");
        }

        for (name, line) in [("counting", &self.counting_line), ("speed", &self.speed_line)] {
            if line.is_degenerate() {
                warn!(
                    line = %name,
                    start = ?line.start(),
                    end = ?line.end(),
                    "reference_line_degenerate_never_crosses"
                );
            }
        }
        Ok(())
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn area_threshold(&self) -> u32 {
        self.area_threshold
    }

    pub fn vehicle_size_threshold(&self) -> u32 {
        self.vehicle_size_threshold
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            area_threshold: self.area_threshold,
            vehicle_size_threshold: self.vehicle_size_threshold,
        }
    }

    pub fn counting_line(&self) -> &ReferenceLine {
        &self.counting_line
    }

    pub fn speed_line(&self) -> &ReferenceLine {
        &self.speed_line
    }

    pub fn line_distance_m(&self) -> f64 {
        self.line_distance_m
    }

    pub fn feed_file(&self) -> &str {
        &self.feed_file
    }

    pub fn feed_realtime(&self) -> bool {
        self.feed_realtime
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn with_feed_file(mut self, path: &str) -> Self {
        self.feed_file = path.to_string();
        self
    }

    pub fn with_egress_file(mut self, path: &str) -> Self {
        self.egress_file = path.to_string();
        self
    }

    pub fn with_lines(mut self, counting: ReferenceLine, speed: ReferenceLine) -> Self {
        self.counting_line = counting;
        self.speed_line = speed;
        self
    }

    /// Builder method for tests to set the detection thresholds
    #[cfg(test)]
    pub fn with_thresholds(mut self, area_threshold: u32, vehicle_size_threshold: u32) -> Self {
        self.area_threshold = area_threshold;
        self.vehicle_size_threshold = vehicle_size_threshold;
        self
    }

    #[cfg(test)]
    pub fn with_line_distance_m(mut self, meters: f64) -> Self {
        self.line_distance_m = meters;
        self
    }
}
