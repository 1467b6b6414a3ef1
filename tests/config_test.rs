//! Integration tests for configuration loading

use vehicle_counter::domain::Point;
use vehicle_counter::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let config_content = r#"
[site]
id = "bridge-north"

[detection]
area_threshold = 2500
vehicle_size_threshold = 24000

[lines]
counting = [[50.0, 120.0], [600.0, 180.0]]
speed = [[50.0, 320.0], [600.0, 380.0]]
distance_m = 8.5

[feed]
file = "data/regions.jsonl"
realtime = true

[egress]
file = "out/transits.jsonl"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;
    let temp_file = write_config(config_content);

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "bridge-north");
    assert_eq!(config.area_threshold(), 2500);
    assert_eq!(config.vehicle_size_threshold(), 24000);
    assert_eq!(config.counting_line().start(), Point::new(50.0, 120.0));
    assert_eq!(config.counting_line().end(), Point::new(600.0, 180.0));
    assert_eq!(config.speed_line().start(), Point::new(50.0, 320.0));
    assert_eq!(config.line_distance_m(), 8.5);
    assert_eq!(config.feed_file(), "data/regions.jsonl");
    assert!(config.feed_realtime());
    assert_eq!(config.egress_file(), "out/transits.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
    assert!(config.validate().is_ok());

    let params = config.detection_params();
    assert_eq!(params.area_threshold, 2500);
    assert_eq!(params.vehicle_size_threshold, 24000);
}

#[test]
fn test_missing_sections_use_defaults() {
    let temp_file = write_config("[site]\nid = \"minimal\"\n");

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.site_id(), "minimal");
    assert_eq!(config.area_threshold(), 1700);
    assert_eq!(config.vehicle_size_threshold(), 20000);
    assert_eq!(config.line_distance_m(), 6.0);
    assert_eq!(config.feed_file(), "regions.jsonl");
    assert_eq!(config.egress_file(), "transits.jsonl");
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp_file = write_config("[detection\narea_threshold = ");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_falls_back_to_defaults() {
    let config = Config::load_from_path("/nonexistent/vehicle-counter.toml");
    assert_eq!(config.site_id(), "default");
    assert_eq!(config.area_threshold(), 1700);
}

#[test]
fn test_zero_threshold_fails_validation() {
    let temp_file = write_config("[detection]\narea_threshold = 0\n");
    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_negative_distance_fails_validation() {
    let temp_file = write_config(
        "[lines]\ncounting = [[0.0, 0.0], [10.0, 5.0]]\nspeed = [[0.0, 50.0], [10.0, 55.0]]\ndistance_m = -1.0\n",
    );
    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_degenerate_line_loads_and_validates() {
    let temp_file = write_config(
        "[lines]\ncounting = [[100.0, 0.0], [100.0, 300.0]]\nspeed = [[0.0, 50.0], [10.0, 55.0]]\n",
    );
    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.counting_line().is_degenerate());
    assert!(config.validate().is_ok());
}

#[test]
fn test_cli_overrides() {
    let config = Config::default().with_feed_file("other.jsonl").with_egress_file("elsewhere.jsonl");
    assert_eq!(config.feed_file(), "other.jsonl");
    assert_eq!(config.egress_file(), "elsewhere.jsonl");
}

#[test]
fn test_file_without_site_section_uses_default_site_id() {
    let temp_file = write_config("[detection]\narea_threshold = 2500\n");

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.site_id(), "default");
    assert_eq!(config.area_threshold(), 2500);
    assert_eq!(Config::default().site_id(), "default");
}
