//! Tests for the VehicleCounter module

use super::*;
use crate::domain::types::{BoundingBox, Point, ReferenceLine, Region};
use crate::io::egress_channel::create_egress_channel;

const EPS: f64 = 1e-9;

/// Test harness that keeps the egress receiver alive so `try_send` succeeds
struct TestCounter {
    counter: VehicleCounter,
    egress_rx: mpsc::Receiver<EgressRecord>,
    metrics: Arc<Metrics>,
}

impl std::ops::Deref for TestCounter {
    type Target = VehicleCounter;
    fn deref(&self) -> &Self::Target {
        &self.counter
    }
}

impl std::ops::DerefMut for TestCounter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.counter
    }
}

impl TestCounter {
    fn drain_egress(&mut self) -> Vec<EgressRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.egress_rx.try_recv() {
            records.push(record);
        }
        records
    }

    fn idle(&mut self, frames: usize) {
        for _ in 0..frames {
            self.process(vec![]);
        }
    }

    fn process(&mut self, regions: Vec<Region>) -> FrameReport {
        let frame = FrameRegions::new(self.counter.frames_processed(), regions);
        self.counter.process_frame(&frame)
    }
}

fn test_config() -> Config {
    Config::default().with_lines(
        ReferenceLine::new(Point::new(0.0, 100.0), Point::new(400.0, 300.0)),
        ReferenceLine::new(Point::new(0.0, 400.0), Point::new(400.0, 600.0)),
    )
}

fn create_test_counter() -> TestCounter {
    let metrics = Arc::new(Metrics::new());
    let (sender, egress_rx) = create_egress_channel(256);
    let params = RunParams::new(30.0, 6.0).unwrap();
    let counter = VehicleCounter::new(&test_config(), params, metrics.clone(), Some(sender.with_metrics(metrics.clone())));
    TestCounter { counter, egress_rx, metrics }
}

/// Region overlapping the counting line only
fn at_counting(area: f64) -> Region {
    Region::new(BoundingBox::new(150, 150, 250, 250), area)
}

/// Region overlapping the speed line only
fn at_speed(area: f64) -> Region {
    Region::new(BoundingBox::new(150, 450, 250, 550), area)
}

/// One vehicle: two frames on the counting line, then the speed line
/// on the frame where the transit has aged `elapsed` frames
fn drive_vehicle(tc: &mut TestCounter, area: f64, elapsed: usize) -> FrameReport {
    tc.process(vec![at_counting(area)]);
    tc.process(vec![at_counting(area)]);
    tc.idle(elapsed - 3);
    tc.process(vec![at_speed(area)])
}

#[test]
fn test_scenario_small_vehicle_at_43_kmh() {
    let mut tc = create_test_counter();

    let first = tc.process(vec![at_counting(18000.0)]);
    assert_eq!(first.counted, Some((1, VehicleClass::Small)));
    assert_eq!(tc.snapshot().small.count, 1);

    // Still overlapping: debounced
    let second = tc.process(vec![at_counting(18000.0)]);
    assert_eq!(second.counted, None);

    tc.idle(12);
    let done = tc.process(vec![at_speed(18000.0)]);

    let completed = done.completed.expect("transit should complete");
    assert_eq!(completed.seq, 1);
    assert_eq!(completed.class, VehicleClass::Small);
    assert_eq!(completed.elapsed_frames, 15);
    assert!((completed.speed_kmh - 43.2).abs() < EPS);

    let snapshot = tc.snapshot();
    assert_eq!(snapshot.small.count, 1);
    assert_eq!(snapshot.small.samples, 1);
    assert!((snapshot.small.average_kmh - 43.2).abs() < EPS);
    assert_eq!(snapshot.medium.count, 0);
    assert_eq!(snapshot.large.count, 0);
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.frame, 15);
}

#[test]
fn test_completion_carries_video_time_of_its_frame() {
    let mut tc = create_test_counter();
    let report = drive_vehicle(&mut tc, 18000.0, 15);

    // Completion happens on the fifteenth frame, index 14
    let completed = report.completed.unwrap();
    assert!((completed.video_time_s - 14.0 / 30.0).abs() < EPS);
}

#[test]
fn test_egress_records_in_order() {
    let mut tc = create_test_counter();
    drive_vehicle(&mut tc, 30000.0, 15);

    let records = tc.drain_egress();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0],
        EgressRecord::Count { seq: 1, class: VehicleClass::Medium, frame: 0, video_s: 0.0 }
    );
    match &records[1] {
        EgressRecord::Transit { seq, class, frames, .. } => {
            assert_eq!(*seq, 1);
            assert_eq!(*class, VehicleClass::Medium);
            assert_eq!(*frames, 15);
        }
        other => panic!("expected transit record, got {other:?}"),
    }
}

#[test]
fn test_timeout_reverts_class_count() {
    let mut tc = create_test_counter();
    tc.process(vec![at_counting(50000.0)]);
    assert_eq!(tc.snapshot().large.count, 1);

    // max_wait is 60 frames; eviction on the frame elapsed reaches 61
    tc.idle(59);
    assert_eq!(tc.snapshot().pending, 1);

    let report = tc.process(vec![]);
    assert_eq!(report.expired.len(), 1);
    assert_eq!(report.expired[0].seq, 1);
    assert_eq!(report.expired[0].elapsed_frames, 61);
    assert!(report.completed.is_none());

    let snapshot = tc.snapshot();
    assert_eq!(snapshot.large.count, 0);
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.total_counted, 1);
    assert_eq!(tc.metrics.transits_expired_total(), 1);

    let records = tc.drain_egress();
    assert!(matches!(records.last(), Some(EgressRecord::Expired { seq: 1, frames: 61, .. })));
}

#[test]
fn test_fifo_matching_across_vehicles() {
    let mut tc = create_test_counter();

    // Three vehicles cross the counting line before any reaches the speed line
    for area in [18000.0, 30000.0, 50000.0] {
        tc.process(vec![at_counting(area)]);
        tc.process(vec![]);
    }

    let mut completed = Vec::new();
    for _ in 0..3 {
        if let Some(done) = tc.process(vec![at_speed(18000.0)]).completed {
            completed.push((done.seq, done.class));
        }
        tc.process(vec![]);
    }

    assert_eq!(
        completed,
        vec![(1, VehicleClass::Small), (2, VehicleClass::Medium), (3, VehicleClass::Large)]
    );
}

#[test]
fn test_unmatched_speed_trigger_is_ignored() {
    let mut tc = create_test_counter();
    let report = tc.process(vec![at_speed(18000.0)]);

    assert!(report.speed_trigger_unmatched);
    assert!(report.completed.is_none());
    assert_eq!(tc.metrics.speed_triggers_unmatched_total(), 1);
    assert!(tc.drain_egress().is_empty());
}

#[test]
fn test_regions_below_area_threshold_ignored() {
    let mut tc = create_test_counter();
    let report = tc.process(vec![at_counting(1700.0)]);

    assert_eq!(report.counted, None);
    assert_eq!(tc.snapshot().total_counted, 0);
}

#[test]
fn test_snapshot_published_each_frame() {
    let mut tc = create_test_counter();
    let rx = tc.subscribe();

    tc.process(vec![at_counting(18000.0)]);
    let published = *rx.borrow();
    assert_eq!(published.frame, 1);
    assert_eq!(published.small.count, 1);
    assert_eq!(published.pending, 1);
}

#[test]
fn test_reset_returns_to_initial_state() {
    let mut tc = create_test_counter();
    drive_vehicle(&mut tc, 18000.0, 15);
    tc.process(vec![at_counting(30000.0)]);

    tc.reset();

    let snapshot = tc.snapshot();
    assert_eq!(snapshot, AggregateSnapshot::default());
    assert!(!tc.analyzer.counting_gate().is_engaged());

    // Gate re-armed and sequence ids restart
    let report = tc.process(vec![at_counting(30000.0)]);
    assert_eq!(report.counted, Some((1, VehicleClass::Medium)));
}

#[test]
fn test_metrics_recorded_per_frame() {
    let mut tc = create_test_counter();
    tc.process(vec![at_counting(18000.0), Region::new(BoundingBox::new(0, 0, 5, 5), 25.0)]);
    tc.process(vec![]);

    assert_eq!(tc.metrics.frames_total(), 2);
    assert_eq!(tc.metrics.vehicles_counted_total(), 1);
    let summary = tc.metrics.report();
    assert_eq!(summary.regions_total, 2);
    assert_eq!(summary.regions_kept_total, 1);
}

#[test]
fn test_counter_without_egress() {
    let metrics = Arc::new(Metrics::new());
    let params = RunParams::new(30.0, 6.0).unwrap();
    let mut counter = VehicleCounter::new(&test_config(), params, metrics, None);

    let report = counter.process_frame(&FrameRegions::new(0, vec![at_counting(18000.0)]));
    assert_eq!(report.counted, Some((1, VehicleClass::Small)));
}

#[tokio::test]
async fn test_run_until_channel_closes() {
    let mut tc = create_test_counter();
    let (tx, rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // One completed transit, then a second vehicle left pending
    let mut frames = vec![vec![at_counting(18000.0)], vec![at_counting(18000.0)]];
    frames.extend((0..12).map(|_| vec![]));
    frames.push(vec![at_speed(18000.0)]);
    frames.push(vec![]);
    frames.push(vec![at_counting(30000.0)]);

    for (i, regions) in frames.into_iter().enumerate() {
        tx.send(FrameRegions::new(i as u64, regions)).await.unwrap();
    }
    drop(tx);

    let final_snapshot = tc.counter.run(rx, shutdown_rx).await;

    assert_eq!(final_snapshot.frame, 17);
    assert_eq!(final_snapshot.total_counted, 2);
    assert_eq!(final_snapshot.pending, 0);
    assert_eq!(final_snapshot.small.samples, 1);
    // Discarded transit keeps its optimistic count
    assert_eq!(final_snapshot.medium.count, 1);
    assert_eq!(final_snapshot.medium.samples, 0);

    let records = tc.drain_egress();
    assert_eq!(records.len(), 4);
    assert_eq!(records[3], EgressRecord::Summary { snapshot: final_snapshot });
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut tc = create_test_counter();
    let (tx, rx) = mpsc::channel::<FrameRegions>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let snapshot = tc.counter.run(rx, shutdown_rx).await;
        (snapshot, tc)
    });

    tx.send(FrameRegions::new(0, vec![at_counting(18000.0)])).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();

    let (snapshot, _tc) = handle.await.unwrap();
    assert_eq!(snapshot.total_counted, 1);
    assert_eq!(snapshot.pending, 0);
    drop(tx);
}

#[tokio::test]
async fn test_summary_waits_for_egress_capacity() {
    let metrics = Arc::new(Metrics::new());
    let (sender, mut egress_rx) = create_egress_channel(1);
    let params = RunParams::new(30.0, 6.0).unwrap();
    let mut counter =
        VehicleCounter::new(&test_config(), params, metrics.clone(), Some(sender.with_metrics(metrics.clone())));

    let (tx, rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tx.send(FrameRegions::new(0, vec![at_counting(18000.0)])).await.unwrap();
    drop(tx);

    // The count fills the only slot, so the summary has to wait for the reader
    let handle = tokio::spawn(async move { counter.run(rx, shutdown_rx).await });

    let first = egress_rx.recv().await.unwrap();
    assert!(matches!(first, EgressRecord::Count { seq: 1, .. }));
    let second = egress_rx.recv().await.unwrap();
    let snapshot = handle.await.unwrap();

    assert_eq!(second, EgressRecord::Summary { snapshot });
    assert_eq!(metrics.egress_dropped_total(), 0);
}
