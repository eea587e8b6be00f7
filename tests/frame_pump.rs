use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use occupancy_counter::detect::StubBackend;
use occupancy_counter::{
    BackgroundAggregator, BoundingBox, CameraError, CapabilityNegotiator, CountAggregator, DetectionResult,
    DetectorBackend, ExecutionMode, FramePump, ModelFactory, ModelLoader, ModelVariant,
    ModelsConfig, PumpState, ResourceTier, StartError, SyntheticCamera, TickOutcome,
};

/// Builds every variant with the same stub recipe.
struct StubFactory(fn(&ModelVariant) -> StubBackend);

impl ModelFactory for StubFactory {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        Ok(Box::new((self.0)(variant)))
    }
}

struct NoModels;

impl ModelFactory for NoModels {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        Err(anyhow!("{} missing", variant.name))
    }
}

#[derive(Clone, Default)]
struct RecordingAggregator {
    counts: Arc<Mutex<Vec<usize>>>,
}

impl CountAggregator for RecordingAggregator {
    fn report_count(&mut self, count: usize) -> Result<()> {
        self.counts.lock().unwrap().push(count);
        Ok(())
    }

    fn capacity(&self) -> Option<u32> {
        None
    }
}

/// Takes `delay` to accept every report, like a backend that is slow to answer.
#[derive(Clone)]
struct SlowAggregator {
    delay: Duration,
    inner: RecordingAggregator,
}

impl CountAggregator for SlowAggregator {
    fn report_count(&mut self, count: usize) -> Result<()> {
        thread::sleep(self.delay);
        self.inner.report_count(count)
    }

    fn capacity(&self) -> Option<u32> {
        None
    }
}

fn pump_with(
    tier: ResourceTier,
    factory: Arc<dyn ModelFactory>,
    camera: &SyntheticCamera,
) -> FramePump {
    let negotiator = CapabilityNegotiator::new(Arc::new(camera.clone()));
    let loader = Arc::new(ModelLoader::new(factory, ModelsConfig::stub(1)));
    FramePump::new(negotiator, loader, tier)
}

fn camera() -> SyntheticCamera {
    SyntheticCamera::single("stub://door").with_negotiated_size(160, 120)
}

#[test]
fn failing_detection_never_wedges_the_gate() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| StubBackend::new(v.kind).failing("bad tensor")));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();

    let t0 = Instant::now();
    for i in 0..5u32 {
        let outcome = pump.tick(t0 + Duration::from_secs(u64::from(i)));
        assert_eq!(
            outcome,
            TickOutcome::Rendered {
                detection_started: true
            }
        );
        assert!(!pump.gate().is_busy());
    }

    let stats = pump.stats();
    assert_eq!(stats.frames_rendered, 5);
    assert_eq!(stats.detection_errors, 5);
    assert_eq!(pump.latest_count(), None);
}

#[test]
fn failed_detection_keeps_previous_count() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind).then_people(3).then_fail("flaky").with_people(1)
    }));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();
    let t0 = Instant::now();

    pump.tick(t0);
    assert_eq!(pump.latest_count(), Some(3));
    pump.tick(t0 + Duration::from_secs(1));
    assert_eq!(pump.latest_count(), Some(3));
    pump.tick(t0 + Duration::from_secs(2));
    assert_eq!(pump.latest_count(), Some(1));
}

#[test]
fn runaway_detector_boxes_never_break_the_loop() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind).with_detections(vec![
            DetectionResult::new("face", 0.9, BoundingBox::new(f32::INFINITY, 10.0, 5.0, 5.0)),
            DetectionResult::new("face", 0.9, BoundingBox::new(1e30, 1e30, 1e30, 1e30)),
            DetectionResult::new("face", 0.8, BoundingBox::new(4.0, 4.0, 1e30, 1e30)),
        ])
    }));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();

    let t0 = Instant::now();
    for i in 0..3u32 {
        assert!(matches!(
            pump.tick(t0 + Duration::from_secs(u64::from(i))),
            TickOutcome::Rendered { .. }
        ));
    }
    // only the box that overlaps the frame is kept
    assert_eq!(pump.latest_count(), Some(1));
    assert!(!pump.gate().is_busy());
}

#[test]
fn slow_detection_downgrades_constrained_host() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind)
            .with_people(1)
            .with_latency(Duration::from_millis(600))
    }));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();
    assert_eq!(pump.profile().max_fps, 15);

    let t0 = Instant::now();
    pump.tick(t0);

    assert!(pump.stats().downgraded);
    assert_eq!(pump.profile().max_fps, 8);
    assert_eq!(pump.profile().detection_interval, Duration::from_millis(2000));
    // 70 ms would clear the 15 fps budget but not the downgraded 8 fps one
    assert_eq!(pump.tick(t0 + Duration::from_millis(70)), TickOutcome::Throttled);
    assert!(matches!(
        pump.tick(t0 + Duration::from_millis(130)),
        TickOutcome::Rendered { .. }
    ));
}

#[test]
fn slow_detection_on_standard_host_keeps_profile() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind)
            .with_people(1)
            .with_latency(Duration::from_millis(600))
    }));
    let mut pump = pump_with(ResourceTier::Standard, factory, &camera);
    pump.start(None).unwrap();

    pump.tick(Instant::now());
    assert!(!pump.stats().downgraded);
    assert_eq!(pump.profile().max_fps, 30);
}

#[test]
fn worker_results_arrive_on_later_ticks() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind)
            .with_people(2)
            .with_latency(Duration::from_millis(50))
    }));
    let recorder = RecordingAggregator::default();
    let mut pump = pump_with(ResourceTier::Standard, factory, &camera)
        .with_execution_mode(ExecutionMode::Worker)
        .with_aggregator(Box::new(recorder.clone()));
    pump.start(None).unwrap();
    assert_eq!(pump.execution_mode(), ExecutionMode::Worker);

    let t0 = Instant::now();
    assert_eq!(
        pump.tick(t0),
        TickOutcome::Rendered {
            detection_started: true
        }
    );
    assert_eq!(pump.latest_count(), None);
    assert_eq!(pump.state(), PumpState::Detecting);

    let mut step = 1u64;
    while pump.latest_count().is_none() && step < 100 {
        thread::sleep(Duration::from_millis(20));
        pump.tick(t0 + Duration::from_millis(40 * step));
        step += 1;
    }
    assert_eq!(pump.latest_count(), Some(2));
    assert_eq!(recorder.counts.lock().unwrap().first(), Some(&2));

    pump.teardown();
    assert!(!pump.gate().is_busy());
    assert_eq!(camera.stats().live_tracks(), 0);
}

#[test]
fn slow_count_delivery_stays_off_the_render_loop() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| {
        StubBackend::new(v.kind).then_people(0).with_people(3)
    }));
    let recorder = RecordingAggregator::default();
    let slow = SlowAggregator {
        delay: Duration::from_secs(2),
        inner: recorder.clone(),
    };
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera)
        .with_aggregator(Box::new(BackgroundAggregator::spawn(slow).unwrap()));
    pump.start(None).unwrap();

    let started = Instant::now();
    let t0 = Instant::now();
    pump.tick(t0);
    pump.tick(t0 + Duration::from_secs(1));
    assert_eq!(pump.latest_count(), Some(3));
    assert!(started.elapsed() < Duration::from_secs(1));

    // teardown waits for the queued reports
    pump.teardown();
    assert_eq!(*recorder.counts.lock().unwrap(), vec![0, 3]);
}

#[test]
fn unready_frames_are_swallowed() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| StubBackend::new(v.kind).with_people(1)));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();
    camera.unready_frames(2);

    let t0 = Instant::now();
    for i in 0..2u64 {
        assert_eq!(
            pump.tick(t0 + Duration::from_millis(100 * i)),
            TickOutcome::Rendered {
                detection_started: false
            }
        );
    }
    assert_eq!(
        pump.tick(t0 + Duration::from_millis(200)),
        TickOutcome::Rendered {
            detection_started: true
        }
    );
    let stats = pump.stats();
    assert_eq!(stats.render_errors, 2);
    assert_eq!(stats.frames_rendered, 1);
}

#[test]
fn camera_failure_leaves_pump_retryable() {
    let camera = camera();
    camera.fail_next_open(CameraError::DeviceBusy("stub://door".to_string()));
    let factory = Arc::new(StubFactory(|v| StubBackend::new(v.kind)));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);

    let err = pump.start(None).unwrap_err();
    assert!(matches!(err, StartError::Camera(CameraError::DeviceBusy(_))));
    assert_eq!(pump.state(), PumpState::Idle);
    assert_eq!(pump.tick(Instant::now()), TickOutcome::Inactive);

    pump.start(Some("stub://door")).unwrap();
    assert_eq!(pump.state(), PumpState::Streaming);
}

#[test]
fn missing_models_still_render() {
    let camera = camera();
    let mut pump = pump_with(ResourceTier::Standard, Arc::new(NoModels), &camera);

    let err = pump.start(None).unwrap_err();
    assert!(matches!(err, StartError::Model(_)));
    assert!(!err.user_message().is_empty());

    assert_eq!(
        pump.tick(Instant::now()),
        TickOutcome::Rendered {
            detection_started: false
        }
    );
    assert!(pump.capability().is_none());
}

#[test]
fn cancellation_stops_ticking_and_dropping_releases_camera() {
    let camera = camera();
    let factory = Arc::new(StubFactory(|v| StubBackend::new(v.kind)));
    let mut pump = pump_with(ResourceTier::Constrained, factory, &camera);
    pump.start(None).unwrap();

    pump.cancellation().cancel();
    assert_eq!(pump.tick(Instant::now()), TickOutcome::Inactive);
    // run returns immediately once cancelled
    pump.run();

    drop(pump);
    assert_eq!(camera.stats().live_tracks(), 0);
}
