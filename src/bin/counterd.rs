//! counterd - occupancy counter daemon
//!
//! This daemon:
//! 1. Detects (or takes from config) the host resource tier
//! 2. Acquires the preferred camera at tier-sized constraints
//! 3. Loads the best detection model the tier allows
//! 4. Pumps frames, runs detection on the tier cadence and draws the overlay
//! 5. Reports counts to the REST backend, queueing locally while it is unreachable

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use occupancy_counter::{
    backend_for_device, BackgroundAggregator, CancellationToken, CapabilityNegotiator,
    CountAggregator, CounterConfig, DefaultModelFactory, FallbackSink, FramePump, LocalStore,
    ModelLoader, MotionGate, OccupancyAggregator, Overlay, ResourceTier, RestSink, StartError,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "COUNTER_CONFIG")]
    config: Option<PathBuf>,
    /// Force a resource tier (constrained or standard).
    #[arg(long)]
    tier: Option<ResourceTier>,
    /// Camera device id (e.g. /dev/video2 or stub://front_door).
    #[arg(long)]
    camera: Option<String>,
    /// Write the rendered canvas to this PNG file periodically.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Seconds between snapshots.
    #[arg(long, default_value_t = 5)]
    snapshot_every: u64,
    /// Seconds to wait before retrying a failed camera start.
    #[arg(long, default_value_t = 5)]
    retry_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CounterConfig::load_from(args.config.as_deref())?;
    if let Some(tier) = args.tier {
        cfg.tier = Some(tier);
    }
    if let Some(camera) = args.camera {
        cfg.camera.device = Some(camera);
    }
    let tier = cfg.resource_tier();
    log::info!(
        "counterd {} starting: {} tier, location {}",
        env!("CARGO_PKG_VERSION"),
        tier,
        cfg.backend.location_id
    );

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("set Ctrl-C handler")?;

    let backend = backend_for_device(cfg.camera.device.as_deref())?;
    let negotiator =
        CapabilityNegotiator::new(backend).with_acquire_timeout(cfg.camera.acquire_timeout);
    let loader = Arc::new(
        ModelLoader::new(Arc::new(DefaultModelFactory), cfg.models.clone())
            .with_load_timeout(cfg.load_timeout)
            .with_cancellation(cancel.clone()),
    );
    let overlay = match &cfg.overlay.font_path {
        Some(path) => Overlay::with_font_file(path)?,
        None => Overlay::new(),
    };

    let mut pump = FramePump::new(negotiator, loader, tier)
        .with_overlay(overlay)
        .with_aggregator(build_aggregator(&cfg)?)
        .with_execution_mode(cfg.pump.execution)
        .with_slow_detection(cfg.pump.slow_detection)
        .with_cancellation(cancel.clone());
    if cfg.pump.motion_gating {
        pump = pump.with_motion_gate(MotionGate::new(
            cfg.pump.motion_stride,
            cfg.pump.motion_threshold,
        ));
    }

    if !start_pump(&mut pump, cfg.camera.device.as_deref(), &cancel, args.retry_secs) {
        log::info!("counterd stopped before the camera came up");
        return Ok(());
    }

    let snapshot_every = Duration::from_secs(args.snapshot_every.max(1));
    let mut last_snapshot = Instant::now();
    let mut last_health_log = Instant::now();
    while !cancel.is_cancelled() {
        pump.tick(Instant::now());

        if let Some(path) = &args.snapshot {
            if last_snapshot.elapsed() >= snapshot_every {
                if let Err(err) = pump.canvas().image().save(path) {
                    log::warn!("snapshot to {} failed: {}", path.display(), err);
                }
                last_snapshot = Instant::now();
            }
        }
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = pump.stats();
            log::info!(
                "health: count={:?} frames={} detections={} errors={} downgraded={}",
                pump.latest_count(),
                stats.frames_rendered,
                stats.detections_completed,
                stats.detection_errors,
                stats.downgraded
            );
            last_health_log = Instant::now();
        }
        thread::sleep(occupancy_counter::pump::DISPLAY_INTERVAL);
    }

    log::info!("shutdown signal received, stopping pump...");
    pump.teardown();
    Ok(())
}

/// Occupancy aggregation on its own reporter thread, so a slow backend never stalls
/// the render loop.
fn build_aggregator(cfg: &CounterConfig) -> Result<Box<dyn CountAggregator>> {
    let store = LocalStore::open(&cfg.db_path, &cfg.backend.location_id)?;
    let reporter = match &cfg.backend.url {
        Some(url) => {
            let rest = RestSink::new(url, &cfg.backend.location_id)?;
            let mut aggregator = OccupancyAggregator::new(FallbackSink::new(rest, store))
                .with_capacity(cfg.backend.capacity)
                .with_near_ratio(cfg.backend.near_ratio);
            aggregator.refresh_capacity();
            BackgroundAggregator::spawn(aggregator)?
        }
        None => {
            log::warn!("no backend url configured; counts are kept in {}", cfg.db_path);
            let mut aggregator = OccupancyAggregator::new(store)
                .with_capacity(cfg.backend.capacity)
                .with_near_ratio(cfg.backend.near_ratio);
            aggregator.refresh_capacity();
            BackgroundAggregator::spawn(aggregator)?
        }
    };
    Ok(Box::new(reporter))
}

/// Start the pump, retrying camera failures until it comes up or shutdown is requested.
/// Returns false when cancelled first.
fn start_pump(
    pump: &mut FramePump,
    device: Option<&str>,
    cancel: &CancellationToken,
    retry_secs: u64,
) -> bool {
    loop {
        match pump.start(device) {
            Ok(stream) => {
                log::info!(
                    "camera {} live at {}x{}",
                    stream.device_id,
                    stream.width,
                    stream.height
                );
                return true;
            }
            Err(StartError::Model(err)) => {
                // camera is live; keep rendering without detection
                log::error!("{}", err.user_message());
                return true;
            }
            Err(StartError::Stopped) => return false,
            Err(err) => {
                log::error!("{} (retrying in {}s)", err.user_message(), retry_secs);
            }
        }
        let deadline = Instant::now() + Duration::from_secs(retry_secs.max(1));
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return false;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}
