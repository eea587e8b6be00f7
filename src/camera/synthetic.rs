//! Synthetic camera backend (`stub://` devices).
//!
//! Produces a moving test pattern and exposes hooks to script enumeration failures,
//! open failures, slow opens and silently downgraded resolutions. Track bookkeeping is
//! shared across clones so tests can check that no track is ever leaked.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{
    CameraBackend, CameraError, DeviceDescriptor, StreamConstraints, StreamSettings, VideoStream,
};

/// Counters shared by a synthetic camera and all of its streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub open_requests: u64,
    pub streams_opened: u64,
    pub tracks_opened: u64,
    pub tracks_stopped: u64,
    pub frames_captured: u64,
}

impl SyntheticStats {
    /// Tracks opened and not yet stopped.
    pub fn live_tracks(&self) -> u64 {
        self.tracks_opened - self.tracks_stopped
    }
}

#[derive(Clone)]
pub struct SyntheticCamera {
    inner: Arc<Mutex<SyntheticInner>>,
}

struct SyntheticInner {
    devices: Vec<DeviceDescriptor>,
    enumeration_error: Option<CameraError>,
    open_failures: VecDeque<CameraError>,
    open_delay: Duration,
    negotiated_size: Option<(u32, u32)>,
    tracks_per_stream: usize,
    reject_constraints: bool,
    unready_frames: u64,
    stats: SyntheticStats,
}

impl SyntheticCamera {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SyntheticInner {
                devices,
                enumeration_error: None,
                open_failures: VecDeque::new(),
                open_delay: Duration::ZERO,
                negotiated_size: None,
                unready_frames: 0,
                tracks_per_stream: 1,
                reject_constraints: false,
                stats: SyntheticStats::default(),
            })),
        }
    }

    /// One synthetic device whose label is derived from the URL.
    pub fn single(id: &str) -> Self {
        let label = id.trim_start_matches("stub://").to_string();
        Self::new(vec![DeviceDescriptor::new(id, label)])
    }

    /// Deliver this size regardless of what was requested.
    pub fn with_negotiated_size(self, width: u32, height: u32) -> Self {
        self.lock().negotiated_size = Some((width, height));
        self
    }

    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.lock().open_delay = delay;
        self
    }

    pub fn with_tracks_per_stream(self, tracks: usize) -> Self {
        self.lock().tracks_per_stream = tracks;
        self
    }

    /// Make `apply_constraints` fail on every stream.
    pub fn rejecting_constraints(self) -> Self {
        self.lock().reject_constraints = true;
        self
    }

    /// Queue a failure for the next `open` call.
    pub fn fail_next_open(&self, err: CameraError) {
        self.lock().open_failures.push_back(err);
    }

    pub fn fail_enumeration(&self, err: CameraError) {
        self.lock().enumeration_error = Some(err);
    }

    /// Deliver `frames` empty (not yet ready) frames before the pattern resumes.
    pub fn unready_frames(&self, frames: u64) {
        self.lock().unready_frames = frames;
    }

    pub fn stats(&self) -> SyntheticStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        let inner = self.lock();
        match &inner.enumeration_error {
            Some(err) => Err(err.clone()),
            None => Ok(inner.devices.clone()),
        }
    }

    fn open(
        &self,
        device: &DeviceDescriptor,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        let delay = {
            let mut inner = self.lock();
            inner.stats.open_requests += 1;
            inner.open_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut inner = self.lock();
        if let Some(err) = inner.open_failures.pop_front() {
            return Err(err);
        }
        if !inner.devices.iter().any(|known| known.id == device.id) {
            return Err(CameraError::NoDeviceFound);
        }

        let (width, height) = inner
            .negotiated_size
            .unwrap_or((constraints.width, constraints.height));
        let tracks = inner.tracks_per_stream;
        inner.stats.streams_opened += 1;
        inner.stats.tracks_opened += tracks as u64;

        log::info!(
            "SyntheticCamera: opened {} ({}x{}, {} tracks)",
            device.id,
            width,
            height,
            tracks
        );

        Ok(Box::new(SyntheticStream {
            camera: self.clone(),
            settings: StreamSettings {
                width,
                height,
                frame_rate: constraints.frame_rate,
            },
            live_tracks: tracks,
            reject_constraints: inner.reject_constraints,
            frame_count: 0,
            scene_state: 0,
        }))
    }
}

struct SyntheticStream {
    camera: SyntheticCamera,
    settings: StreamSettings,
    live_tracks: usize,
    reject_constraints: bool,
    frame_count: u64,
    /// Simulated scene, bumped occasionally so motion gating sees change.
    scene_state: u8,
}

impl SyntheticStream {
    fn generate_pattern(&mut self) -> RgbImage {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + u64::from(self.scene_state) * 37;
        RgbImage::from_fn(self.settings.width, self.settings.height, |x, y| {
            let base = u64::from(x) + u64::from(y) + shift;
            Rgb([
                (base % 256) as u8,
                ((base / 2) % 256) as u8,
                (u64::from(self.scene_state) * 40 % 256) as u8,
            ])
        })
    }
}

impl VideoStream for SyntheticStream {
    fn settings(&self) -> StreamSettings {
        self.settings
    }

    fn apply_constraints(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError> {
        if self.reject_constraints {
            return Err(CameraError::Other(
                "constraints could not be satisfied".to_string(),
            ));
        }
        self.settings.frame_rate = self.settings.frame_rate.min(constraints.frame_rate);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        if self.live_tracks == 0 {
            return Err(anyhow!("synthetic stream stopped"));
        }
        {
            let mut inner = self.camera.lock();
            if inner.unready_frames > 0 {
                inner.unready_frames -= 1;
                return Ok(RgbImage::new(0, 0));
            }
            inner.stats.frames_captured += 1;
        }
        self.frame_count += 1;
        Ok(self.generate_pattern())
    }

    fn track_count(&self) -> usize {
        self.live_tracks
    }

    fn stop(&mut self) {
        if self.live_tracks == 0 {
            return;
        }
        self.camera.lock().stats.tracks_stopped += self.live_tracks as u64;
        self.live_tracks = 0;
    }

    fn is_live(&self) -> bool {
        self.live_tracks > 0
    }
}
