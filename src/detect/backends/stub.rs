use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use url::Url;

use crate::detect::backend::{CapabilityKind, DetectorBackend};
use crate::detect::result::{BoundingBox, DetectionResult};

/// Stub backend for tests and `stub://` model sources.
///
/// Reports a configurable number of people laid out across the frame, optionally
/// after an artificial latency. A script of one-shot outputs can be queued ahead of
/// the steady-state output to simulate failures.
pub struct StubBackend {
    kind: CapabilityKind,
    input_size: (u32, u32),
    output: StubOutput,
    script: VecDeque<StubOutput>,
    latency: Duration,
    warm_up_fails: bool,
    calls: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

#[derive(Clone, Debug)]
enum StubOutput {
    People(usize),
    Fixed(Vec<DetectionResult>),
    Fail(String),
}

impl StubBackend {
    pub fn new(kind: CapabilityKind) -> Self {
        let input_size = match kind {
            CapabilityKind::FaceDetector => (128, 96),
            CapabilityKind::Classifier => (224, 224),
            CapabilityKind::ObjectDetector => (320, 320),
        };
        Self {
            kind,
            input_size,
            output: StubOutput::People(0),
            script: VecDeque::new(),
            latency: Duration::ZERO,
            warm_up_fails: false,
            calls: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configure from a `stub://` URL, e.g. `stub://object?people=2&latency_ms=40`.
    pub fn from_url(kind: CapabilityKind, url: &Url) -> Result<Self> {
        if url.scheme() != "stub" {
            return Err(anyhow!("stub backend requires a stub:// url, got {}", url));
        }
        let mut backend = Self::new(kind);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "people" => {
                    let people = value.parse().context("stub people must be an integer")?;
                    backend = backend.with_people(people);
                }
                "latency_ms" => {
                    let ms = value.parse().context("stub latency_ms must be an integer")?;
                    backend = backend.with_latency(Duration::from_millis(ms));
                }
                "fail" => backend = backend.failing(value.as_ref()),
                other => log::warn!("StubBackend: ignoring unknown parameter '{}'", other),
            }
        }
        Ok(backend)
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn with_people(mut self, people: usize) -> Self {
        self.output = StubOutput::People(people);
        self
    }

    pub fn with_detections(mut self, detections: Vec<DetectionResult>) -> Self {
        self.output = StubOutput::Fixed(detections);
        self
    }

    /// Fail every detection with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.output = StubOutput::Fail(message.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a single failure ahead of the steady-state output.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(StubOutput::Fail(message.to_string()));
        self
    }

    /// Queue a single people count ahead of the steady-state output.
    pub fn then_people(mut self, people: usize) -> Self {
        self.script.push_back(StubOutput::People(people));
        self
    }

    pub fn with_failing_warm_up(mut self) -> Self {
        self.warm_up_fails = true;
        self
    }

    /// Shared counter of `detect` calls (warm-up included).
    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Set once `release` has run.
    pub fn released_handle(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    fn label(&self) -> &'static str {
        match self.kind {
            CapabilityKind::FaceDetector => "face",
            CapabilityKind::Classifier | CapabilityKind::ObjectDetector => "person",
        }
    }

    fn lay_out_people(&self, people: usize, image: &RgbImage) -> Vec<DetectionResult> {
        if people == 0 {
            return Vec::new();
        }
        let (width, height) = (image.width() as f32, image.height() as f32);
        let cell = width / (people as f32 * 2.0);
        (0..people)
            .map(|i| {
                let confidence = (0.95 - 0.1 * i as f32).max(0.3);
                DetectionResult::new(
                    self.label(),
                    confidence,
                    BoundingBox::new(
                        (2 * i) as f32 * cell + cell * 0.5,
                        height * 0.25,
                        cell,
                        height * 0.5,
                    ),
                )
            })
            .collect()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let output = self.script.pop_front().unwrap_or_else(|| self.output.clone());
        match output {
            StubOutput::People(people) => Ok(self.lay_out_people(people, image)),
            StubOutput::Fixed(detections) => Ok(detections),
            StubOutput::Fail(message) => Err(anyhow!("stub detection failed: {}", message)),
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.warm_up_fails {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("stub warm-up failed"));
        }
        // Warm-up must not consume scripted outputs.
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
