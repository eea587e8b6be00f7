use std::fmt;

use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;

use super::result::DetectionResult;
use crate::frame::blank;

/// Families of interchangeable detection models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Lightest: face boxes only.
    FaceDetector,
    /// Whole-frame "is a person present" classifier.
    Classifier,
    /// Person boxes from a general object detector.
    ObjectDetector,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::FaceDetector => f.write_str("face-detector"),
            CapabilityKind::Classifier => f.write_str("classifier"),
            CapabilityKind::ObjectDetector => f.write_str("object-detector"),
        }
    }
}

/// A loaded detection model.
///
/// Implementations receive frames already sized by the frame pump and return boxes in
/// the pixel space of the image they were given.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn kind(&self) -> CapabilityKind;

    /// Native model input size (width, height).
    fn input_size(&self) -> (u32, u32);

    /// Run detection on an RGB image.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionResult>>;

    /// Pre-pay first-inference latency with a synthetic input.
    fn warm_up(&mut self) -> Result<()> {
        let (width, height) = self.input_size();
        self.detect(&blank(width, height)).map(|_| ())
    }

    /// Free model weights and any accelerator state. Called once, on unload.
    fn release(&mut self) {}
}
