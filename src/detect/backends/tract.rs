#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{CapabilityKind, DetectorBackend};
use crate::detect::result::{non_max_suppression, BoundingBox, DetectionResult};

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file and decodes its output tensors according to the
/// capability kind:
/// - `ObjectDetector`: YOLO-style `[1, 4 + classes, anchors]` (or transposed), class 0 = person
/// - `FaceDetector`: UltraFace-style scores `[1, N, 2]` and normalized corner boxes `[1, N, 4]`
/// - `Classifier`: logits `[1, classes]`; a confident person class yields one full-frame box
pub struct TractBackend {
    model: Option<Plan>,
    kind: CapabilityKind,
    width: u32,
    height: u32,
    score_threshold: f32,
    iou_threshold: f32,
    person_class: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        kind: CapabilityKind,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let backend = Self {
            model: Some(model),
            kind,
            width,
            height,
            score_threshold: 0.5,
            iou_threshold: 0.45,
            person_class: 0,
        };
        backend
            .check_output_facts()
            .with_context(|| format!("unusable model {}", model_path.display()))?;
        Ok(backend)
    }

    /// Reject models whose declared output shapes the decoder for `kind` cannot read.
    /// Symbolic shapes are left to the per-inference checks.
    fn check_output_facts(&self) -> Result<()> {
        let Some(plan) = self.model.as_ref() else {
            return Ok(());
        };
        let graph = plan.model();
        let shapes: Vec<Option<Vec<usize>>> = (0..graph.outputs.len())
            .map(|ix| {
                graph
                    .output_fact(ix)
                    .ok()
                    .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
            })
            .collect();
        match self.kind {
            CapabilityKind::FaceDetector => {
                if shapes.len() < 2 {
                    return Err(anyhow!("face detector needs scores and boxes outputs"));
                }
                if let (Some(scores), Some(boxes)) = (&shapes[0], &shapes[1]) {
                    ultraface_count(scores, boxes)?;
                }
            }
            CapabilityKind::ObjectDetector => match shapes.first() {
                None => return Err(anyhow!("model produced no outputs")),
                Some(Some(shape)) => {
                    yolo_layout(shape, self.person_class)?;
                }
                Some(None) => {}
            },
            CapabilityKind::Classifier => {
                if shapes.is_empty() {
                    return Err(anyhow!("model produced no outputs"));
                }
            }
        }
        Ok(())
    }

    pub fn with_thresholds(mut self, score: f32, iou: f32) -> Self {
        self.score_threshold = score;
        self.iou_threshold = iou;
        self
    }

    pub fn with_person_class(mut self, class: usize) -> Self {
        self.person_class = class;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized;
        let source = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
            &resized
        };

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| source.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode_yolo(&self, outputs: &TVec<TValue>) -> Result<Vec<DetectionResult>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("detector output tensor was not f32")?;
        let (transposed, anchors) = yolo_layout(view.shape(), self.person_class)?;
        let at = |attr: usize, anchor: usize| {
            if transposed {
                view[[0, anchor, attr]]
            } else {
                view[[0, attr, anchor]]
            }
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let score = at(4 + self.person_class, anchor);
            if score < self.score_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            candidates.push(DetectionResult::new(
                "person",
                score,
                BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
            ));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }

    fn decode_ultraface(&self, outputs: &TVec<TValue>) -> Result<Vec<DetectionResult>> {
        if outputs.len() < 2 {
            return Err(anyhow!("face detector needs scores and boxes outputs"));
        }
        let scores = outputs[0]
            .to_array_view::<f32>()
            .context("face scores tensor was not f32")?;
        let boxes = outputs[1]
            .to_array_view::<f32>()
            .context("face boxes tensor was not f32")?;
        let count = ultraface_count(scores.shape(), boxes.shape())?;

        let (w, h) = (self.width as f32, self.height as f32);
        let mut candidates = Vec::new();
        for i in 0..count {
            let score = scores[[0, i, 1]];
            if score < self.score_threshold {
                continue;
            }
            candidates.push(DetectionResult::new(
                "face",
                score,
                BoundingBox::from_corners(
                    boxes[[0, i, 0]] * w,
                    boxes[[0, i, 1]] * h,
                    boxes[[0, i, 2]] * w,
                    boxes[[0, i, 3]] * h,
                ),
            ));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }

    fn decode_classifier(&self, outputs: &TVec<TValue>) -> Result<Vec<DetectionResult>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let logits: Vec<f32> = output
            .to_array_view::<f32>()
            .context("classifier output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return Ok(Vec::new());
        }
        let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        let person = exps.get(self.person_class).copied().unwrap_or(0.0) / total;
        if person < self.score_threshold {
            return Ok(Vec::new());
        }
        Ok(vec![DetectionResult::new(
            "person",
            person,
            BoundingBox::new(0.0, 0.0, self.width as f32, self.height as f32),
        )])
    }
}

/// Layout of a YOLO output, `[1, 4 + C, N]` or, with the anchors first, `[1, N, 4 + C]`.
/// Returns `(transposed, anchors)`.
fn yolo_layout(shape: &[usize], person_class: usize) -> Result<(bool, usize)> {
    let [1, a, b] = shape else {
        return Err(anyhow!("unexpected detector output shape {:?}", shape));
    };
    let transposed = a > b;
    let (attrs, anchors) = if transposed { (*b, *a) } else { (*a, *b) };
    if attrs <= 4 + person_class {
        return Err(anyhow!("detector output has {} attributes", attrs));
    }
    Ok((transposed, anchors))
}

/// Number of candidates in UltraFace scores `[1, N, >=2]` and boxes `[1, N, >=4]`.
fn ultraface_count(scores: &[usize], boxes: &[usize]) -> Result<usize> {
    match (scores, boxes) {
        ([1, n, classes], [1, m, coords]) if n == m && *classes >= 2 && *coords >= 4 => Ok(*n),
        _ => Err(anyhow!(
            "face output mismatch: scores {:?} boxes {:?}, expected [1, N, 2] and [1, N, 4]",
            scores,
            boxes
        )),
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionResult>> {
        let input = self.build_input(image);
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract model has been released"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let results = match self.kind {
            CapabilityKind::ObjectDetector => self.decode_yolo(&outputs)?,
            CapabilityKind::FaceDetector => self.decode_ultraface(&outputs)?,
            CapabilityKind::Classifier => self.decode_classifier(&outputs)?,
        };

        // Back from model input space to the caller's image space.
        let sx = image.width() as f32 / self.width as f32;
        let sy = image.height() as f32 / self.height as f32;
        Ok(results
            .into_iter()
            .map(|r| DetectionResult {
                bbox: r.bbox.scaled(sx, sy),
                ..r
            })
            .collect())
    }

    fn release(&mut self) {
        self.model = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ultraface_shapes_are_checked_in_full() {
        assert_eq!(ultraface_count(&[1, 4420, 2], &[1, 4420, 4]).unwrap(), 4420);
        assert!(ultraface_count(&[1, 4420, 1], &[1, 4420, 4]).is_err());
        assert!(ultraface_count(&[1, 4420, 2], &[1, 4420, 3]).is_err());
        assert!(ultraface_count(&[4420, 2], &[4420, 4]).is_err());
        assert!(ultraface_count(&[1, 10, 2], &[1, 12, 4]).is_err());
    }

    #[test]
    fn yolo_layout_detects_transposition() {
        assert_eq!(yolo_layout(&[1, 84, 8400], 0).unwrap(), (false, 8400));
        assert_eq!(yolo_layout(&[1, 8400, 84], 0).unwrap(), (true, 8400));
        assert!(yolo_layout(&[1, 4, 8400], 0).is_err());
        assert!(yolo_layout(&[84, 8400], 0).is_err());
    }
}
