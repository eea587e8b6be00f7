use serde::Serialize;

/// Axis-aligned box in pixel space: top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Build from corner coordinates.
    pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x: x_min,
            y: y_min,
            w: (x_max - x_min).max(0.0),
            h: (y_max - y_min).max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Clip to a `width` x `height` image. `None` when a coordinate is not finite or no
    /// part of the box lies inside the image.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<Self> {
        if ![self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (max_x, max_y) = (width as f32, height as f32);
        let x0 = self.x.clamp(0.0, max_x);
        let y0 = self.y.clamp(0.0, max_y);
        let x1 = (self.x + self.w).clamp(0.0, max_x);
        let y1 = (self.y + self.h).clamp(0.0, max_y);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::from_corners(x0, y0, x1, y1))
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            w: self.w * sx,
            h: self.h * sy,
        }
    }
}

/// One detected subject.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectionResult {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// Drop results with non-finite values and clip the rest to a `bounds` image.
pub fn sanitize_results(
    results: Vec<DetectionResult>,
    bounds: (u32, u32),
) -> Vec<DetectionResult> {
    results
        .into_iter()
        .filter(|r| r.confidence.is_finite())
        .filter_map(|r| {
            let bbox = r.bbox.clipped_to(bounds.0, bounds.1)?;
            Some(DetectionResult { bbox, ..r })
        })
        .collect()
}

/// Intersection over union of two boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy NMS: keep the most confident box, drop overlaps above `iou_threshold`.
pub fn non_max_suppression(
    mut candidates: Vec<DetectionResult>,
    iou_threshold: f32,
) -> Vec<DetectionResult> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<DetectionResult> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
