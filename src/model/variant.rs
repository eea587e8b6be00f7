use crate::detect::CapabilityKind;
use crate::tier::ResourceTier;

/// One loadable model configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelVariant {
    /// Stable name used in logs and load-failure reports.
    pub name: String,
    pub kind: CapabilityKind,
    /// Model location: a file path, or `stub://...` for the stub backend.
    pub source: String,
    /// Native input size (width, height).
    pub input_size: (u32, u32),
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

impl ModelVariant {
    fn new(
        name: &str,
        kind: CapabilityKind,
        source: &str,
        input_size: (u32, u32),
        score_threshold: f32,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            source: source.to_string(),
            input_size,
            score_threshold,
            iou_threshold: 0.45,
        }
    }
}

/// Where each model family lives.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelsConfig {
    pub object_detector: String,
    pub object_detector_lite: String,
    pub classifier: String,
    pub face_detector: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            object_detector: "models/yolov8n-320.onnx".to_string(),
            object_detector_lite: "models/yolov8n-256.onnx".to_string(),
            classifier: "models/mobilenet-person.onnx".to_string(),
            face_detector: "models/ultraface-slim-128.onnx".to_string(),
        }
    }
}

impl ModelsConfig {
    /// Every family served by the stub backend reporting `people` subjects.
    pub fn stub(people: usize) -> Self {
        Self {
            object_detector: format!("stub://object?people={}", people),
            object_detector_lite: format!("stub://object-lite?people={}", people),
            classifier: format!("stub://classifier?people={}", people.min(1)),
            face_detector: format!("stub://face?people={}", people),
        }
    }
}

/// Ordered variants to try for `tier`, most capable first.
///
/// Constrained hosts only ever get the lightweight face detector at its smallest input
/// and a relaxed threshold. Standard hosts start with the full object detector and fall
/// back through a lighter detector and a whole-frame classifier to the face detector.
pub fn selection_plan(tier: ResourceTier, models: &ModelsConfig) -> Vec<ModelVariant> {
    match tier {
        ResourceTier::Constrained => vec![ModelVariant::new(
            "face-detector-lite",
            CapabilityKind::FaceDetector,
            &models.face_detector,
            (128, 96),
            0.35,
        )],
        ResourceTier::Standard => vec![
            ModelVariant::new(
                "object-detector",
                CapabilityKind::ObjectDetector,
                &models.object_detector,
                (320, 320),
                0.5,
            ),
            ModelVariant::new(
                "object-detector-lite",
                CapabilityKind::ObjectDetector,
                &models.object_detector_lite,
                (256, 256),
                0.45,
            ),
            ModelVariant::new(
                "classifier",
                CapabilityKind::Classifier,
                &models.classifier,
                (224, 224),
                0.5,
            ),
            ModelVariant::new(
                "face-detector",
                CapabilityKind::FaceDetector,
                &models.face_detector,
                (128, 96),
                0.35,
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constrained_plan_is_single_lightweight_variant() {
        let plan = selection_plan(ResourceTier::Constrained, &ModelsConfig::default());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, CapabilityKind::FaceDetector);
        assert_eq!(plan[0].input_size, (128, 96));
        assert!(plan[0].score_threshold < 0.5);
    }

    #[test]
    fn standard_plan_ends_with_emergency_face_detector() {
        let plan = selection_plan(ResourceTier::Standard, &ModelsConfig::default());
        let names: Vec<&str> = plan.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            ["object-detector", "object-detector-lite", "classifier", "face-detector"]
        );
        // inputs shrink (or hold) along the chain
        for pair in plan.windows(2) {
            let a = pair[0].input_size.0 * pair[0].input_size.1;
            let b = pair[1].input_size.0 * pair[1].input_size.1;
            assert!(b <= a);
        }
    }
}
