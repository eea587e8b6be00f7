use image::RgbImage;

/// Default sampling stride, in pixels.
pub const DEFAULT_MOTION_STRIDE: usize = 16;

/// Default mean absolute luma delta that counts as motion.
pub const DEFAULT_MOTION_THRESHOLD: f32 = 6.0;

/// Cheap frame-difference gate that skips detection on a static scene.
///
/// Compares a sparse luma sample of the current frame against the sample taken at the
/// last frame that passed the gate. Slow drift therefore still accumulates into a pass.
#[derive(Clone, Debug)]
pub struct MotionGate {
    stride: usize,
    threshold: f32,
    reference: Option<Vec<u8>>,
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_STRIDE, DEFAULT_MOTION_THRESHOLD)
    }
}

impl MotionGate {
    /// Sample every `stride`-th pixel; pass when the mean absolute luma delta reaches
    /// `threshold` (0-255 scale).
    pub fn new(stride: usize, threshold: f32) -> Self {
        Self {
            stride: stride.max(1),
            threshold: threshold.max(0.0),
            reference: None,
        }
    }

    /// True when the frame differs enough from the last passing frame.
    pub fn should_detect(&mut self, frame: &RgbImage) -> bool {
        let sample = self.sample(frame);
        let changed = match &self.reference {
            Some(reference) if reference.len() == sample.len() && !sample.is_empty() => {
                let total: u64 = reference
                    .iter()
                    .zip(&sample)
                    .map(|(a, b)| u64::from(a.abs_diff(*b)))
                    .sum();
                total as f32 / sample.len() as f32 >= self.threshold
            }
            _ => true,
        };
        if changed {
            self.reference = Some(sample);
        }
        changed
    }

    fn sample(&self, frame: &RgbImage) -> Vec<u8> {
        frame
            .pixels()
            .step_by(self.stride)
            .map(|p| {
                let [r, g, b] = p.0;
                ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn static_scene_is_skipped_until_it_changes() {
        let mut gate = MotionGate::new(4, 5.0);
        let dark = RgbImage::from_pixel(32, 32, Rgb([20, 20, 20]));
        let bright = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));

        assert!(gate.should_detect(&dark));
        assert!(!gate.should_detect(&dark));
        assert!(gate.should_detect(&bright));
        assert!(!gate.should_detect(&bright));
    }

    #[test]
    fn resolution_change_passes() {
        let mut gate = MotionGate::default();
        assert!(gate.should_detect(&RgbImage::new(64, 64)));
        assert!(gate.should_detect(&RgbImage::new(32, 32)));
    }
}
