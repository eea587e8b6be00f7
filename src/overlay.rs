//! Detection overlay.
//!
//! Paints one hollow box per detection, coloured by confidence band, an optional text
//! label and a count summary in the top-left corner. Rendering is stateless: every call
//! draws from the results it is given, so the pump can redraw the last good results when
//! a detection fails.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::DetectionResult;
use crate::frame::Canvas;

const STRONG: Rgb<u8> = Rgb([46, 204, 64]);
const MEDIUM: Rgb<u8> = Rgb([255, 176, 0]);
const WEAK: Rgb<u8> = Rgb([231, 48, 42]);
const SUMMARY_BG: Rgb<u8> = Rgb([20, 20, 20]);
const SUMMARY_FG: Rgb<u8> = Rgb([240, 240, 240]);

/// Pips drawn in the summary block when no font is configured.
const MAX_PIPS: usize = 20;

/// Confidence bucket used for box colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// >= 0.8
    Strong,
    /// >= 0.6
    Medium,
    Weak,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            ConfidenceBand::Strong
        } else if confidence >= 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Weak
        }
    }

    pub fn color(self) -> Rgb<u8> {
        match self {
            ConfidenceBand::Strong => STRONG,
            ConfidenceBand::Medium => MEDIUM,
            ConfidenceBand::Weak => WEAK,
        }
    }
}

/// Multipliers from detection-input space to canvas space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

impl ScaleFactors {
    pub fn identity() -> Self {
        Self { x: 1.0, y: 1.0 }
    }

    /// Factors mapping an image of size `from` onto one of size `to`.
    pub fn between(from: (u32, u32), to: (u32, u32)) -> Self {
        let axis = |src: u32, dst: u32| {
            if src == 0 {
                1.0
            } else {
                dst as f32 / src as f32
            }
        };
        Self {
            x: axis(from.0, to.0),
            y: axis(from.1, to.1),
        }
    }
}

/// Map boxes found on an image of size `from` onto an image of size `to`.
pub fn rescale_results(
    results: &[DetectionResult],
    from: (u32, u32),
    to: (u32, u32),
) -> Vec<DetectionResult> {
    let scale = ScaleFactors::between(from, to);
    results
        .iter()
        .map(|r| DetectionResult {
            bbox: r.bbox.scaled(scale.x, scale.y),
            ..r.clone()
        })
        .collect()
}

#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    /// Boxes and summary pips only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for labels.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("parse font {}", path.display()))?;
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `results` (in detection-input space) onto `canvas`.
    pub fn render(&self, canvas: &mut Canvas, results: &[DetectionResult], scale: ScaleFactors) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let image = canvas.image_mut();
        for result in results {
            self.draw_detection(image, result, scale);
        }
        self.draw_summary(image, results.len());
    }

    fn draw_detection(&self, image: &mut RgbImage, result: &DetectionResult, scale: ScaleFactors) {
        let Some(bbox) = result
            .bbox
            .scaled(scale.x, scale.y)
            .clipped_to(image.width(), image.height())
        else {
            return;
        };
        let color = ConfidenceBand::from_confidence(result.confidence).color();
        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = bbox.w.round().max(1.0) as u32;
        let h = bbox.h.round().max(1.0) as u32;

        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
        if w > 2 && h > 2 {
            let inner = Rect::at(x.saturating_add(1), y.saturating_add(1)).of_size(w - 2, h - 2);
            draw_hollow_rect_mut(image, inner, color);
        }

        if let Some(font) = &self.font {
            let text = format!("{} {:.0}%", result.label, result.confidence * 100.0);
            let label_y = if y >= 16 { y - 16 } else { y.saturating_add(2) };
            let label_x = x.saturating_add(2);
            draw_text_mut(image, color, label_x, label_y, PxScale::from(14.0), font, &text);
        }
    }

    fn draw_summary(&self, image: &mut RgbImage, count: usize) {
        match &self.font {
            Some(font) => {
                let text = format!("People: {}", count);
                draw_filled_rect_mut(image, Rect::at(4, 4).of_size(120, 24), SUMMARY_BG);
                draw_text_mut(image, SUMMARY_FG, 10, 8, PxScale::from(16.0), font, &text);
            }
            None => {
                let pips = count.min(MAX_PIPS) as i32;
                let block_width = (8 + pips * 8).max(16) as u32;
                draw_filled_rect_mut(image, Rect::at(4, 4).of_size(block_width, 14), SUMMARY_BG);
                for i in 0..pips {
                    draw_filled_rect_mut(image, Rect::at(8 + i * 8, 8).of_size(5, 6), SUMMARY_FG);
                }
            }
        }
    }
}
