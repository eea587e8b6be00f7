//! Frames and the drawing surface.
//!
//! - `Canvas`: the owned RGB surface the pump draws every frame onto. Its size follows
//!   the negotiated stream resolution, not the requested one.
//! - `downscale`: shrinks a frame before it is handed to a detector.
//! - `blank`: synthetic minimal input used for model warm-up.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Transient draw failures. These are expected while a stream is still starting up
/// and are swallowed by the pump.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("video frame not ready ({width}x{height})")]
    FrameNotReady { width: u32, height: u32 },
    #[error("canvas surface has zero size")]
    NoSurface,
}

/// Owned RGB drawing surface.
#[derive(Clone, Debug)]
pub struct Canvas {
    surface: RgbImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    /// Resize the surface. Existing pixels are discarded.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbImage::new(width, height);
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.surface
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.surface
    }

    /// Draw a video frame onto the whole surface, scaling when sizes differ.
    pub fn draw_frame(&mut self, frame: &RgbImage) -> Result<(), RenderError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::FrameNotReady { width, height });
        }
        let (cw, ch) = self.surface.dimensions();
        if cw == 0 || ch == 0 {
            return Err(RenderError::NoSurface);
        }

        if (width, height) == (cw, ch) {
            self.surface.copy_from_slice(frame.as_raw());
        } else {
            self.surface = imageops::resize(frame, cw, ch, FilterType::Triangle);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgb([0, 0, 0]);
        }
    }
}

/// Shrink a frame by `scale` (clamped to (0, 1]). Never returns an empty image.
pub fn downscale(frame: &RgbImage, scale: f32) -> RgbImage {
    let scale = if scale.is_finite() {
        scale.clamp(0.01, 1.0)
    } else {
        1.0
    };
    if scale >= 1.0 {
        return frame.clone();
    }
    let width = ((frame.width() as f32 * scale).round() as u32).max(1);
    let height = ((frame.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(frame, width, height, FilterType::Triangle)
}

/// Mid-grey image of the given size.
pub fn blank(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width.max(1), height.max(1), Rgb([128, 128, 128]))
}
