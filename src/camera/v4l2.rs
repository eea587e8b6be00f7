//! V4L2 camera backend.
//!
//! Enumerates `/dev/video*` capture nodes and opens them through libv4l with an mmap
//! buffer stream. The device is asked for RGB3 at the tier's ideal size and frame
//! rate; whatever the driver actually grants is reported back as the negotiated
//! settings. OS errors are classified into the camera error taxonomy.

use std::io;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{
    CameraBackend, CameraError, DeviceDescriptor, StreamConstraints, StreamSettings, VideoStream,
};

const MMAP_BUFFERS: u32 = 4;

#[derive(Clone, Debug, Default)]
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().display().to_string();
            let label = node.name().unwrap_or_default();
            match v4l::Device::with_path(node.path()).and_then(|dev| dev.query_caps()) {
                Ok(caps) => {
                    if !caps
                        .capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    {
                        continue;
                    }
                }
                Err(err) => {
                    // Still listed: a node we may not query yet can become usable once
                    // permission is granted.
                    log::debug!("V4l2Camera: cannot query {}: {}", path, err);
                }
            }
            devices.push(DeviceDescriptor::new(path, label));
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    fn open(
        &self,
        device: &DeviceDescriptor,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let classify = |err: io::Error| CameraError::from_io(&device.id, &err);

        let mut handle = v4l::Device::with_path(&device.id).map_err(classify)?;
        let mut format = handle.format().map_err(classify)?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match handle.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", device.id, err);
                handle.format().map_err(classify)?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            CameraError::Other(format!(
                "{} delivers unsupported pixel format {}",
                device.id, format.fourcc
            ))
        })?;

        let mut frame_rate = constraints.frame_rate;
        if constraints.frame_rate > 0 {
            let params = v4l::video::capture::Parameters::with_fps(constraints.frame_rate);
            match handle.set_params(&params) {
                Ok(granted) => frame_rate = fps_from_interval(&granted.interval, frame_rate),
                Err(err) => {
                    log::warn!("V4l2Camera: failed to set fps on {}: {}", device.id, err);
                }
            }
        }

        let state = V4l2StateTryBuilder {
            device: handle,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
            },
        }
        .try_build()
        .map_err(classify)?;

        Ok(Box::new(V4l2Stream {
            device_id: device.id.clone(),
            state: Some(state),
            pixel_format,
            settings: StreamSettings {
                width: format.width,
                height: format.height,
                frame_rate,
            },
        }))
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    device_id: String,
    state: Option<V4l2State>,
    pixel_format: PixelFormat,
    settings: StreamSettings,
}

impl VideoStream for V4l2Stream {
    fn settings(&self) -> StreamSettings {
        self.settings
    }

    fn apply_constraints(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError> {
        use v4l::video::Capture;

        if self.state.is_none() {
            return Err(CameraError::Other(format!("{} is stopped", self.device_id)));
        }
        // The streaming handle is mutably borrowed by the mmap stream; parameters go
        // through a second handle on the same node.
        let classify = |err: io::Error| CameraError::from_io(&self.device_id, &err);
        let control = v4l::Device::with_path(&self.device_id).map_err(classify)?;
        let params = v4l::video::capture::Parameters::with_fps(constraints.frame_rate.max(1));
        let granted = control.set_params(&params).map_err(classify)?;
        self.settings.frame_rate = fps_from_interval(&granted.interval, constraints.frame_rate);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (
            self.settings.width,
            self.settings.height,
            self.pixel_format,
        );
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 stream {} stopped", self.device_id))?;
        state.with_stream_mut(|stream| {
            let (buf, _meta) = stream.next().context("capture v4l2 frame")?;
            normalize_to_rgb(buf, width, height, format)
        })
    }

    fn track_count(&self) -> usize {
        usize::from(self.state.is_some())
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: stopped {}", self.device_id);
        }
    }

    fn is_live(&self) -> bool {
        self.state.is_some()
    }
}

fn fps_from_interval(interval: &v4l::Fraction, fallback: u32) -> u32 {
    if interval.numerator == 0 {
        return fallback;
    }
    (interval.denominator / interval.numerator).max(1)
}
