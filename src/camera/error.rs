use std::io;
use std::time::Duration;

use thiserror::Error;

/// Classified camera acquisition failure.
///
/// None of these are fatal: the negotiator is left without a stream and the caller may
/// retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera busy: {0}")]
    DeviceBusy(String),
    #[error("no camera found")]
    NoDeviceFound,
    #[error("camera acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),
    #[error("camera failure: {0}")]
    Other(String),
}

impl CameraError {
    /// Map an OS error from a device node onto the taxonomy.
    pub fn from_io(device: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => return CameraError::PermissionDenied,
            io::ErrorKind::NotFound => return CameraError::NoDeviceFound,
            _ => {}
        }
        err.raw_os_error()
            .and_then(|code| classify_errno(device, code))
            .unwrap_or_else(|| CameraError::Other(format!("{}: {}", device, err)))
    }

    /// Message for the operator, with the next step to take.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied => {
                "Camera access was denied. Add this user to the 'video' group or grant camera permission, then retry.".to_string()
            }
            CameraError::DeviceBusy(device) => format!(
                "Camera {} is busy. Close other applications using it, then retry.",
                device
            ),
            CameraError::NoDeviceFound => {
                "No camera found. Connect a camera and retry.".to_string()
            }
            CameraError::AcquisitionTimeout(timeout) => format!(
                "The camera did not start within {}s. Reconnect it and retry.",
                timeout.as_secs()
            ),
            CameraError::Other(message) => format!("Camera failed to start: {}", message),
        }
    }
}

// V4L2 is the only backend that produces raw OS errors.
#[cfg(target_os = "linux")]
fn classify_errno(device: &str, code: i32) -> Option<CameraError> {
    match code {
        libc::EBUSY => Some(CameraError::DeviceBusy(device.to_string())),
        libc::EACCES | libc::EPERM => Some(CameraError::PermissionDenied),
        libc::ENOENT | libc::ENODEV | libc::ENXIO => Some(CameraError::NoDeviceFound),
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn classify_errno(_device: &str, _code: i32) -> Option<CameraError> {
    None
}
