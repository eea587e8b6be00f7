use super::{CameraError, DeviceDescriptor};

const BUILT_IN_MARKERS: [&str; 3] = ["built-in", "internal", "facetime"];

/// True when a label looks like a laptop/board-integrated camera.
pub fn is_built_in(label: &str) -> bool {
    let label = label.to_lowercase();
    BUILT_IN_MARKERS.iter().any(|marker| label.contains(marker))
}

/// Prefer the first external camera, fall back to the first device.
pub fn select_preferred_device(
    devices: &[DeviceDescriptor],
) -> Result<DeviceDescriptor, CameraError> {
    devices
        .iter()
        .find(|device| !is_built_in(&device.label))
        .or_else(|| devices.first())
        .cloned()
        .ok_or(CameraError::NoDeviceFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_external_camera() {
        let devices = vec![
            DeviceDescriptor::new("/dev/video0", "Integrated Camera (Built-in)"),
            DeviceDescriptor::new("/dev/video2", "Logitech C920"),
        ];
        let chosen = select_preferred_device(&devices).unwrap();
        assert_eq!(chosen.id, "/dev/video2");
    }

    #[test]
    fn falls_back_to_first_built_in() {
        let devices = vec![
            DeviceDescriptor::new("a", "FaceTime HD Camera"),
            DeviceDescriptor::new("b", "Internal webcam"),
        ];
        assert_eq!(select_preferred_device(&devices).unwrap().id, "a");
    }

    #[test]
    fn empty_list_is_no_device() {
        assert_eq!(
            select_preferred_device(&[]),
            Err(CameraError::NoDeviceFound)
        );
    }

    #[test]
    fn unlabeled_devices_count_as_external() {
        assert!(!is_built_in(""));
    }
}
