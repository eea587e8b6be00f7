use std::sync::Arc;
use std::time::Duration;

use occupancy_counter::{
    select_preferred_device, CameraError, Canvas, CapabilityNegotiator, DeviceDescriptor,
    ResourceTier, SyntheticCamera,
};

fn devices(labels: &[(&str, &str)]) -> Vec<DeviceDescriptor> {
    labels
        .iter()
        .map(|(id, label)| DeviceDescriptor::new(*id, *label))
        .collect()
}

#[test]
fn external_camera_is_preferred() {
    let list = devices(&[
        ("stub://laptop", "FaceTime HD Camera (Built-in)"),
        ("stub://usb", "Logitech C920"),
    ]);
    assert_eq!(select_preferred_device(&list).unwrap().id, "stub://usb");

    let built_in_only = devices(&[
        ("stub://a", "Integrated Webcam (internal)"),
        ("stub://b", "Built-in iSight"),
    ]);
    assert_eq!(select_preferred_device(&built_in_only).unwrap().id, "stub://a");

    assert_eq!(select_preferred_device(&[]), Err(CameraError::NoDeviceFound));
}

#[test]
fn previous_tracks_are_stopped_before_each_acquisition() {
    let camera = SyntheticCamera::new(devices(&[("stub://door", "door")])).with_tracks_per_stream(2);
    let mut negotiator = CapabilityNegotiator::new(Arc::new(camera.clone()));
    let mut canvas = Canvas::new(0, 0);
    let device = DeviceDescriptor::new("stub://door", "door");

    for round in 1..=3u64 {
        negotiator
            .acquire_stream(&device, ResourceTier::Standard, &mut canvas)
            .unwrap();
        let stats = camera.stats();
        // everything acquired in earlier rounds has been stopped
        assert_eq!(stats.tracks_stopped, (round - 1) * 2);
        assert_eq!(stats.live_tracks(), 2);
    }

    negotiator.release_stream();
    assert_eq!(camera.stats().live_tracks(), 0);
}

#[test]
fn enumeration_failure_yields_empty_list() {
    let camera = SyntheticCamera::single("stub://door");
    camera.fail_enumeration(CameraError::PermissionDenied);
    let negotiator = CapabilityNegotiator::new(Arc::new(camera));

    let list = negotiator.list_cameras();
    assert!(list.is_empty());
    assert_eq!(
        negotiator.select_preferred_device(&list),
        Err(CameraError::NoDeviceFound)
    );
}

#[test]
fn constraint_tightening_failure_is_not_fatal() {
    let camera = SyntheticCamera::single("stub://door").rejecting_constraints();
    let mut negotiator = CapabilityNegotiator::new(Arc::new(camera));
    let mut canvas = Canvas::new(0, 0);

    let state = negotiator
        .acquire_stream(
            &DeviceDescriptor::new("stub://door", "door"),
            ResourceTier::Constrained,
            &mut canvas,
        )
        .unwrap();
    assert_eq!((state.width, state.height), (640, 480));
    assert!(state.frame_rate_target <= 15);
    assert_eq!(canvas.dimensions(), (640, 480));
}

#[test]
fn every_failure_is_classified() {
    let camera = SyntheticCamera::single("stub://door");
    let mut negotiator = CapabilityNegotiator::new(Arc::new(camera.clone()))
        .with_acquire_timeout(Duration::from_secs(2));
    let mut canvas = Canvas::new(0, 0);
    let device = DeviceDescriptor::new("stub://door", "door");

    for err in [
        CameraError::PermissionDenied,
        CameraError::DeviceBusy("stub://door".to_string()),
        CameraError::Other("driver exploded".to_string()),
    ] {
        camera.fail_next_open(err.clone());
        let got = negotiator
            .acquire_stream(&device, ResourceTier::Standard, &mut canvas)
            .unwrap_err();
        assert_eq!(got, err);
        assert!(!got.user_message().is_empty());
    }

    let missing = DeviceDescriptor::new("stub://garage", "garage");
    assert_eq!(
        negotiator
            .acquire_stream(&missing, ResourceTier::Standard, &mut canvas)
            .unwrap_err(),
        CameraError::NoDeviceFound
    );

    // still usable afterwards
    negotiator
        .acquire_stream(&device, ResourceTier::Standard, &mut canvas)
        .unwrap();
    assert!(negotiator.is_streaming());
}
