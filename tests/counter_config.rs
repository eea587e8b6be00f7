use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use occupancy_counter::config::CounterConfig;
use occupancy_counter::pump::{DEFAULT_MOTION_STRIDE, DEFAULT_MOTION_THRESHOLD};
use occupancy_counter::{ExecutionMode, ResourceTier};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COUNTER_CONFIG",
        "COUNTER_TIER",
        "COUNTER_CAMERA",
        "COUNTER_BACKEND_URL",
        "COUNTER_LOCATION_ID",
        "COUNTER_CAPACITY",
        "COUNTER_DB_PATH",
        "COUNTER_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "tier": "standard",
        "db_path": "counter_prod.db",
        "camera": {
            "device": "/dev/video2",
            "acquire_timeout_ms": 4000
        },
        "models": {
            "object_detector": "/opt/models/yolo.onnx",
            "load_timeout_ms": 12000
        },
        "pump": {
            "execution": "worker",
            "motion_gating": true
        },
        "backend": {
            "url": "http://10.0.0.5:3000/api",
            "location_id": "Lobby",
            "capacity": 40
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_TIER", "constrained");
    std::env::set_var("COUNTER_CAPACITY", "25");
    std::env::set_var("COUNTER_CAMERA", "stub://front_door");

    let cfg = CounterConfig::load().expect("load config");

    assert_eq!(cfg.tier, Some(ResourceTier::Constrained));
    assert_eq!(cfg.db_path, "counter_prod.db");
    assert_eq!(cfg.camera.device.as_deref(), Some("stub://front_door"));
    assert_eq!(cfg.camera.acquire_timeout, Duration::from_millis(4000));
    assert_eq!(cfg.models.object_detector, "/opt/models/yolo.onnx");
    assert_eq!(cfg.load_timeout, Duration::from_millis(12000));
    assert_eq!(cfg.pump.execution, ExecutionMode::Worker);
    assert!(cfg.pump.motion_gating);
    assert_eq!(cfg.pump.motion_stride, DEFAULT_MOTION_STRIDE);
    assert_eq!(cfg.pump.motion_threshold, DEFAULT_MOTION_THRESHOLD);
    assert_eq!(cfg.backend.url.as_deref(), Some("http://10.0.0.5:3000/api"));
    assert_eq!(cfg.backend.location_id, "lobby");
    assert_eq!(cfg.backend.capacity, Some(25));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        db_path = "edge.db"

        [backend]
        location_id = "garage"
        near_ratio = 0.9

        [overlay]
        font_path = "/usr/share/fonts/DejaVuSans.ttf"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_DB_PATH", "override.db");

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.backend.location_id, "garage");
    assert!((cfg.backend.near_ratio - 0.9).abs() < f32::EPSILON);
    assert!(cfg.overlay.font_path.is_some());
    assert!(cfg.backend.url.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COUNTER_CAPACITY", "plenty");
    assert!(CounterConfig::load().is_err());
    clear_env();

    std::env::set_var("COUNTER_BACKEND_URL", "ftp://counts.local");
    assert!(CounterConfig::load().is_err());
    clear_env();

    std::env::set_var("COUNTER_TIER", "turbo");
    assert!(CounterConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COUNTER_CONFIG", "/nonexistent/counter.json");
    let err = CounterConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
