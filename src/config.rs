use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::aggregator::DEFAULT_NEAR_RATIO;
use crate::camera::DEFAULT_ACQUIRE_TIMEOUT;
use crate::model::{ModelsConfig, DEFAULT_LOAD_TIMEOUT};
use crate::pump::{
    ExecutionMode, DEFAULT_MOTION_STRIDE, DEFAULT_MOTION_THRESHOLD, DEFAULT_SLOW_DETECTION,
};
use crate::tier::ResourceTier;

const DEFAULT_DB_PATH: &str = "counter.db";
const DEFAULT_LOCATION_ID: &str = "main-entrance";

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    tier: Option<ResourceTier>,
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    models: Option<ModelsConfigFile>,
    pump: Option<PumpConfigFile>,
    overlay: Option<OverlayConfigFile>,
    backend: Option<BackendConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    object_detector: Option<String>,
    object_detector_lite: Option<String>,
    classifier: Option<String>,
    face_detector: Option<String>,
    load_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PumpConfigFile {
    execution: Option<ExecutionMode>,
    motion_gating: Option<bool>,
    motion_stride: Option<usize>,
    motion_threshold: Option<f32>,
    slow_detection_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    location_id: Option<String>,
    capacity: Option<u32>,
    near_ratio: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// Forced resource tier; detected from the host when unset.
    pub tier: Option<ResourceTier>,
    pub db_path: String,
    pub camera: CameraSettings,
    pub models: ModelsConfig,
    pub load_timeout: Duration,
    pub pump: PumpSettings,
    pub overlay: OverlaySettings,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Explicit device id; the preferred external camera is used when unset.
    pub device: Option<String>,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PumpSettings {
    pub execution: ExecutionMode,
    pub motion_gating: bool,
    pub motion_stride: usize,
    pub motion_threshold: f32,
    pub slow_detection: Duration,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// REST base url; counts stay local when unset.
    pub url: Option<String>,
    pub location_id: String,
    /// Configured capacity, used until the backend reports one.
    pub capacity: Option<u32>,
    pub near_ratio: f32,
}

impl CounterConfig {
    /// Load from `COUNTER_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The configured tier, or the one detected for this host.
    pub fn resource_tier(&self) -> ResourceTier {
        self.tier.unwrap_or_else(ResourceTier::detect)
    }

    fn from_file(file: CounterConfigFile) -> Self {
        let defaults = ModelsConfig::default();
        let camera = file.camera.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let pump = file.pump.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let backend = file.backend.unwrap_or_default();

        Self {
            tier: file.tier,
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera: CameraSettings {
                device: camera.device,
                acquire_timeout: camera
                    .acquire_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT),
            },
            models: ModelsConfig {
                object_detector: models.object_detector.unwrap_or(defaults.object_detector),
                object_detector_lite: models
                    .object_detector_lite
                    .unwrap_or(defaults.object_detector_lite),
                classifier: models.classifier.unwrap_or(defaults.classifier),
                face_detector: models.face_detector.unwrap_or(defaults.face_detector),
            },
            load_timeout: models
                .load_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOAD_TIMEOUT),
            pump: PumpSettings {
                execution: pump.execution.unwrap_or_default(),
                motion_gating: pump.motion_gating.unwrap_or(false),
                motion_stride: pump.motion_stride.unwrap_or(DEFAULT_MOTION_STRIDE),
                motion_threshold: pump.motion_threshold.unwrap_or(DEFAULT_MOTION_THRESHOLD),
                slow_detection: pump
                    .slow_detection_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_SLOW_DETECTION),
            },
            overlay: OverlaySettings {
                font_path: overlay.font_path,
            },
            backend: BackendSettings {
                url: backend.url,
                location_id: backend
                    .location_id
                    .unwrap_or_else(|| DEFAULT_LOCATION_ID.to_string()),
                capacity: backend.capacity,
                near_ratio: backend.near_ratio.unwrap_or(DEFAULT_NEAR_RATIO),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(tier) = std::env::var("COUNTER_TIER") {
            if !tier.trim().is_empty() {
                self.tier = Some(tier.parse()?);
            }
        }
        if let Ok(device) = std::env::var("COUNTER_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = Some(device);
            }
        }
        if let Ok(url) = std::env::var("COUNTER_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.url = Some(url);
            }
        }
        if let Ok(location_id) = std::env::var("COUNTER_LOCATION_ID") {
            if !location_id.trim().is_empty() {
                self.backend.location_id = location_id;
            }
        }
        if let Ok(capacity) = std::env::var("COUNTER_CAPACITY") {
            let capacity: u32 = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("COUNTER_CAPACITY must be a non-negative integer"))?;
            self.backend.capacity = Some(capacity);
        }
        if let Ok(path) = std::env::var("COUNTER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(path) = std::env::var("COUNTER_FONT_PATH") {
            if !path.trim().is_empty() {
                self.overlay.font_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let location_id = self.backend.location_id.trim().to_lowercase();
        if location_id.is_empty()
            || !location_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!(
                "location id '{}' must be non-empty and use only letters, digits, '-' or '_'",
                self.backend.location_id
            ));
        }
        self.backend.location_id = location_id;

        if let Some(url) = &self.backend.url {
            let parsed = Url::parse(url).map_err(|e| anyhow!("invalid backend url {}: {}", url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("backend url must be http or https"));
            }
        }
        if !(self.backend.near_ratio > 0.0 && self.backend.near_ratio <= 1.0) {
            return Err(anyhow!("near_ratio must be in (0, 1]"));
        }
        if self.camera.acquire_timeout.is_zero() {
            return Err(anyhow!("camera acquire timeout must be greater than zero"));
        }
        if self.load_timeout.is_zero() {
            return Err(anyhow!("model load timeout must be greater than zero"));
        }
        if self.pump.motion_stride == 0 {
            return Err(anyhow!("motion_stride must be greater than zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> Result<()> {
        let mut cfg = CounterConfig::from_file(CounterConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.pump.execution, ExecutionMode::Inline);
        assert!(!cfg.pump.motion_gating);
        assert_eq!(cfg.camera.acquire_timeout, Duration::from_secs(10));
        assert_eq!(cfg.load_timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn rejects_bad_location_and_ratio() {
        let mut cfg = CounterConfig::from_file(CounterConfigFile::default());
        cfg.backend.location_id = "lobby/../admin".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = CounterConfig::from_file(CounterConfigFile::default());
        cfg.backend.near_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }
}
