//! Host resource tiers.
//!
//! The tier is decided once at startup from coarse platform hints and drives every
//! quality/latency tradeoff downstream: camera resolution, render ceiling, detection
//! cadence, detection input scale and the model fallback plan.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::camera::StreamConstraints;

/// Hosts with this many logical cores or fewer are treated as constrained.
const CONSTRAINED_MAX_CORES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    Constrained,
    Standard,
}

impl ResourceTier {
    /// Classify the current host.
    pub fn detect() -> Self {
        Self::from_hints(&PlatformHints::current())
    }

    /// Classify from explicit hints.
    ///
    /// Single-board computers show up either as low core counts or as ARM Linux; both
    /// are treated as constrained.
    pub fn from_hints(hints: &PlatformHints) -> Self {
        let few_cores = hints.logical_cores <= CONSTRAINED_MAX_CORES;
        let arm_linux = hints.os == "linux" && matches!(hints.arch.as_str(), "arm" | "aarch64");
        if few_cores || arm_linux {
            ResourceTier::Constrained
        } else {
            ResourceTier::Standard
        }
    }

    pub fn is_constrained(self) -> bool {
        matches!(self, ResourceTier::Constrained)
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceTier::Constrained => f.write_str("constrained"),
            ResourceTier::Standard => f.write_str("standard"),
        }
    }
}

impl FromStr for ResourceTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constrained" | "low" => Ok(ResourceTier::Constrained),
            "standard" | "high" => Ok(ResourceTier::Standard),
            other => Err(anyhow!(
                "unknown resource tier '{}'; expected constrained or standard",
                other
            )),
        }
    }
}

/// Coarse platform facts used for tier detection.
#[derive(Clone, Debug)]
pub struct PlatformHints {
    pub logical_cores: usize,
    pub os: String,
    pub arch: String,
}

impl PlatformHints {
    pub fn current() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            logical_cores,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Per-tier tuning for the frame pump and camera.
#[derive(Clone, Debug, PartialEq)]
pub struct TierProfile {
    /// Render ceiling.
    pub max_fps: u32,
    /// Minimum time between detection starts.
    pub detection_interval: Duration,
    /// Scale applied to the frame before detection (0 < scale <= 1).
    pub detection_scale: f32,
    /// Ideal camera constraints requested at acquisition.
    pub camera: StreamConstraints,
    /// Set once the pump has self-downgraded.
    pub downgraded: bool,
}

impl TierProfile {
    pub fn for_tier(tier: ResourceTier) -> Self {
        match tier {
            ResourceTier::Constrained => Self {
                max_fps: 15,
                detection_interval: Duration::from_millis(1000),
                detection_scale: 0.5,
                camera: StreamConstraints {
                    width: 640,
                    height: 480,
                    frame_rate: 15,
                },
                downgraded: false,
            },
            ResourceTier::Standard => Self {
                max_fps: 30,
                detection_interval: Duration::from_millis(500),
                detection_scale: 0.75,
                camera: StreamConstraints {
                    width: 1280,
                    height: 720,
                    frame_rate: 30,
                },
                downgraded: false,
            },
        }
    }

    /// Lower-throughput profile used after a slow detection on a constrained host.
    pub fn downgraded(&self) -> Self {
        Self {
            max_fps: self.max_fps.min(8),
            detection_interval: self.detection_interval.max(Duration::from_millis(2000)),
            detection_scale: self.detection_scale.min(0.4),
            camera: self.camera.clone(),
            downgraded: true,
        }
    }

    /// Minimum spacing between processed ticks.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.max_fps.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(cores: usize, os: &str, arch: &str) -> PlatformHints {
        PlatformHints {
            logical_cores: cores,
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    #[test]
    fn classifies_hosts() {
        assert_eq!(
            ResourceTier::from_hints(&hints(4, "linux", "x86_64")),
            ResourceTier::Constrained
        );
        assert_eq!(
            ResourceTier::from_hints(&hints(8, "linux", "aarch64")),
            ResourceTier::Constrained
        );
        assert_eq!(
            ResourceTier::from_hints(&hints(8, "macos", "aarch64")),
            ResourceTier::Standard
        );
        assert_eq!(
            ResourceTier::from_hints(&hints(16, "linux", "x86_64")),
            ResourceTier::Standard
        );
    }

    #[test]
    fn constrained_never_exceeds_standard() {
        let constrained = TierProfile::for_tier(ResourceTier::Constrained);
        let standard = TierProfile::for_tier(ResourceTier::Standard);

        assert!(constrained.max_fps <= standard.max_fps);
        // a longer interval means fewer detections per second
        assert!(constrained.detection_interval >= standard.detection_interval);
        assert!(constrained.detection_scale <= standard.detection_scale);
        assert!(constrained.camera.width <= standard.camera.width);
        assert!(constrained.camera.frame_rate <= standard.camera.frame_rate);
    }

    #[test]
    fn downgrade_only_lowers_throughput() {
        for tier in [ResourceTier::Constrained, ResourceTier::Standard] {
            let base = TierProfile::for_tier(tier);
            let lowered = base.downgraded();
            assert!(lowered.downgraded);
            assert!(lowered.max_fps <= base.max_fps);
            assert!(lowered.detection_interval >= base.detection_interval);
            assert!(lowered.frame_budget() >= base.frame_budget());
        }
    }

    #[test]
    fn parses_tier_names() -> Result<()> {
        assert_eq!("Constrained".parse::<ResourceTier>()?, ResourceTier::Constrained);
        assert_eq!(" standard ".parse::<ResourceTier>()?, ResourceTier::Standard);
        assert!("turbo".parse::<ResourceTier>().is_err());
        Ok(())
    }
}
