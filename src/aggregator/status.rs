use std::fmt;

use serde::{Deserialize, Serialize};

/// Default fraction of capacity at which a location counts as nearly full.
pub const DEFAULT_NEAR_RATIO: f32 = 0.8;

/// Occupancy relative to a location's capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyStatus {
    Normal,
    NearCapacity,
    OverCapacity,
}

impl OccupancyStatus {
    /// Classify `count`. Without a capacity every count is `Normal`.
    pub fn from_count(count: usize, capacity: Option<u32>, near_ratio: f32) -> Self {
        let Some(capacity) = capacity else {
            return OccupancyStatus::Normal;
        };
        let capacity = capacity as usize;
        if count > capacity {
            return OccupancyStatus::OverCapacity;
        }
        if capacity == 0 {
            return OccupancyStatus::Normal;
        }
        let ratio = if near_ratio.is_finite() {
            near_ratio.clamp(0.0, 1.0)
        } else {
            DEFAULT_NEAR_RATIO
        };
        // f32 ratios like 0.8 are slightly above their decimal value
        let near_at = (capacity as f64 * f64::from(ratio) - 1e-6).ceil() as usize;
        if count >= near_at.max(1) {
            OccupancyStatus::NearCapacity
        } else {
            OccupancyStatus::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OccupancyStatus::Normal => "normal",
            OccupancyStatus::NearCapacity => "near_capacity",
            OccupancyStatus::OverCapacity => "over_capacity",
        }
    }
}

impl fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        let near = DEFAULT_NEAR_RATIO;
        assert_eq!(OccupancyStatus::from_count(7, Some(10), near), OccupancyStatus::Normal);
        assert_eq!(OccupancyStatus::from_count(8, Some(10), near), OccupancyStatus::NearCapacity);
        assert_eq!(OccupancyStatus::from_count(10, Some(10), near), OccupancyStatus::NearCapacity);
        assert_eq!(OccupancyStatus::from_count(11, Some(10), near), OccupancyStatus::OverCapacity);
    }

    #[test]
    fn unknown_or_zero_capacity() {
        assert_eq!(OccupancyStatus::from_count(500, None, 0.8), OccupancyStatus::Normal);
        assert_eq!(OccupancyStatus::from_count(0, Some(0), 0.8), OccupancyStatus::Normal);
        assert_eq!(OccupancyStatus::from_count(1, Some(0), 0.8), OccupancyStatus::OverCapacity);
        // an empty room is never near capacity
        assert_eq!(OccupancyStatus::from_count(0, Some(1), 0.0), OccupancyStatus::Normal);
    }
}
