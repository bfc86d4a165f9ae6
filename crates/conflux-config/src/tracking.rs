use std::time::Duration;

use serde::Deserialize;

/// Bounds for the in-memory request tracking store
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    /// Maximum number of trackers kept before the oldest is evicted
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Trackers older than this many hours are evicted
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl TrackingConfig {
    /// Retention window as a duration
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            retention_hours: default_retention_hours(),
        }
    }
}

const fn default_max_size() -> usize {
    1000
}

const fn default_retention_hours() -> u64 {
    24
}
