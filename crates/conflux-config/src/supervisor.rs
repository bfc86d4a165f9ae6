use std::time::Duration;

use serde::Deserialize;

/// Timings used while starting and stopping service backends
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Timeout of a single health check request
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// Pause between health check attempts
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a terminated process may take to exit before it is killed
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Extra time granted on top of the longest startup timeout when
    /// joining parallel service startups
    #[serde(default = "default_join_grace_ms")]
    pub join_grace_ms: u64,
}

impl SupervisorConfig {
    pub const fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub const fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_timeout_ms: default_health_check_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            join_grace_ms: default_join_grace_ms(),
        }
    }
}

const fn default_health_check_timeout_ms() -> u64 {
    2_000
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_shutdown_grace_ms() -> u64 {
    5_000
}

const fn default_join_grace_ms() -> u64 {
    5_000
}
