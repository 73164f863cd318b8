use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a rejected launch is re-sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 300,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Settings for the application manager (the `[application]` manifest table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub launch_retry: RetryPolicy,
    /// Wait for a termination event before checking liveness directly
    pub kill_timeout_ms: u64,
    pub worker_thread_name: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            launch_retry: RetryPolicy::default(),
            kill_timeout_ms: 3_000,
            worker_thread_name: "application-worker".to_string(),
        }
    }
}

impl ApplicationConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApplicationConfig::default();
        assert_eq!(config.launch_retry.attempts(), 3);
        assert_eq!(config.launch_retry.backoff(), Duration::from_millis(300));
        assert_eq!(config.kill_timeout(), Duration::from_secs(3));
        assert_eq!(config.worker_thread_name, "application-worker");
    }

    #[test]
    fn test_partial_override() {
        let config: ApplicationConfig =
            serde_json::from_str(r#"{"launch_retry": {"attempts": 0}}"#).unwrap();
        // At least one attempt is always made
        assert_eq!(config.launch_retry.attempts(), 1);
        assert_eq!(config.launch_retry.backoff_ms, 300);
        assert_eq!(config.kill_timeout_ms, 3_000);
    }
}
