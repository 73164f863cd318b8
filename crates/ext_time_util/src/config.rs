use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the time utility service (the `[time_util]` manifest table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeUtilConfig {
    /// Symlink into the zoneinfo database naming the system zone
    pub localtime_path: PathBuf,
    /// Locale for localized renderings; the system locale when unset
    pub locale: Option<String>,
    /// Use the 24-hour clock in time patterns
    pub time_format_24h: bool,
    /// Poll period of the clock/zone change watcher, 0 disables it
    pub watch_interval_ms: u64,
}

impl Default for TimeUtilConfig {
    fn default() -> Self {
        Self {
            localtime_path: PathBuf::from("/etc/localtime"),
            locale: None,
            time_format_24h: false,
            watch_interval_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_uses_defaults() {
        let config: TimeUtilConfig = serde_json::from_str(r#"{"time_format_24h": true}"#).unwrap();
        assert!(config.time_format_24h);
        assert_eq!(config.localtime_path, PathBuf::from("/etc/localtime"));
        assert_eq!(config.watch_interval_ms, 1_000);
        assert_eq!(config.locale, None);
    }
}
