use serde::Deserialize;
use sift_watcher::WatcherConfig;

/// Engine settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub watcher: WatcherConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "watcher": { "poll_interval_ms": 25 } }"#).unwrap();
        assert_eq!(config.watcher.poll_interval_ms, 25);
        assert!(!config.watcher.follow_symlinks);

        let empty: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.watcher.poll_interval_ms, 100);
    }
}
