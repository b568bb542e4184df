//! Client configuration.

use std::time::Duration;

pub const URL_VAR: &str = "PANE_SYNC_URL";
pub const INITIAL_BACKOFF_VAR: &str = "PANE_SYNC_INITIAL_BACKOFF_MS";
pub const MAX_BACKOFF_VAR: &str = "PANE_SYNC_MAX_BACKOFF_MS";

/// Sync client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the authority
    pub server_url: String,
    /// Delay before the first reconnect attempt
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay (None = keep doubling)
    pub max_backoff: Option<Duration>,
    /// Capacity of the command channel into the client loop
    pub command_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws".to_string(),
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Some(Duration::from_secs(30)),
            command_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PANE_SYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(URL_VAR) {
            config.server_url = url;
        }
        if let Some(ms) = millis(&lookup, INITIAL_BACKOFF_VAR) {
            config.initial_backoff = ms;
        }
        if let Some(raw) = lookup(MAX_BACKOFF_VAR) {
            // 0 disables the cap
            match raw.trim().parse::<u64>() {
                Ok(0) => config.max_backoff = None,
                Ok(ms) => config.max_backoff = Some(Duration::from_millis(ms)),
                Err(_) => log::warn!("Ignoring {}={:?}: not a number", MAX_BACKOFF_VAR, raw),
            }
        }
        config
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "ws://127.0.0.1:8000/ws");
        assert_eq!(config.initial_backoff, Duration::from_millis(1000));
        assert_eq!(config.max_backoff, Some(Duration::from_secs(30)));
        assert_eq!(config.command_capacity, 256);
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (URL_VAR, "ws://example.test/ws"),
            (INITIAL_BACKOFF_VAR, "250"),
            (MAX_BACKOFF_VAR, "0"),
        ]));
        assert_eq!(config.server_url, "ws://example.test/ws");
        assert_eq!(config.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.max_backoff, None);
    }

    #[test]
    fn test_bad_numbers_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            (INITIAL_BACKOFF_VAR, "soon"),
            (MAX_BACKOFF_VAR, "-1"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
