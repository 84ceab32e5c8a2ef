use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read from `CHESS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Base URL used to build live-connection endpoints handed to clients.
    pub public_ws_url: String,
    /// How long a lobby waits for an opponent before cancelling.
    pub lobby_wait_timeout: Duration,
    /// Grace period a disconnected player has to come back mid-game.
    pub abandonment_grace: Duration,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// How long a lobby or session stays resident after reaching a terminal state.
    pub terminal_retention: Duration,
    /// Directory for durable entity snapshots; in-memory storage when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            public_ws_url: "ws://127.0.0.1:8080".to_string(),
            lobby_wait_timeout: Duration::from_secs(300),
            abandonment_grace: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
            client_timeout: Duration::from_secs(30),
            terminal_retention: Duration::from_secs(60),
            data_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("CHESS_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup("CHESS_PUBLIC_WS_URL") {
            config.public_ws_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("CHESS_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        let seconds = |key: &str, current: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                None => Ok(current),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::Invalid {
                        key: key.to_string(),
                        value: raw,
                        expected: "whole seconds",
                    }),
            }
        };

        config.lobby_wait_timeout = seconds("CHESS_LOBBY_TIMEOUT_SECS", config.lobby_wait_timeout)?;
        config.abandonment_grace = seconds("CHESS_ABANDON_GRACE_SECS", config.abandonment_grace)?;
        config.heartbeat_interval = seconds("CHESS_HEARTBEAT_SECS", config.heartbeat_interval)?;
        config.client_timeout = seconds("CHESS_CLIENT_TIMEOUT_SECS", config.client_timeout)?;
        config.terminal_retention =
            seconds("CHESS_TERMINAL_RETENTION_SECS", config.terminal_retention)?;

        Ok(config)
    }

    pub fn lobby_endpoint(&self, lobby_id: &str) -> String {
        format!("{}/lobbies/{}/ws", self.public_ws_url, lobby_id)
    }

    pub fn session_endpoint(&self, session_id: &str) -> String {
        format!("{}/sessions/{}/ws", self.public_ws_url, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.abandonment_grace, Duration::from_secs(60));
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let vars: HashMap<&str, &str> = [
            ("CHESS_LOBBY_TIMEOUT_SECS", "45"),
            ("CHESS_PUBLIC_WS_URL", "wss://play.example/"),
            ("CHESS_DATA_DIR", "/var/lib/chess"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.lobby_wait_timeout, Duration::from_secs(45));
        assert_eq!(config.session_endpoint("s1"), "wss://play.example/sessions/s1/ws");
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/chess")));
    }

    #[test]
    fn malformed_duration_is_an_error() {
        let err = Config::from_lookup(|k| (k == "CHESS_ABANDON_GRACE_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHESS_ABANDON_GRACE_SECS"));
    }
}
