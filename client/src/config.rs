//! Client configuration, validated once at startup

use maze_shared::{SessionConfig, DEFAULT_HELLO_INTERVAL_MS, DEFAULT_MAX_PING_MS, DEFAULT_PORT};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("hello interval {hello:?} must be shorter than max ping {max_ping:?}")]
    HelloTooSlow { hello: Duration, max_ping: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the control channel
    pub server: String,
    /// Idle time after which a heartbeat is sent
    pub hello_interval: Duration,
    /// Longest wait for any answer from the server
    pub max_ping: Duration,
    pub nick: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
            hello_interval: Duration::from_millis(DEFAULT_HELLO_INTERVAL_MS),
            max_ping: Duration::from_millis(DEFAULT_MAX_PING_MS),
            nick: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.hello_interval.is_zero() {
            return Err(ConfigError::Zero("hello_interval"));
        }
        if self.max_ping.is_zero() {
            return Err(ConfigError::Zero("max_ping"));
        }
        // a heartbeat must go out before the server gives up on us
        if self.hello_interval >= self.max_ping {
            return Err(ConfigError::HelloTooSlow {
                hello: self.hello_interval,
                max_ping: self.max_ping,
            });
        }
        Ok(self)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig::initiator(self.hello_interval, self.max_ping)
    }
}
