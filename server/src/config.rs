//! Server configuration, validated once at startup

use maze_shared::{
    SessionConfig, DEFAULT_GAME_SPEED_MS, DEFAULT_MAX_PING_MS, DEFAULT_PLAYER_LIVES, DEFAULT_PORT,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fastest allowed tick
pub const MIN_GAME_SPEED: Duration = Duration::from_millis(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("game speed {0:?} is below the minimum of {min:?}", min = MIN_GAME_SPEED)]
    GameSpeedTooLow(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Longest silence tolerated from a client
    pub max_ping: Duration,
    /// Time a player has to open the game channel after creating or joining a game
    pub lobby_timeout: Duration,
    pub game_speed: Duration,
    pub player_lives: u8,
    pub mazes_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_ping: Duration::from_millis(DEFAULT_MAX_PING_MS),
            lobby_timeout: Duration::from_millis(30000),
            game_speed: Duration::from_millis(DEFAULT_GAME_SPEED_MS),
            player_lives: DEFAULT_PLAYER_LIVES,
            mazes_dir: PathBuf::from("./mazes"),
        }
    }
}

impl ServerConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_ping.is_zero() {
            return Err(ConfigError::Zero("max_ping"));
        }
        if self.lobby_timeout.is_zero() {
            return Err(ConfigError::Zero("lobby_timeout"));
        }
        if self.player_lives == 0 {
            return Err(ConfigError::Zero("player_lives"));
        }
        if self.game_speed < MIN_GAME_SPEED {
            return Err(ConfigError::GameSpeedTooLow(self.game_speed));
        }
        Ok(self)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig::responder(self.max_ping)
    }

    pub fn game(&self) -> GameConfig {
        GameConfig {
            game_speed: self.game_speed,
            player_lives: self.player_lives,
            max_ping: self.max_ping,
        }
    }
}

/// Per-instance settings handed to every new game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub game_speed: Duration,
    pub player_lives: u8,
    /// Deadline for a player to authenticate on the game channel once connected
    pub max_ping: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default().validate().unwrap();
        assert_eq!(config.port, 49429);
        assert_eq!(config.game().player_lives, 3);
        assert_eq!(config.session().hello_interval, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_ping = ServerConfig {
            max_ping: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert_eq!(zero_ping.validate(), Err(ConfigError::Zero("max_ping")));

        let no_lives = ServerConfig {
            player_lives: 0,
            ..ServerConfig::default()
        };
        assert_eq!(no_lives.validate(), Err(ConfigError::Zero("player_lives")));

        let too_fast = ServerConfig {
            game_speed: Duration::from_millis(1),
            ..ServerConfig::default()
        };
        assert!(matches!(
            too_fast.validate(),
            Err(ConfigError::GameSpeedTooLow(_))
        ));
    }
}
