//! Tunable rules and pacing.
//!
//! Every field has a default, so a config file only needs to name the values
//! it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Game rule constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameRules {
    /// Doubloons every player starts with
    pub starting_doubloons: u32,

    /// Lives every player starts with
    pub starting_lives: i32,

    /// Rolls available at the start of each turn
    pub rolls_per_turn: u8,

    /// Doubloons needed to win by riches
    pub riches_target: u32,

    /// Minimum seated players to start a game
    pub min_players: usize,

    /// Maximum seated players per room
    pub max_players: usize,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            starting_doubloons: 5,
            starting_lives: 10,
            rolls_per_turn: 3,
            riches_target: 25,
            min_players: 2,
            max_players: 6,
        }
    }
}

/// Artificial "thinking" delays for AI seats, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiPacing {
    pub think_ms: u64,
    pub roll_ms: u64,
    pub target_ms: u64,
    pub end_turn_ms: u64,
}

impl Default for AiPacing {
    fn default() -> Self {
        Self {
            think_ms: 1500,
            roll_ms: 800,
            target_ms: 500,
            end_turn_ms: 1000,
        }
    }
}

impl AiPacing {
    pub fn think(&self) -> Duration {
        Duration::from_millis(self.think_ms)
    }

    pub fn roll(&self) -> Duration {
        Duration::from_millis(self.roll_ms)
    }

    pub fn target(&self) -> Duration {
        Duration::from_millis(self.target_ms)
    }

    pub fn end_turn(&self) -> Duration {
        Duration::from_millis(self.end_turn_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub rules: GameRules,
    pub ai: AiPacing,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ServerConfig {
    /// Parse a JSON document, filling unspecified fields with defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_rulebook() {
        let rules = GameRules::default();
        assert_eq!(rules.starting_doubloons, 5);
        assert_eq!(rules.starting_lives, 10);
        assert_eq!(rules.rolls_per_turn, 3);
        assert_eq!(rules.riches_target, 25);
    }

    #[test]
    fn test_partial_config() {
        let config =
            ServerConfig::from_json_str(r#"{"rules": {"richesTarget": 40}, "ai": {"thinkMs": 0}}"#)
                .unwrap();

        assert_eq!(config.rules.riches_target, 40);
        assert_eq!(config.rules.starting_lives, 10);
        assert_eq!(config.ai.think(), Duration::ZERO);
        assert_eq!(config.ai.roll_ms, 800);
    }

    #[test]
    fn test_empty_config() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_bad_config() {
        let result = ServerConfig::from_json_str("{\"rules\": 7}");
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        let result = ServerConfig::from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
