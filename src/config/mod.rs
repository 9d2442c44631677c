//! Configuration module - environment variables and the arena document

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::game::round::RoundConfig;
use crate::game::tuning::Tunables;

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Where the arena document was read from
    pub arena_path: PathBuf,
    pub game: GameConfig,
}

/// One entry of the map rotation
#[derive(Clone, Debug, Deserialize)]
pub struct MapEntry {
    /// Identifier announced to clients
    pub name: String,
    /// Map file; relative paths resolve against the arena document
    pub file: PathBuf,
    /// Replaces the global tunables for this map
    #[serde(default)]
    pub tunables: Option<Tunables>,
}

/// Arena document
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub listen_addr: String,
    pub tick_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Send a snapshot every n ticks
    pub snapshot_every_ticks: u32,
    /// Per-connection outbound queue length
    pub outbox_capacity: usize,
    /// Inbound messages per second per connection
    pub input_rate_limit: u32,
    /// Fixed RNG seed; random when absent
    pub seed: Option<u64>,
    pub round: RoundConfig,
    pub tunables: Tunables,
    pub maps: Vec<MapEntry>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            tick_interval_ms: 17,
            sweep_interval_ms: 1000,
            snapshot_every_ticks: 1,
            outbox_capacity: 64,
            input_rate_limit: 120,
            seed: None,
            round: RoundConfig::default(),
            tunables: Tunables::default(),
            maps: Vec::new(),
        }
    }
}

impl GameConfig {
    /// Parse and validate an arena document
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        if config.maps.is_empty() {
            return Err(ConfigError::EmptyRotation);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for map in &mut config.maps {
            if map.file.is_relative() {
                map.file = base.join(&map.file);
            }
        }
        Ok(config)
    }
}

impl Config {
    /// Load the arena document named by `ARENA_CONFIG`, then apply
    /// environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let arena_path = PathBuf::from(
            env::var("ARENA_CONFIG").unwrap_or_else(|_| "arena.json".to_string()),
        );
        let game = GameConfig::load(&arena_path)?;

        // PORT wins (hosting platforms set it), then SERVER_ADDR, then the document
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| game.listen_addr.clone())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(server_addr.clone()))?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            arena_path,
            game,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Failed to read arena config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed arena config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Map rotation is empty")]
    EmptyRotation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn minimal_document_takes_defaults() {
        let config = assert_ok!(GameConfig::parse(
            r#"{"maps": [{"name": "snow", "file": "maps/snow.txt"}]}"#
        ));

        assert_eq!(config.tick_interval_ms, 17);
        assert_eq!(config.sweep_interval_ms, 1000);
        assert_eq!(config.outbox_capacity, 64);
        assert_eq!(config.round, RoundConfig::default());
        assert_eq!(config.maps[0].name, "snow");
        assert!(config.maps[0].tunables.is_none());
        assert!(config.seed.is_none());
    }

    #[test]
    fn per_map_tunables_override() {
        let config = assert_ok!(GameConfig::parse(
            r#"{
                "seed": 42,
                "round": {"min_duration_secs": 60},
                "maps": [
                    {"name": "a", "file": "a.txt"},
                    {"name": "b", "file": "b.txt", "tunables": {"ricochet_probe": 0.125, "annihilation_radius": 0.3}}
                ]
            }"#,
        ));

        assert_eq!(config.seed, Some(42));
        assert_eq!(config.round.min_duration_secs, 60);
        assert_eq!(config.round.max_duration_secs, 600);
        let tuned = config.maps[1].tunables.as_ref().unwrap();
        assert_eq!(tuned.ricochet_probe, 0.125);
        assert_eq!(tuned.annihilation_radius, 0.3);
        assert_eq!(tuned.max_ammo, 7);
    }

    #[test]
    fn empty_rotation_is_rejected() {
        assert!(matches!(
            GameConfig::parse(r#"{"maps": []}"#),
            Err(ConfigError::EmptyRotation)
        ));
        assert!(matches!(
            GameConfig::parse("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_document_reports_path() {
        let err = assert_err!(GameConfig::load(Path::new("/nonexistent/arena.json")));

        assert!(err.to_string().contains("/nonexistent/arena.json"));
    }
}
