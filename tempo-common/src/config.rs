//! Bootstrap configuration loading
//!
//! Everything needed before the database is open lives here: where the
//! database is, which port to bind, and how to log. All other settings are
//! read from the database once it is available.
//!
//! Resolution order for each value:
//! 1. Environment variable (`TEMPO_DATABASE`, `TEMPO_PORT`)
//! 2. TOML config file
//! 3. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port for the control surface
pub const DEFAULT_PORT: u16 = 5740;

/// Environment variable overriding the database path
pub const ENV_DATABASE: &str = "TEMPO_DATABASE";

/// Environment variable overriding the HTTP port
pub const ENV_PORT: &str = "TEMPO_PORT";

/// Logging section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Optional log file, written in addition to stdout
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database holding settings, equalizer state and snapshots
    pub database_path: PathBuf,
    /// HTTP port for the control surface
    pub port: u16,
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("tempo.db"),
            port: DEFAULT_PORT,
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the config, falling back to defaults when the file is missing
    ///
    /// A missing file is not an error: the player must start with compiled
    /// defaults. A file that exists but fails to parse is reported.
    ///
    /// # Arguments
    /// * `explicit` - Path given on the command line, if any
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                info!("Loading config from {}", p.display());
                Self::from_file(p)?
            }
            Some(ref p) => {
                warn!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `TEMPO_DATABASE` / `TEMPO_PORT` on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db) = std::env::var(ENV_DATABASE) {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a valid port: {}", ENV_PORT, port)))?;
        }
        Ok(())
    }
}

/// `<config dir>/tempo/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tempo").join("config.toml"))
}

/// OS-dependent data directory (`~/.local/share/tempo` on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tempo"))
        .unwrap_or_else(|| PathBuf::from("./tempo_data"))
}
