//! Configuration file resolution and loading
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`<config_dir>/<app>/config.toml`), if present
//! 4. None: caller falls back to compiled defaults
//!
//! A missing config file is not an error. The application logs a warning and
//! starts with built-in defaults. A file that exists but does not parse is an
//! error, so typos are not silently ignored.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Logging configuration shared by all toneplay binaries
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    ///
    /// `RUST_LOG` overrides this value when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolves which config file (if any) a module should load
#[derive(Debug, Clone)]
pub struct ConfigPathResolver {
    app_name: String,
    env_var: String,
}

impl ConfigPathResolver {
    /// Create a resolver for `app_name`
    ///
    /// The environment variable is derived from the app name, e.g.
    /// `toneplay` → `TONEPLAY_CONFIG`.
    pub fn new(app_name: &str) -> Self {
        let env_var = format!("{}_CONFIG", app_name.to_uppercase().replace('-', "_"));
        Self {
            app_name: app_name.to_string(),
            env_var,
        }
    }

    /// Override the environment variable consulted at priority 2
    pub fn with_env_var(mut self, env_var: &str) -> Self {
        self.env_var = env_var.to_string();
        self
    }

    /// Environment variable consulted at priority 2
    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    /// Per-user config file location for this app
    pub fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }

    /// Resolve the config file path following the priority order
    ///
    /// Returns `None` when nothing was requested and no user config exists.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            debug!("Config path from command line: {}", path.display());
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.is_empty() {
                debug!("Config path from {}: {}", self.env_var, path);
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: User config directory
        if let Some(path) = self.user_config_path() {
            if path.exists() {
                debug!("Config path from user config dir: {}", path.display());
                return Some(path);
            }
        }

        None
    }
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from `path`, degrading gracefully to defaults
///
/// - `None` → built-in defaults
/// - path does not exist → warning + built-in defaults
/// - file exists but cannot be read or parsed → error
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = parse_toml(&content).map_err(|e| {
        Error::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}
