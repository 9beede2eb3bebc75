//! Service configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::BoardTemplate;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BOARD_DATA_DIR: &str = "./data/boards";
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 3000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read board template {path}: {source}")]
    TemplateIo { path: PathBuf, source: std::io::Error },
    #[error("malformed board template {path}: {source}")]
    TemplateJson { path: PathBuf, source: serde_json::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub save_debounce: Duration,
    /// Outbound frame buffer per connected client.
    pub client_channel_capacity: usize,
    pub template_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_BOARD_DATA_DIR),
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            template_path: None,
        }
    }
}

impl Config {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `BOARD_DATA_DIR`: default `./data/boards`
    /// - `SAVE_DEBOUNCE_MS`: default 3000
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    /// - `BOARD_TEMPLATE_PATH`: JSON template applied to new boards
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("BOARD_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_BOARD_DATA_DIR), PathBuf::from);
        let template_path = lookup("BOARD_TEMPLATE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            port: env_parse(&lookup, "PORT", DEFAULT_PORT),
            data_dir,
            save_debounce: Duration::from_millis(env_parse(&lookup, "SAVE_DEBOUNCE_MS", DEFAULT_SAVE_DEBOUNCE_MS)),
            client_channel_capacity: env_parse(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY)
                .max(1),
            template_path,
        }
    }

    /// Read the configured board template, or an empty one when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a template.
    pub async fn load_template(&self) -> Result<BoardTemplate, ConfigError> {
        let Some(path) = &self.template_path else {
            return Ok(BoardTemplate::default());
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::TemplateIo { path: path.clone(), source })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::TemplateJson { path: path.clone(), source })
    }
}

pub(crate) fn env_parse<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
