use serde::Deserialize;
use std::path::{Path, PathBuf};
use tgcore::api::SessionParameters;
use tgcore::reading::HumanBehaviour;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "tgrec.toml";
const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Static startup parameters. Loaded once, then shared read-only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_session_directory")]
    pub session_directory: String,
    pub download_folder: PathBuf,
    #[serde(default = "default_cache_capacity")]
    pub user_cache_capacity: usize,
    #[serde(default = "default_cache_capacity")]
    pub chat_cache_capacity: usize,
    #[serde(default)]
    pub human_behaviour: HumanBehaviour,
    /// Skips the phone number prompt when set.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Program and arguments of the JSON-lines session bridge.
    #[serde(default)]
    pub bridge_command: Option<Vec<String>>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tgrec.db")
}

fn default_session_directory() -> String {
    "tdlib".to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        raw.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };
        if self.api_id <= 0 {
            return invalid("api_id must be positive");
        }
        if self.api_hash.trim().is_empty() {
            return invalid("api_hash is empty");
        }
        if self.download_folder.as_os_str().is_empty() {
            return invalid("download_folder is empty");
        }
        if self.user_cache_capacity == 0 || self.chat_cache_capacity == 0 {
            return invalid("cache capacities must be at least 1");
        }
        if self.bridge_command.as_ref().is_some_and(Vec::is_empty) {
            return invalid("bridge_command needs at least a program");
        }

        let h = &self.human_behaviour;
        let timings = [
            h.read_msg_frequency_mean,
            h.read_msg_frequency_std_dev,
            h.read_msg_min_wait_sec,
            h.photo_read_speed_sec,
        ];
        if timings.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return invalid("human_behaviour timings must be finite and non-negative");
        }
        if !h.text_read_speed_wpm.is_finite() || h.text_read_speed_wpm <= 0.0 {
            return invalid("human_behaviour.text_read_speed_wpm must be positive");
        }
        Ok(())
    }

    pub fn session_parameters(&self) -> SessionParameters {
        SessionParameters {
            database_directory: self.session_directory.clone(),
            use_message_database: true,
            use_secret_chats: false,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            system_language_code: "en".to_string(),
            device_model: "Desktop".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
