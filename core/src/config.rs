use crate::auth::DEFAULT_TOKEN_KEY;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_API_BASE_URL: &str = "STATUSDECK_API_BASE_URL";
pub const ENV_REALTIME_URL: &str = "STATUSDECK_REALTIME_URL";
pub const ENV_TOKEN_KEY: &str = "STATUSDECK_TOKEN_KEY";
pub const ENV_STATE_DIR: &str = "STATUSDECK_STATE_DIR";

/// Endpoints and storage location used by a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub api_base_url: String,
    /// `None` disables realtime updates.
    pub realtime_url: Option<String>,
    pub token_key: String,
    pub state_dir: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            realtime_url: None,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            state_dir: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("Statusdeck not configured—{detail}. Update statusdeck.yaml."),
        }
    }
}

impl DashboardConfig {
    /// Load `statusdeck.yaml` (if any) and apply environment overrides,
    /// including those from a `.env` file.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match locate_config_file() {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = read_config_file(path)?;
        Ok(Self::resolve(Some(file), |_| None))
    }

    fn resolve(file: Option<ConfigFile>, env: impl Fn(&str) -> Option<String>) -> Self {
        let section = file.and_then(|file| file.client).unwrap_or_default();
        let mut config = Self::default();

        if let Some(url) = env(ENV_API_BASE_URL)
            .or(section.api_base_url)
            .and_then(normalize_url)
        {
            config.api_base_url = url;
        }
        config.realtime_url = env(ENV_REALTIME_URL)
            .or(section.realtime_url)
            .and_then(normalize_url);
        if let Some(key) = env(ENV_TOKEN_KEY)
            .or(section.token_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
        {
            config.token_key = key;
        }
        config.state_dir = env(ENV_STATE_DIR)
            .or(section.state_dir)
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        config
    }

    /// Directory for persisted client state, falling back to the user's data dir.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        match BaseDirs::new() {
            Some(base) => base.data_local_dir().join("statusdeck"),
            None => PathBuf::from(".statusdeck"),
        }
    }
}

/// Trim whitespace and trailing slashes; empty means unset.
pub fn normalize_url(raw: String) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
    })?;
    debug!(path = %path.display(), "loaded configuration file");
    serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid statusdeck.yaml: {err}")))
}

fn locate_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|path| path.exists())
}

fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("statusdeck");
        paths.push(config_dir.join("statusdeck.yaml"));
        paths.push(config_dir.join("statusdeck.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".statusdeck").join("statusdeck.yaml"));
        paths.push(home_dir.join(".statusdeck").join("statusdeck.yml"));
    }
    paths.push(PathBuf::from("statusdeck.yaml"));
    paths.push(PathBuf::from("statusdeck.yml"));
    paths
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    api_base_url: Option<String>,
    realtime_url: Option<String>,
    token_key: Option<String>,
    state_dir: Option<String>,
}
