use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    User,
    Directory(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WatchChannel {
    Service,
    User,
    Process,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSettings {
    #[serde(default = "CliSettings::default_output")]
    pub output: OutputFormat,
    #[serde(default = "CliSettings::default_watch")]
    pub watch: Vec<WatchChannel>,
    #[serde(default)]
    pub last_username: Option<String>,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            output: CliSettings::default_output(),
            watch: CliSettings::default_watch(),
            last_username: None,
        }
    }
}

impl CliSettings {
    fn default_output() -> OutputFormat {
        OutputFormat::Plain
    }

    fn default_watch() -> Vec<WatchChannel> {
        vec![
            WatchChannel::Service,
            WatchChannel::User,
            WatchChannel::Process,
        ]
    }
}

pub async fn load_cli_settings(scope: &Scope) -> Result<CliSettings> {
    let path = cli_settings_path(scope);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                let defaults = CliSettings::default();
                save_cli_settings(scope, &defaults).await?;
                warn!(
                    error = ?err,
                    "failed to parse cli_settings.json, resetting to defaults"
                );
                Ok(defaults)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CliSettings::default()),
        Err(err) => Err(err).context("failed to read cli_settings.json"),
    }
}

pub async fn save_cli_settings(scope: &Scope, settings: &CliSettings) -> Result<()> {
    let path = cli_settings_path(scope);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(&path, serialized)
        .await
        .with_context(|| format!("failed to write cli_settings.json at {}", path.display()))
}

fn cli_settings_path(scope: &Scope) -> PathBuf {
    match scope {
        Scope::User => config_dir().join("cli_settings.json"),
        Scope::Directory(path) => local_dir(path).join("cli_settings.json"),
    }
}

fn local_dir(path: &Path) -> PathBuf {
    path.join(".statusdeck")
}

fn config_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("statusdeck")
    } else {
        PathBuf::from(".statusdeck")
    }
}
