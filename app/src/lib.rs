pub mod app;
pub mod config;
pub mod render;

pub use app::DeckApp;
pub use config::{
    load_cli_settings, save_cli_settings, CliSettings, OutputFormat, Scope, WatchChannel,
};
