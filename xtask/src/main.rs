use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use statusdeck_core::api::MockApi;
use statusdeck_core::auth::{SessionManager, TokenStore};
use statusdeck_core::guard::AccessGuard;
use statusdeck_core::models::{LoginResponse, RoleType, UserProfile};
use statusdeck_core::realtime::{ConnectionState, RealtimeClient};
use statusdeck_core::store::FileStore;
use statusdeck_core::telemetry;
use statusdeck_core::transport::{ScriptedConnector, TransportEvent};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Statusdeck")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a lightweight smoke test that exercises the Statusdeck core logic.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let tokens = TokenStore::new(Arc::new(FileStore::new(temp_dir.path().to_path_buf())));

    let api = Arc::new(MockApi::new());
    api.push_login(Ok(LoginResponse {
        token: Some("smoke-token".into()),
        user: Some(UserProfile {
            id: "smoke".into(),
            username: "smoke".into(),
            display_name: None,
            roles: vec![RoleType::Admin],
            permissions: None,
            active: Some(true),
            processes: None,
            meta: None,
        }),
    }));
    let session = SessionManager::new(api, tokens);
    let guard = AccessGuard::new(session.clone());
    info!(decision = ?guard.check("/dashboard"), "guard before login");

    let connector = Arc::new(ScriptedConnector::new());
    let realtime = RealtimeClient::with_connector(
        Some("ws://smoke.local/rt".into()),
        session.credentials(),
        connector.clone(),
    );

    runtime.block_on(async {
        session
            .login("smoke", "smoke")
            .await
            .context("smoke login failed")?;
        info!(decision = ?guard.check("/dashboard"), "guard after login");

        let mut services = realtime.services();
        let mut raw = realtime.messages();
        let mut states = realtime.state_changes();
        let feed = connector.push_transport();
        realtime.connect();
        feed.send(TransportEvent::Opened).ok();
        feed.send(TransportEvent::Message(
            json!({ "type": "service", "data": { "id": "smoke-svc" } }).to_string(),
        ))
        .ok();
        feed.send(TransportEvent::Message("plain text frame".into()))
            .ok();
        feed.send(TransportEvent::Closed).ok();

        let mut opened = false;
        while let Some(state) = states.recv().await {
            info!(%state, "realtime state");
            opened |= state == ConnectionState::Connecting;
            if opened && state == ConnectionState::Disconnected {
                break;
            }
        }
        while let Ok(update) = services.try_recv() {
            info!(payload = %update.raw(), "service update");
        }
        while let Ok(message) = raw.try_recv() {
            info!(payload = %message, "raw message");
        }
        anyhow::Ok(())
    })?;

    if let Some((_, url)) = connector.opened().first() {
        info!(url = %url, "smoke transport opened");
    }
    session.logout();
    info!(
        "authenticated" = session.is_authenticated(),
        "smoke test session closed"
    );

    Ok(())
}
