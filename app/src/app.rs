use crate::config::{CliSettings, OutputFormat, WatchChannel};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use statusdeck_core::api::{DashboardApi, HttpApi};
use statusdeck_core::auth::{AuthState, CredentialCell, SessionManager, TokenStore};
use statusdeck_core::config::{ConfigError, DashboardConfig};
use statusdeck_core::guard::{AccessGuard, GuardDecision};
use statusdeck_core::models::{
    EntityId, ProcessInfo, Requester, ServiceQuery, ServiceSummary, TerminateOptions,
    TerminateResponse, UserProfile,
};
use statusdeck_core::realtime::{ConnectionState, RealtimeClient};
use statusdeck_core::store::FileStore;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

pub const DASHBOARD_PATH: &str = "/dashboard";

/// One client session: the authentication state, the realtime connection and
/// the guard in front of them, wired to share a single credential.
pub struct DeckApp {
    session: SessionManager,
    realtime: RealtimeClient,
    guard: AccessGuard,
    settings: CliSettings,
}

impl DeckApp {
    pub fn open(config: &DashboardConfig, settings: CliSettings) -> Result<Self> {
        if config.api_base_url.is_empty() {
            let err = ConfigError::Invalid("api_base_url is not set".into());
            bail!(err.user_message());
        }
        let credentials = CredentialCell::new();
        let api = Arc::new(HttpApi::from_config(config, credentials.clone()));
        Ok(Self::with_api(config, api, credentials, settings))
    }

    /// Wire a session over `api` from the persisted token. The profile is
    /// not fetched here; commands that need it load it on first use.
    pub fn with_api(
        config: &DashboardConfig,
        api: Arc<dyn DashboardApi>,
        credentials: CredentialCell,
        settings: CliSettings,
    ) -> Self {
        let state_dir = config.resolved_state_dir();
        debug!(state_dir = %state_dir.display(), "using state directory");
        let tokens =
            TokenStore::new(Arc::new(FileStore::new(state_dir))).with_key(config.token_key.clone());
        let session = SessionManager::with_credentials(api, tokens, credentials.clone());
        let realtime = RealtimeClient::from_config(config, credentials);
        Self::from_parts(session, realtime, settings)
    }

    pub fn from_parts(
        session: SessionManager,
        realtime: RealtimeClient,
        settings: CliSettings,
    ) -> Self {
        let guard = AccessGuard::new(session.clone());
        Self {
            session,
            realtime,
            guard,
            settings,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    pub fn settings(&self) -> &CliSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut CliSettings {
        &mut self.settings
    }

    pub fn route(&self, path: &str) -> GuardDecision {
        self.guard.check(path)
    }

    fn require(&self, path: &str) -> Result<()> {
        match self.guard.check(path).location() {
            None => Ok(()),
            Some(location) => bail!("not signed in; sign in first (redirect to {location})"),
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<AuthState> {
        self.session.login(username, password).await?;
        let state = self.session.snapshot();
        if !state.is_authenticated() {
            bail!("login succeeded but the server returned no token");
        }
        if state.user().is_none() {
            self.session.refresh_profile().await;
        }
        self.settings.last_username = Some(username.to_string());
        Ok(self.session.snapshot())
    }

    pub fn logout(&self) -> AuthState {
        self.session.logout();
        self.session.snapshot()
    }

    pub async fn whoami(&self) -> Result<AuthState> {
        self.require(DASHBOARD_PATH)?;
        self.session.refresh_profile().await;
        Ok(self.session.snapshot())
    }

    pub async fn services(&self, query: ServiceQuery) -> Result<Vec<ServiceSummary>> {
        self.require(DASHBOARD_PATH)?;
        Ok(self.session.api().services(&query).await?)
    }

    pub async fn users(&self, service_id: &str) -> Result<Vec<UserProfile>> {
        self.require(&format!("/services/{service_id}/users"))?;
        let users = self.session.api().service_users(service_id).await?;
        Ok(users)
    }

    pub async fn processes(&self, service_id: &str) -> Result<Vec<ProcessInfo>> {
        self.require(&format!("/services/{service_id}/processes"))?;
        let processes = self.session.api().service_processes(service_id).await?;
        Ok(processes)
    }

    pub async fn terminate_user(
        &self,
        user_id: &str,
        options: TerminateOptions,
    ) -> Result<TerminateResponse> {
        self.require(DASHBOARD_PATH)?;
        let options = self.with_requester(options).await;
        info!(user_id, "requesting user termination");
        Ok(self.session.api().terminate_user(user_id, options).await?)
    }

    pub async fn terminate_process(
        &self,
        pid: EntityId,
        options: TerminateOptions,
    ) -> Result<TerminateResponse> {
        self.require(DASHBOARD_PATH)?;
        let options = self.with_requester(options).await;
        info!(%pid, "requesting process termination");
        Ok(self.session.api().terminate_process(pid, options).await?)
    }

    async fn with_requester(&self, mut options: TerminateOptions) -> TerminateOptions {
        if options.requested_by.is_none() {
            let user = match self.session.user() {
                Some(user) => Some(user),
                None => self.session.refresh_profile().await,
            };
            options.requested_by = user.as_ref().map(Requester::from);
        }
        options
    }

    /// Print live updates from the selected channels until `shutdown`
    /// resolves or the connection closes.
    pub async fn watch<W, F>(
        &self,
        channels: &[WatchChannel],
        format: OutputFormat,
        out: &mut W,
        shutdown: F,
    ) -> Result<()>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        self.require(DASHBOARD_PATH)?;
        let Some(endpoint) = self.realtime.endpoint() else {
            bail!("realtime endpoint is not configured; set STATUSDECK_REALTIME_URL");
        };
        info!(endpoint, ?channels, "watching live updates");

        let mut services = channels
            .contains(&WatchChannel::Service)
            .then(|| self.realtime.services());
        let mut users = channels
            .contains(&WatchChannel::User)
            .then(|| self.realtime.users());
        let mut processes = channels
            .contains(&WatchChannel::Process)
            .then(|| self.realtime.processes());
        let mut raw = channels
            .contains(&WatchChannel::Raw)
            .then(|| self.realtime.messages());
        let mut states = self.realtime.state_changes();

        self.realtime.connect();
        if self.realtime.state() == ConnectionState::Error {
            self.realtime.disconnect();
            bail!("could not open the realtime connection to {endpoint}");
        }

        tokio::pin!(shutdown);
        let mut opened = false;
        let outcome: Result<()> = async {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    Some(state) = states.recv() => {
                        match state {
                            ConnectionState::Connecting => opened = true,
                            ConnectionState::Error => warn!("realtime connection reported an error"),
                            _ => {}
                        }
                        if opened {
                            emit(out, format, "state", json!(state))?;
                        }
                        if opened && state == ConnectionState::Disconnected {
                            break;
                        }
                    }
                    Some(update) = next(&mut services) => emit(out, format, "service", update.into_raw())?,
                    Some(update) = next(&mut users) => emit(out, format, "user", update.into_raw())?,
                    Some(update) = next(&mut processes) => emit(out, format, "process", update.into_raw())?,
                    Some(message) = next(&mut raw) => emit(out, format, "raw", message)?,
                }
            }
            // Updates that arrived together with the close are still printed.
            drain(out, format, "service", &mut services, |u| u.into_raw())?;
            drain(out, format, "user", &mut users, |u| u.into_raw())?;
            drain(out, format, "process", &mut processes, |u| u.into_raw())?;
            drain(out, format, "raw", &mut raw, |m| m)?;
            Ok(())
        }
        .await;

        self.realtime.disconnect();
        outcome
    }
}

async fn next<T>(rx: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn drain<T, W: Write>(
    out: &mut W,
    format: OutputFormat,
    channel: &str,
    rx: &mut Option<UnboundedReceiver<T>>,
    into_value: impl Fn(T) -> Value,
) -> Result<()> {
    if let Some(rx) = rx {
        while let Ok(item) = rx.try_recv() {
            emit(out, format, channel, into_value(item))?;
        }
    }
    Ok(())
}

fn emit<W: Write>(out: &mut W, format: OutputFormat, channel: &str, data: Value) -> Result<()> {
    let written = match format {
        OutputFormat::Json => {
            let line = json!({ "channel": channel, "data": data });
            writeln!(out, "{line}")
        }
        OutputFormat::Plain => match data {
            Value::String(text) => writeln!(out, "[{channel}] {text}"),
            other => writeln!(out, "[{channel}] {other}"),
        },
    };
    written.context("failed to write update")?;
    out.flush().ok();
    Ok(())
}
