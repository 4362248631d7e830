use crate::auth::CredentialCell;
use crate::config::DashboardConfig;
use crate::demux::{Demultiplexer, Payload};
use crate::models::{ProcessInfo, ServiceSummary, UserProfile};
use crate::topic::Topic;
use crate::transport::{
    endpoint_with_credential, Connector, NetworkConnector, TransportEvent, TransportKind,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.pad(label)
    }
}

/// Live-update connection to the realtime endpoint.
///
/// Holds at most one transport at a time. Inbound messages are routed through
/// the [`Demultiplexer`]; subscribe to the typed streams before connecting to
/// see every update.
#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Option<String>,
    credentials: CredentialCell,
    connector: Arc<dyn Connector>,
    demux: Demultiplexer,
    inner: Arc<Mutex<ConnectionInner>>,
    states: Topic<ConnectionState>,
}

struct ConnectionInner {
    state: ConnectionState,
    // Events tagged with an older generation come from a detached transport.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    pub fn new(endpoint: Option<String>, credentials: CredentialCell) -> Self {
        Self::with_connector(endpoint, credentials, Arc::new(NetworkConnector::new()))
    }

    pub fn from_config(config: &DashboardConfig, credentials: CredentialCell) -> Self {
        Self::new(config.realtime_url.clone(), credentials)
    }

    pub fn with_connector(
        endpoint: Option<String>,
        credentials: CredentialCell,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let endpoint = endpoint
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        Self {
            endpoint,
            credentials,
            connector,
            demux: Demultiplexer::new(),
            inner: Arc::new(Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                generation: 0,
                task: None,
            })),
            states: Topic::replaying(ConnectionState::Disconnected),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// State stream; the current state is delivered first.
    pub fn state_changes(&self) -> UnboundedReceiver<ConnectionState> {
        self.states.subscribe()
    }

    pub fn services(&self) -> UnboundedReceiver<Payload<ServiceSummary>> {
        self.demux.services()
    }

    pub fn users(&self) -> UnboundedReceiver<Payload<UserProfile>> {
        self.demux.users()
    }

    pub fn processes(&self) -> UnboundedReceiver<Payload<ProcessInfo>> {
        self.demux.processes()
    }

    pub fn messages(&self) -> UnboundedReceiver<Value> {
        self.demux.messages()
    }

    pub fn connect(&self) {
        let Some(endpoint) = self.endpoint.clone() else {
            warn!("realtime endpoint is not configured, live updates disabled");
            return;
        };

        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!(state = %inner.state, "realtime connect ignored");
            return;
        }

        let kind = TransportKind::for_endpoint(&endpoint);
        let url = match endpoint_with_credential(&endpoint, self.credentials.get().as_deref()) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, endpoint = %endpoint, "realtime endpoint is not a valid URL");
                self.set_state(&mut inner, ConnectionState::Error);
                return;
            }
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("realtime transport needs an async runtime");
                self.set_state(&mut inner, ConnectionState::Error);
                return;
            }
        };

        // A transport left over from an `error` state is replaced, never doubled.
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        self.set_state(&mut inner, ConnectionState::Connecting);
        info!(endpoint = %endpoint, transport = ?kind, "opening realtime connection");

        let client = self.clone();
        let connector = self.connector.clone();
        inner.task = Some(runtime.spawn(async move {
            let (events_tx, mut events_rx) = unbounded_channel();
            let driver = connector.run(kind, url, events_tx);
            let pump = async {
                while let Some(event) = events_rx.recv().await {
                    client.apply(generation, event);
                }
            };
            tokio::join!(driver, pump);
        }));
    }

    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        self.set_state(&mut inner, ConnectionState::Disconnected);
    }

    fn apply(&self, generation: u64, event: TransportEvent) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            trace!(?event, "dropping event from detached transport");
            return;
        }
        match event {
            TransportEvent::Opened => self.set_state(&mut inner, ConnectionState::Connected),
            // Dispatched under the lock so nothing is delivered after `disconnect`.
            TransportEvent::Message(text) => self.demux.dispatch(text),
            TransportEvent::Error(reason) => {
                debug!(%reason, "realtime transport reported an error");
                self.set_state(&mut inner, ConnectionState::Error);
            }
            TransportEvent::Closed => {
                inner.generation += 1;
                inner.task = None;
                self.set_state(&mut inner, ConnectionState::Disconnected);
            }
        }
    }

    fn set_state(&self, inner: &mut ConnectionInner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        debug!(from = %inner.state, to = %next, "realtime connection state changed");
        inner.state = next;
        self.states.publish(next);
    }
}
