pub mod api;
pub mod auth;
pub mod config;
pub mod demux;
pub mod guard;
pub mod models;
pub mod realtime;
pub mod sse;
pub mod store;
pub mod telemetry;
#[cfg(test)]
mod test_server;
pub mod topic;
pub mod transport;

pub use api::{ApiError, DashboardApi, HttpApi, MockApi};
pub use auth::{AuthState, CredentialCell, SessionManager, TokenStore};
pub use config::{ConfigError, DashboardConfig};
pub use demux::{Demultiplexer, Inbound, Payload, UpdateEnvelope, UpdateKind};
pub use guard::{AccessGuard, GuardDecision};
pub use realtime::{ConnectionState, RealtimeClient};
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use topic::Topic;
pub use transport::{Connector, NetworkConnector, ScriptedConnector, TransportEvent, TransportKind};
