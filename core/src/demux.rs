use crate::models::{ProcessInfo, ServiceSummary, UserProfile};
use crate::topic::Topic;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{trace, warn};

/// A frame handed over by the active transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Value(Value),
}

impl From<String> for Inbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Inbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Inbound {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Service,
    User,
    Process,
}

impl UpdateKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "service" => Some(Self::Service),
            "user" => Some(Self::User),
            "process" => Some(Self::Process),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::User => "user",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing view of an inbound message: `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub kind: UpdateKind,
    pub data: Value,
}

impl UpdateEnvelope {
    /// `None` when the value is not an envelope of a known type.
    pub fn parse(value: &Value) -> Option<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(UpdateKind::from_tag)?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        Some(Self { kind, data })
    }
}

/// An update payload relayed as received, tagged with the model it describes.
/// Pushes may be partial, so decoding into `T` is left to the consumer.
pub struct Payload<T> {
    data: Value,
    _model: PhantomData<fn() -> T>,
}

impl<T> Payload<T> {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            _model: PhantomData,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.data
    }

    pub fn into_raw(self) -> Value {
        self.data
    }
}

impl<T: DeserializeOwned> Payload<T> {
    pub fn decode(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

impl<T> Clone for Payload<T> {
    fn clone(&self) -> Self {
        Self::new(self.data.clone())
    }
}

impl<T> fmt::Debug for Payload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.data).finish()
    }
}

impl<T> PartialEq for Payload<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// Fans inbound realtime messages out to typed update streams.
#[derive(Clone, Default)]
pub struct Demultiplexer {
    services: Topic<Payload<ServiceSummary>>,
    users: Topic<Payload<UserProfile>>,
    processes: Topic<Payload<ProcessInfo>>,
    raw: Topic<Value>,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> UnboundedReceiver<Payload<ServiceSummary>> {
        self.services.subscribe()
    }

    pub fn users(&self) -> UnboundedReceiver<Payload<UserProfile>> {
        self.users.subscribe()
    }

    pub fn processes(&self) -> UnboundedReceiver<Payload<ProcessInfo>> {
        self.processes.subscribe()
    }

    /// Every message, decoded when possible, otherwise the original text.
    pub fn messages(&self) -> UnboundedReceiver<Value> {
        self.raw.subscribe()
    }

    pub fn dispatch(&self, inbound: impl Into<Inbound>) {
        let value = match inbound.into() {
            Inbound::Value(value) => value,
            Inbound::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, raw = %text, "failed to parse realtime message");
                    self.raw.publish(Value::String(text));
                    return;
                }
            },
        };

        self.raw.publish(value.clone());
        match UpdateEnvelope::parse(&value) {
            Some(UpdateEnvelope { kind, data }) => match kind {
                UpdateKind::Service => self.services.publish(Payload::new(data)),
                UpdateKind::User => self.users.publish(Payload::new(data)),
                UpdateKind::Process => self.processes.publish(Payload::new(data)),
            },
            None => trace!("realtime message without a known type, raw stream only"),
        }
    }
}
