use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Reconnect delay for server-push streams until the server sends `retry:`.
pub const DEFAULT_RETRY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bidirectional WebSocket.
    Socket,
    /// Server-sent events over HTTP.
    ServerPush,
}

impl TransportKind {
    pub fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.starts_with("ws") {
            Self::Socket
        } else {
            Self::ServerPush
        }
    }
}

/// Signals reported by a running transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Append the credential as a `token` query parameter. Server-push requests
/// cannot carry custom headers, so both transports authenticate this way.
pub fn endpoint_with_credential(endpoint: &str, token: Option<&str>) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(endpoint)?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Opens transports for the realtime client.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run one transport to completion, reporting every signal on `events`.
    async fn run(&self, kind: TransportKind, url: Url, events: UnboundedSender<TransportEvent>);
}

/// Connector backed by real sockets and HTTP streams.
#[derive(Clone)]
pub struct NetworkConnector {
    client: reqwest::Client,
    default_retry: Duration,
}

impl NetworkConnector {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_retry: DEFAULT_RETRY,
        }
    }

    pub fn with_default_retry(mut self, retry: Duration) -> Self {
        self.default_retry = retry;
        self
    }

    async fn run_socket(&self, url: Url, events: UnboundedSender<TransportEvent>) {
        let emit = |event| {
            events.send(event).ok();
        };
        let mut stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(error = %err, "socket connection failed");
                emit(TransportEvent::Error(err.to_string()));
                emit(TransportEvent::Closed);
                return;
            }
        };
        info!("realtime socket open");
        emit(TransportEvent::Opened);

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => emit(TransportEvent::Message(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => emit(TransportEvent::Message(text)),
                    Err(_) => debug!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "socket closed by server");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "socket read failed");
                    emit(TransportEvent::Error(err.to_string()));
                    break;
                }
            }
        }
        emit(TransportEvent::Closed);
    }

    async fn run_server_push(&self, url: Url, events: UnboundedSender<TransportEvent>) {
        let emit = |event| {
            events.send(event).ok();
        };
        let mut decoder = SseDecoder::new();
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache");
            if let Some(id) = decoder.last_event_id() {
                request = request.header("Last-Event-ID", id);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("realtime event stream open");
                    emit(TransportEvent::Opened);
                    let mut body = response.bytes_stream();
                    loop {
                        match body.next().await {
                            Some(Ok(chunk)) => {
                                for event in decoder.feed(&chunk) {
                                    // Named events are not part of the default message stream.
                                    if event.event.as_deref().map_or(true, |name| name == "message") {
                                        emit(TransportEvent::Message(event.data));
                                    }
                                }
                            }
                            Some(Err(err)) => {
                                warn!(error = %err, "event stream interrupted");
                                emit(TransportEvent::Error(err.to_string()));
                                break;
                            }
                            None => {
                                debug!("event stream ended");
                                emit(TransportEvent::Error("event stream ended".to_string()));
                                break;
                            }
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(%status, "event stream rejected, giving up");
                    emit(TransportEvent::Error(format!("unexpected status {status}")));
                    emit(TransportEvent::Closed);
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "event stream request failed");
                    emit(TransportEvent::Error(err.to_string()));
                }
            }

            if events.is_closed() {
                return;
            }
            decoder.reset();
            let delay = decoder.retry().unwrap_or(self.default_retry);
            debug!(?delay, "reconnecting event stream");
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn run(&self, kind: TransportKind, url: Url, events: UnboundedSender<TransportEvent>) {
        match kind {
            TransportKind::Socket => self.run_socket(url, events).await,
            TransportKind::ServerPush => self.run_server_push(url, events).await,
        }
    }
}

/// Connector whose transports are played by the caller, one per `connect`.
#[derive(Default)]
pub struct ScriptedConnector {
    feeds: Mutex<VecDeque<UnboundedReceiver<TransportEvent>>>,
    opened: Mutex<Vec<(TransportKind, Url)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next connection attempt. Events sent on the
    /// returned handle are relayed until it is dropped.
    pub fn push_transport(&self) -> UnboundedSender<TransportEvent> {
        let (tx, rx) = unbounded_channel();
        self.feeds.lock().push_back(rx);
        tx
    }

    /// Every transport opened so far, with the URL it was given.
    pub fn opened(&self) -> Vec<(TransportKind, Url)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn run(&self, kind: TransportKind, url: Url, events: UnboundedSender<TransportEvent>) {
        self.opened.lock().push((kind, url));
        let feed = self.feeds.lock().pop_front();
        let Some(mut feed) = feed else {
            events
                .send(TransportEvent::Error("no scripted transport queued".to_string()))
                .ok();
            events.send(TransportEvent::Closed).ok();
            return;
        };
        while let Some(event) = feed.recv().await {
            if events.send(event).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;
    use futures::SinkExt;
    use tokio::net::TcpListener;

    #[test]
    fn scheme_selects_transport() {
        assert_eq!(
            TransportKind::for_endpoint("ws://localhost/realtime"),
            TransportKind::Socket
        );
        assert_eq!(
            TransportKind::for_endpoint("wss://status.example.com/rt"),
            TransportKind::Socket
        );
        assert_eq!(
            TransportKind::for_endpoint("https://status.example.com/sse"),
            TransportKind::ServerPush
        );
    }

    #[test]
    fn credential_is_appended_as_query_parameter() {
        let url = endpoint_with_credential("http://host/sse?topic=all", Some("a b&c")).expect("url");
        assert_eq!(url.as_str(), "http://host/sse?topic=all&token=a+b%26c");

        let url = endpoint_with_credential("ws://host/rt", None).expect("url");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(endpoint_with_credential("not a url", Some("t")).is_err());
    }

    fn drain(rx: &mut UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn fast_connector() -> NetworkConnector {
        NetworkConnector::new().with_default_retry(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn rejected_event_stream_is_not_retried() {
        let (base, mut requests) = test_server::serve(vec![
            test_server::response("503 Service Unavailable", ""),
            test_server::event_stream("data: never\n\n"),
        ])
        .await;
        let url = Url::parse(&format!("{base}/events")).expect("url");
        let (tx, mut rx) = unbounded_channel();

        fast_connector()
            .run(TransportKind::ServerPush, url, tx)
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], TransportEvent::Error(reason) if reason.contains("503")));
        assert_eq!(events[1], TransportEvent::Closed);
        assert!(requests.recv().await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_event_stream_reconnects_with_last_event_id() {
        let (base, mut requests) = test_server::serve(vec![
            test_server::event_stream("id: 7\ndata: first\n\nevent: ping\ndata: skipped\n\n"),
            test_server::event_stream("data: second\n\n"),
            test_server::response("401 Unauthorized", ""),
        ])
        .await;
        let url = Url::parse(&format!("{base}/events?token=abc")).expect("url");
        let (tx, mut rx) = unbounded_channel();

        fast_connector()
            .run(TransportKind::ServerPush, url, tx)
            .await;

        let events = drain(&mut rx);
        assert_eq!(events[0], TransportEvent::Opened);
        assert_eq!(events[1], TransportEvent::Message("first".into()));
        assert!(matches!(events[2], TransportEvent::Error(_)));
        assert_eq!(events[3], TransportEvent::Opened);
        assert_eq!(events[4], TransportEvent::Message("second".into()));
        assert!(matches!(events[5], TransportEvent::Error(_)));
        assert!(matches!(&events[6], TransportEvent::Error(reason) if reason.contains("401")));
        assert_eq!(events[7], TransportEvent::Closed);
        assert_eq!(events.len(), 8);

        let first = requests.recv().await.expect("first request");
        assert!(first.starts_with("get /events?token=abc http/1.1"));
        assert!(first.contains("accept: text/event-stream"));
        assert!(!first.contains("last-event-id"));
        let second = requests.recv().await.expect("second request");
        assert!(second.contains("last-event-id: 7"));
        let third = requests.recv().await.expect("third request");
        assert!(third.contains("last-event-id: 7"));
    }

    #[tokio::test]
    async fn socket_relays_frames_until_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            socket
                .send(Message::text(r#"{"type":"service","data":{"id":"s1"}}"#))
                .await
                .expect("send text");
            socket
                .send(Message::binary(b"raw bytes".to_vec()))
                .await
                .expect("send binary");
            socket.close(None).await.ok();
        });
        let url = Url::parse(&format!("ws://{addr}/rt?token=abc")).expect("url");
        let (tx, mut rx) = unbounded_channel();

        fast_connector().run(TransportKind::Socket, url, tx).await;
        server.await.expect("server");

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                TransportEvent::Opened,
                TransportEvent::Message(r#"{"type":"service","data":{"id":"s1"}}"#.into()),
                TransportEvent::Message("raw bytes".into()),
                TransportEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn refused_socket_reports_error_then_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let url = Url::parse(&format!("ws://{addr}/rt")).expect("url");
        let (tx, mut rx) = unbounded_channel();

        fast_connector().run(TransportKind::Socket, url, tx).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::Error(_)));
        assert_eq!(events[1], TransportEvent::Closed);
    }
}
