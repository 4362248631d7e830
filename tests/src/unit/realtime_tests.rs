use serde_json::json;
use statusdeck_core::auth::CredentialCell;
use statusdeck_core::models::ServiceSummary;
use statusdeck_core::realtime::{ConnectionState, RealtimeClient};
use statusdeck_core::transport::{ScriptedConnector, TransportEvent, TransportKind};
use std::sync::Arc;

fn client(endpoint: &str) -> (RealtimeClient, Arc<ScriptedConnector>) {
    let connector = Arc::new(ScriptedConnector::new());
    let client = RealtimeClient::with_connector(
        Some(endpoint.to_string()),
        CredentialCell::new(),
        connector.clone(),
    );
    (client, connector)
}

#[tokio::test]
async fn server_push_error_keeps_transport_until_it_reopens() {
    let (client, connector) = client("https://status.example.com/events");
    let feed = connector.push_transport();
    let mut states = client.state_changes();

    client.connect();
    feed.send(TransportEvent::Opened).expect("send");
    feed.send(TransportEvent::Error("stream dropped".into()))
        .expect("send");
    feed.send(TransportEvent::Opened).expect("send");

    let mut seen = Vec::new();
    while seen.len() < 5 {
        seen.push(states.recv().await.expect("state"));
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(connector.opened().len(), 1);
    assert_eq!(connector.opened()[0].0, TransportKind::ServerPush);
}

#[tokio::test]
async fn reconnect_after_error_replaces_the_old_transport() {
    let (client, connector) = client("ws://localhost/rt");
    let first = connector.push_transport();
    let second = connector.push_transport();
    let mut raw = client.messages();
    let mut states = client.state_changes();

    client.connect();
    first.send(TransportEvent::Error("reset".into())).expect("send");
    while states.recv().await != Some(ConnectionState::Error) {}

    client.connect();
    second.send(TransportEvent::Opened).expect("send");
    while states.recv().await != Some(ConnectionState::Connected) {}

    first.send(TransportEvent::Message("from old".into())).ok();
    second
        .send(TransportEvent::Message("from new".into()))
        .expect("send");
    assert_eq!(raw.recv().await, Some(json!("from new")));
    assert_eq!(connector.opened().len(), 2);

    client.disconnect();
    tokio::task::yield_now().await;
    assert!(raw.try_recv().is_err());
}

#[tokio::test]
async fn mixed_traffic_is_routed_in_arrival_order() {
    let (client, connector) = client("ws://localhost/rt");
    let feed = connector.push_transport();
    let mut services = client.services();
    let mut users = client.users();
    let mut processes = client.processes();
    let mut raw = client.messages();

    client.connect();
    feed.send(TransportEvent::Opened).expect("send");
    let frames = [
        json!({ "type": "service", "data": { "id": "s1", "name": "api", "status": "healthy",
            "activeUsers": 1, "activeProcesses": 2 } })
        .to_string(),
        json!({ "type": "process", "data": { "pid": 7, "name": "worker", "user": "svc" } })
            .to_string(),
        "not json".to_string(),
        json!({ "type": "heartbeat" }).to_string(),
        json!({ "type": "user", "data": { "id": "u1", "username": "ops" } }).to_string(),
    ];
    for frame in &frames {
        feed.send(TransportEvent::Message(frame.clone()))
            .expect("send");
    }

    let service = services.recv().await.expect("service");
    let summary: ServiceSummary = service.decode().expect("decode service");
    assert_eq!(summary.name, "api");
    let process = processes.recv().await.expect("process");
    assert_eq!(process.raw()["pid"], json!(7));
    let user = users.recv().await.expect("user");
    assert_eq!(user.decode().expect("decode user").username, "ops");

    let mut raw_seen = Vec::new();
    for _ in 0..frames.len() {
        raw_seen.push(raw.recv().await.expect("raw"));
    }
    assert_eq!(raw_seen[2], json!("not json"));
    assert_eq!(raw_seen[3], json!({ "type": "heartbeat" }));
    assert!(services.try_recv().is_err());
}
