use statusdeck::config::{CliSettings, OutputFormat};
use statusdeck::{render, DeckApp};
use statusdeck_core::api::MockApi;
use statusdeck_core::auth::{CredentialCell, SessionManager, TokenStore};
use statusdeck_core::config::DashboardConfig;
use statusdeck_core::guard::GuardDecision;
use statusdeck_core::models::{
    EntityId, LoginResponse, Requester, RoleType, ServiceQuery, ServiceSummary, StatusType,
    TerminateOptions, TerminationTarget, UserProfile,
};
use statusdeck_core::realtime::RealtimeClient;
use statusdeck_core::store::{FileStore, KeyValueStore};
use std::sync::Arc;
use tempfile::TempDir;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn operator() -> UserProfile {
    UserProfile {
        id: "u-ops".into(),
        username: "ops".into(),
        display_name: Some("Operations".into()),
        roles: vec![RoleType::Operator],
        permissions: None,
        active: Some(true),
        processes: None,
        meta: None,
    }
}

fn service(id: &str, status: StatusType) -> ServiceSummary {
    ServiceSummary {
        id: id.into(),
        name: format!("{id}-svc"),
        status,
        active_users: 1,
        active_processes: 3,
        last_updated_at: None,
        description: None,
        issues: None,
        meta: None,
    }
}

fn signed_in_deck(runtime: &tokio::runtime::Runtime, api: Arc<MockApi>) -> DeckApp {
    api.push_login(Ok(LoginResponse {
        token: Some("tok".into()),
        user: Some(operator()),
    }));
    let session = SessionManager::new(api, TokenStore::detached());
    let realtime = RealtimeClient::new(None, session.credentials());
    let mut app = DeckApp::from_parts(session, realtime, CliSettings::default());
    runtime.block_on(app.login("ops", "pw")).expect("login");
    app
}

#[test]
fn route_redirects_until_signed_in() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    let session = SessionManager::new(api.clone(), TokenStore::detached());
    let realtime = RealtimeClient::new(None, session.credentials());
    let app = DeckApp::from_parts(session, realtime, CliSettings::default());

    assert_eq!(
        app.route("/dashboard"),
        GuardDecision::Redirect {
            login_path: "/login".into(),
            return_to: "/dashboard".into(),
        }
    );
    assert!(runtime.block_on(app.whoami()).is_err());

    let app = signed_in_deck(&runtime, api);
    assert!(app.route("/dashboard").is_proceed());
}

#[test]
fn termination_is_attributed_to_the_signed_in_user() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    let app = signed_in_deck(&runtime, api.clone());

    let response = runtime
        .block_on(app.terminate_process(
            EntityId::Number(4242),
            TerminateOptions {
                service_id: Some("s1".into()),
                force: Some(true),
                ..Default::default()
            },
        ))
        .expect("terminate");
    assert!(response.success);

    let recorded = api.terminations();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].target_type, TerminationTarget::Process);
    assert_eq!(recorded[0].service_id.as_deref(), Some("s1"));
    assert_eq!(
        recorded[0].requested_by,
        Some(Requester {
            user_id: Some("u-ops".into()),
            username: Some("ops".into()),
        })
    );
    assert_eq!(
        render::termination(OutputFormat::Plain, &response).expect("render"),
        "process 4242 terminated: 4242 terminated"
    );
}

#[test]
fn listings_pass_through_the_rest_client() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    api.set_services(vec![
        service("api", StatusType::Healthy),
        service("db", StatusType::Down),
    ]);
    api.set_service_users("api", vec![operator()]);
    let app = signed_in_deck(&runtime, api);

    let down = runtime
        .block_on(app.services(ServiceQuery {
            query: None,
            status: Some("down".into()),
        }))
        .expect("services");
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].id, "db");

    let users = runtime.block_on(app.users("api")).expect("users");
    assert_eq!(users[0].label(), "Operations");

    let err = runtime.block_on(app.processes("missing")).unwrap_err();
    assert!(err.to_string().starts_with("Server error: 404 Not Found"));
}

#[test]
fn logout_returns_to_signed_out_state() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    let app = signed_in_deck(&runtime, api.clone());

    let state = app.logout();
    assert!(!state.is_authenticated());
    assert_eq!(api.logout_calls(), 1);
    assert_eq!(
        render::session(OutputFormat::Plain, &state).expect("render"),
        "not signed in"
    );
}

#[test]
fn startup_defers_profile_until_a_command_needs_it() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    FileStore::new(temp_dir.path().to_path_buf())
        .set("auth_token", "saved")
        .expect("persist token");
    let config = DashboardConfig {
        api_base_url: "http://127.0.0.1:9".into(),
        state_dir: Some(temp_dir.path().to_path_buf()),
        ..Default::default()
    };
    let api = Arc::new(MockApi::new());
    api.set_profile(Ok(operator()));

    let app = DeckApp::with_api(&config, api.clone(), CredentialCell::new(), CliSettings::default());
    assert!(app.session().is_authenticated());
    assert!(app.route("/dashboard").is_proceed());
    assert_eq!(api.me_calls(), 0);

    runtime
        .block_on(app.terminate_user("u-9", TerminateOptions::default()))
        .expect("terminate");
    assert_eq!(api.me_calls(), 1);
    assert_eq!(
        api.terminations()[0]
            .requested_by
            .as_ref()
            .and_then(|r| r.user_id.as_deref()),
        Some("u-ops")
    );

    let state = runtime.block_on(app.whoami()).expect("whoami");
    assert_eq!(state.user().map(|u| u.username.as_str()), Some("ops"));
    assert_eq!(api.me_calls(), 2);

    let state = app.logout();
    assert!(!state.is_authenticated());
    assert_eq!(api.me_calls(), 2);
}
