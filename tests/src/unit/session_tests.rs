use statusdeck_core::api::{ApiError, MockApi};
use statusdeck_core::auth::{AuthState, CredentialCell, SessionManager, TokenStore};
use statusdeck_core::guard::{AccessGuard, GuardDecision};
use statusdeck_core::models::{LoginResponse, RoleType, UserProfile};
use statusdeck_core::store::{FileStore, KeyValueStore, UnavailableStore};
use std::sync::Arc;
use tempfile::TempDir;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn profile(id: &str) -> UserProfile {
    UserProfile {
        id: id.into(),
        username: format!("user-{id}"),
        display_name: None,
        roles: vec![RoleType::Viewer],
        permissions: None,
        active: None,
        processes: None,
        meta: None,
    }
}

fn token_response(token: &str) -> Result<LoginResponse, ApiError> {
    Ok(LoginResponse {
        token: Some(token.into()),
        user: Some(profile("u1")),
    })
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AuthState>) -> Vec<AuthState> {
    let mut states = Vec::new();
    while let Ok(state) = rx.try_recv() {
        states.push(state);
    }
    states
}

#[test]
fn every_published_state_keeps_token_and_flag_in_step() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    api.push_login(token_response("t1"));
    api.push_login(Err(ApiError::Network("offline".into())));
    api.push_login(Ok(LoginResponse::default()));
    api.push_login(token_response("t2"));
    let session = SessionManager::new(api, TokenStore::detached());
    let mut states = session.subscribe();

    runtime.block_on(async {
        session.login("a", "pw").await.expect("first login");
        session.logout();
        assert!(session.login("a", "pw").await.is_err());
        session.login("a", "pw").await.expect("tokenless login");
        session.login("a", "pw").await.expect("second login");
        session.logout();
        session.logout();
    });

    let published = drain(&mut states);
    assert!(published.len() >= 6);
    for state in &published {
        assert_eq!(state.is_authenticated(), state.token().is_some());
    }
    assert!(!session.is_authenticated());
}

#[test]
fn token_survives_restart_in_file_store() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(temp_dir.path().to_path_buf()));

    let api = Arc::new(MockApi::new());
    api.push_login(token_response("persisted"));
    let session = SessionManager::new(api, TokenStore::new(store.clone()));
    runtime
        .block_on(session.login("ops", "pw"))
        .expect("login");
    assert_eq!(
        store.get("auth_token").expect("read"),
        Some("persisted".to_string())
    );

    let api = Arc::new(MockApi::new());
    api.set_profile(Ok(profile("u1")));
    let credentials = CredentialCell::new();
    let restored = runtime.block_on(SessionManager::open(
        api.clone(),
        TokenStore::new(store.clone()),
        credentials.clone(),
    ));
    assert!(restored.is_authenticated());
    assert_eq!(credentials.get().as_deref(), Some("persisted"));
    assert_eq!(restored.user().map(|u| u.id), Some("u1".to_string()));
    assert_eq!(api.me_calls(), 1);

    restored.logout();
    assert_eq!(store.get("auth_token").expect("read"), None);
    assert_eq!(credentials.get(), None);
}

#[test]
fn unavailable_storage_still_allows_a_session() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    api.push_login(token_response("volatile"));
    let session = SessionManager::new(api, TokenStore::new(Arc::new(UnavailableStore)));

    assert!(!session.is_authenticated());
    runtime
        .block_on(session.login("ops", "pw"))
        .expect("login");
    assert_eq!(session.token().as_deref(), Some("volatile"));
    session.logout();
    assert!(!session.is_authenticated());
}

#[test]
fn guard_follows_the_live_session() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    api.push_login(token_response("t1"));
    let session = SessionManager::new(api, TokenStore::detached());
    let guard = AccessGuard::new(session.clone());

    assert_eq!(
        guard.check("/dashboard").location().as_deref(),
        Some("/login?returnUrl=%2Fdashboard")
    );
    runtime
        .block_on(session.login("ops", "pw"))
        .expect("login");
    assert_eq!(guard.check("/dashboard"), GuardDecision::Proceed);
    session.logout();
    assert!(!guard.check("/services/s1").is_proceed());
}

#[test]
fn profile_arriving_after_logout_is_ignored() {
    let runtime = test_runtime();
    let api = Arc::new(MockApi::new());
    api.push_login(Ok(LoginResponse {
        token: Some("t1".into()),
        user: None,
    }));
    api.set_profile(Ok(profile("late")));
    let gate = api.gate_profile();
    let session = SessionManager::new(api, TokenStore::detached());

    runtime.block_on(async {
        session.login("ops", "pw").await.expect("login");
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.refresh_profile().await }
        });
        tokio::task::yield_now().await;
        session.logout();
        gate.notify_one();
        let fetched = pending.await.expect("join");
        assert!(fetched.is_none());
    });

    assert!(session.user().is_none());
    assert!(!session.is_authenticated());
}
