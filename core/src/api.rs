use crate::auth::CredentialCell;
use crate::config::DashboardConfig;
use crate::models::{
    EntityId, LoginResponse, ProcessInfo, ServiceQuery, ServiceSummary, TerminateOptions,
    TerminateRequest, TerminateResponse, TerminationTarget, UserProfile,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Failure of a REST call, rendered the way the dashboard shows it to users.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Server error: {}", describe_status(.status, .status_text, .message))]
    Server {
        status: u16,
        status_text: String,
        message: Option<String>,
    },
    #[error("Client/network error: {0}")]
    Network(String),
}

fn describe_status(status: &u16, status_text: &str, message: &Option<String>) -> String {
    let mut out = status.to_string();
    if !status_text.is_empty() {
        out.push(' ');
        out.push_str(status_text);
    }
    if let Some(message) = message.as_deref().filter(|m| !m.is_empty()) {
        out.push_str(" - ");
        out.push_str(message);
    }
    out
}

impl ApiError {
    /// Build a server error from a non-2xx status and its raw body.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_owned));
        Self::Server {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Network(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// REST backend of the dashboard.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError>;

    /// Client-side notification; never touches the network.
    fn logout(&self);

    async fn me(&self) -> Result<UserProfile, ApiError>;

    async fn services(&self, query: &ServiceQuery) -> Result<Vec<ServiceSummary>, ApiError>;

    async fn service_users(&self, service_id: &str) -> Result<Vec<UserProfile>, ApiError>;

    async fn service_processes(&self, service_id: &str) -> Result<Vec<ProcessInfo>, ApiError>;

    async fn terminate_user(
        &self,
        user_id: &str,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError>;

    async fn terminate_process(
        &self,
        pid: EntityId,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError>;
}

/// Add `Authorization: Bearer <token>` unless the request already carries one.
pub fn authorize(headers: &mut HeaderMap, token: Option<&str>) {
    let Some(token) = token else {
        return;
    };
    if headers.contains_key(AUTHORIZATION) {
        return;
    }
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Err(err) => warn!(error = %err, "credential is not a valid header value, sending unauthenticated"),
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// `DashboardApi` over HTTP.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    credentials: CredentialCell,
    default_headers: HeaderMap,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, credentials: CredentialCell) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            credentials,
            default_headers: HeaderMap::new(),
        }
    }

    pub fn from_config(config: &DashboardConfig, credentials: CredentialCell) -> Self {
        Self::new(config.api_base_url.clone(), credentials)
    }

    /// Headers sent with every request. An `Authorization` header here takes
    /// precedence over the session credential.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        authorize(&mut headers, self.credentials.get().as_deref());
        headers
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .headers(self.headers())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ApiError::from_response(status, &body);
            debug!(error = %err, "request failed");
            return Err(err);
        }
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Network(format!("invalid response body: {err}")))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, path)).await
    }
}

#[async_trait]
impl DashboardApi for HttpApi {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.post(
            "/auth/login",
            &json!({ "username": username, "password": password }),
        )
        .await
    }

    fn logout(&self) {
        debug!("client-side logout, no request sent");
    }

    async fn me(&self) -> Result<UserProfile, ApiError> {
        self.get("/auth/me").await
    }

    async fn services(&self, query: &ServiceQuery) -> Result<Vec<ServiceSummary>, ApiError> {
        let mut params = Vec::new();
        if let Some(q) = query.query.as_deref().filter(|q| !q.is_empty()) {
            params.push(("q", q));
        }
        if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
            params.push(("status", status));
        }
        let request = self.request(Method::GET, "/services").query(&params);
        self.send(request).await
    }

    async fn service_users(&self, service_id: &str) -> Result<Vec<UserProfile>, ApiError> {
        self.get(&format!("/services/{}/users", encode_segment(service_id)))
            .await
    }

    async fn service_processes(&self, service_id: &str) -> Result<Vec<ProcessInfo>, ApiError> {
        self.get(&format!("/services/{}/processes", encode_segment(service_id)))
            .await
    }

    async fn terminate_user(
        &self,
        user_id: &str,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError> {
        let body = TerminateRequest::new(TerminationTarget::User, user_id.into(), options);
        self.post(&format!("/terminate/user/{}", encode_segment(user_id)), &body)
            .await
    }

    async fn terminate_process(
        &self,
        pid: EntityId,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError> {
        let path = format!("/terminate/process/{}", encode_segment(&pid.to_string()));
        let body = TerminateRequest::new(TerminationTarget::Process, pid, options);
        self.post(&path, &body).await
    }
}

/// Scripted in-process backend for tests and smoke runs.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    logout_calls: AtomicUsize,
    me_calls: AtomicUsize,
    profile_gate: Mutex<Option<Arc<Notify>>>,
}

#[derive(Default)]
struct MockState {
    logins: VecDeque<Result<LoginResponse, ApiError>>,
    profile: Option<Result<UserProfile, ApiError>>,
    services: Vec<ServiceSummary>,
    users: HashMap<String, Vec<UserProfile>>,
    processes: HashMap<String, Vec<ProcessInfo>>,
    terminations: Vec<TerminateRequest>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next `login` call.
    pub fn push_login(&self, outcome: Result<LoginResponse, ApiError>) {
        self.state.lock().logins.push_back(outcome);
    }

    /// Outcome returned by every `me` call until replaced.
    pub fn set_profile(&self, outcome: Result<UserProfile, ApiError>) {
        self.state.lock().profile = Some(outcome);
    }

    pub fn set_services(&self, services: Vec<ServiceSummary>) {
        self.state.lock().services = services;
    }

    pub fn set_service_users(&self, service_id: &str, users: Vec<UserProfile>) {
        self.state.lock().users.insert(service_id.to_owned(), users);
    }

    pub fn set_service_processes(&self, service_id: &str, processes: Vec<ProcessInfo>) {
        self.state
            .lock()
            .processes
            .insert(service_id.to_owned(), processes);
    }

    /// Make `me` wait for a notification before answering.
    pub fn gate_profile(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.profile_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn terminations(&self) -> Vec<TerminateRequest> {
        self.state.lock().terminations.clone()
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    fn unauthorized() -> ApiError {
        ApiError::Server {
            status: 401,
            status_text: "Unauthorized".into(),
            message: Some("invalid credentials".into()),
        }
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::Server {
            status: 404,
            status_text: "Not Found".into(),
            message: Some(format!("{what} not found")),
        }
    }

    fn record_termination(&self, request: TerminateRequest) -> TerminateResponse {
        let response = TerminateResponse {
            success: true,
            message: Some(format!("{} terminated", request.target_id)),
            target_type: request.target_type,
            target_id: request.target_id.clone(),
            code: None,
            meta: None,
        };
        self.state.lock().terminations.push(request);
        response
    }
}

#[async_trait]
impl DashboardApi for MockApi {
    async fn login(&self, _username: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        self.state
            .lock()
            .logins
            .pop_front()
            .unwrap_or_else(|| Err(Self::unauthorized()))
    }

    fn logout(&self) {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn me(&self) -> Result<UserProfile, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.profile_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state
            .lock()
            .profile
            .clone()
            .unwrap_or_else(|| Err(Self::unauthorized()))
    }

    async fn services(&self, query: &ServiceQuery) -> Result<Vec<ServiceSummary>, ApiError> {
        let services = self.state.lock().services.clone();
        Ok(services
            .into_iter()
            .filter(|service| {
                query
                    .query
                    .as_deref()
                    .map_or(true, |q| service.name.contains(q) || service.id.contains(q))
            })
            .filter(|service| {
                query
                    .status
                    .as_deref()
                    .map_or(true, |status| service.status.to_string() == status)
            })
            .collect())
    }

    async fn service_users(&self, service_id: &str) -> Result<Vec<UserProfile>, ApiError> {
        self.state
            .lock()
            .users
            .get(service_id)
            .cloned()
            .ok_or_else(|| Self::not_found("service"))
    }

    async fn service_processes(&self, service_id: &str) -> Result<Vec<ProcessInfo>, ApiError> {
        self.state
            .lock()
            .processes
            .get(service_id)
            .cloned()
            .ok_or_else(|| Self::not_found("service"))
    }

    async fn terminate_user(
        &self,
        user_id: &str,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError> {
        let request = TerminateRequest::new(TerminationTarget::User, user_id.into(), options);
        Ok(self.record_termination(request))
    }

    async fn terminate_process(
        &self,
        pid: EntityId,
        options: TerminateOptions,
    ) -> Result<TerminateResponse, ApiError> {
        let request = TerminateRequest::new(TerminationTarget::Process, pid, options);
        Ok(self.record_termination(request))
    }
}
