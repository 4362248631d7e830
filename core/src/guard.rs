use crate::auth::SessionManager;

pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const RETURN_PARAM: &str = "returnUrl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// Send the user to the login page; `return_to` is where to resume afterwards.
    Redirect { login_path: String, return_to: String },
}

impl GuardDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }

    /// Navigation target for this decision, e.g. `/login?returnUrl=%2Fdashboard`.
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Proceed => None,
            Self::Redirect {
                login_path,
                return_to,
            } => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair(RETURN_PARAM, return_to)
                    .finish();
                Some(format!("{login_path}?{query}"))
            }
        }
    }
}

pub fn decide(is_authenticated: bool, path: &str, login_path: &str) -> GuardDecision {
    if is_authenticated {
        return GuardDecision::Proceed;
    }
    let return_to = if path.is_empty() { "/" } else { path };
    GuardDecision::Redirect {
        login_path: login_path.to_string(),
        return_to: return_to.to_string(),
    }
}

/// Navigation gate backed by the live session state.
#[derive(Clone)]
pub struct AccessGuard {
    session: SessionManager,
    login_path: String,
}

impl AccessGuard {
    pub fn new(session: SessionManager) -> Self {
        Self::with_login_path(session, DEFAULT_LOGIN_PATH)
    }

    pub fn with_login_path(session: SessionManager, login_path: impl Into<String>) -> Self {
        Self {
            session,
            login_path: login_path.into(),
        }
    }

    pub fn check(&self, path: &str) -> GuardDecision {
        decide(self.session.is_authenticated(), path, &self.login_path)
    }
}
