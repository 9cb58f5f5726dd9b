use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile returned by the backend. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(transparent)]
pub struct UserProfile(Value);

impl UserProfile {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Best-effort name for display: full name, then username, then email.
    pub fn display_name(&self) -> Option<&str> {
        ["full_name", "username", "email"]
            .iter()
            .filter_map(|field| self.0.get(field).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
    }
}

/// Coarse authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthPhase {
    /// Startup, before the stored credential has been checked
    Unknown,
    Authenticated,
    Anonymous,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Registration {
    /// The backend issued a token; the user is now signed in.
    SignedIn,
    /// No token was issued; a separate login is needed.
    LoginRequired,
}

impl Registration {
    pub fn requires_login(&self) -> bool {
        matches!(self, Registration::LoginRequired)
    }
}

/// In-memory authentication state as seen by the UI.
///
/// Only the auth controller mutates it. Authentication is derived from
/// `user`, never stored separately.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    user: Option<UserProfile>,
    loading: bool,
    error: Option<String>,
    resolved: bool,
    authenticated_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
            error: None,
            resolved: false,
            authenticated_at: None,
        }
    }
}

impl Session {
    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
        self.authenticated_at
    }

    pub fn phase(&self) -> AuthPhase {
        if !self.resolved {
            AuthPhase::Unknown
        } else if self.user.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Anonymous
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated(),
            loading: self.loading,
            error: self.error.clone(),
            phase: self.phase(),
        }
    }

    pub(crate) fn begin(&mut self, reset_error: bool) {
        self.loading = true;
        if reset_error {
            self.error = None;
        }
    }

    /// Settle who is signed in. Leaves `loading` untouched.
    pub(crate) fn resolve(&mut self, user: Option<UserProfile>) {
        self.authenticated_at = user.as_ref().map(|_| Utc::now());
        self.user = user;
        self.resolved = true;
    }

    pub(crate) fn sign_in(&mut self, user: UserProfile) {
        self.resolve(Some(user));
        self.finish();
    }

    pub(crate) fn sign_out(&mut self) {
        self.resolve(None);
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.error = Some(message);
        self.finish();
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    /// End the pending operation. Does not resolve the startup state.
    pub(crate) fn finish(&mut self) {
        self.loading = false;
    }
}

/// Serializable view of a [`Session`] for UI layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub phase: AuthPhase,
}
