//! The single source of truth for authentication state.
//!
//! `AuthController` owns the in-memory [`Session`] and publishes every change
//! through a `tokio::sync::watch` channel. Login and register are rejected
//! while another operation is pending; logout and restore wait their turn.
//! The startup state is settled only by reading the stored credential, so
//! login and register run that step first when `restore` has not.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::validation::NewAccount;

use super::error::Operation;
use super::{AuthError, AuthPhase, Registration, Session, TokenStore, UserProfile};

pub struct AuthController {
    api: ApiClient,
    state: Arc<watch::Sender<Session>>,
    in_flight: Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AuthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthController")
            .field("api", &self.api)
            .field("phase", &self.state.borrow().phase())
            .field("torn_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl AuthController {
    /// Build a controller around `api`, persisting through the api's store.
    ///
    /// Registers a session-expired hook so a 401 anywhere in the pipeline
    /// moves the session to anonymous. The hook stands down if a new
    /// credential was stored after the expired one was cleared.
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(Session::default());
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();

        let hook_state = Arc::downgrade(&state);
        let hook_store = Arc::clone(api.store());
        let hook_shutdown = shutdown.clone();
        api.on_session_expired(Arc::new(move || {
            if hook_shutdown.is_cancelled() || hook_store.load().is_some() {
                return;
            }
            if let Some(state) = hook_state.upgrade() {
                state.send_modify(Session::sign_out);
                info!("Session invalidated by backend");
            }
        }));

        Self {
            api,
            state,
            in_flight: Mutex::new(()),
            shutdown,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn store(&self) -> &Arc<dyn TokenStore> {
        self.api.store()
    }

    /// Current session snapshot.
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Observe every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn clear_error(&self) {
        self.publish(Session::clear_error);
    }

    /// Stop publishing state and abort in-flight network calls.
    pub fn teardown(&self) {
        debug!("Auth controller torn down");
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Resolve the startup state from the stored credential.
    pub async fn restore(&self) -> AuthPhase {
        let _guard = self.in_flight.lock().await;
        self.publish(|s| s.begin(false));

        let phase = self.resolve_stored().await;
        if phase != AuthPhase::Unknown {
            self.publish(Session::finish);
        }
        phase
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), AuthError> {
        self.login_with_cancel(identifier, secret, &CancellationToken::new())
            .await
    }

    /// Like [`login`](Self::login), abandoned when `cancel` fires.
    pub async fn login_with_cancel(
        &self,
        identifier: &str,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let _guard = self.try_begin(Operation::Login)?;
        self.ensure_resolved().await;

        let result = async {
            let grant = self
                .cancellable(cancel, Operation::Login, self.api.login(identifier, secret))
                .await?;
            let (token, embedded) = grant
                .require_token()
                .map_err(|e| AuthError::from_api(Operation::Login, e))?;
            let user = self
                .resolve_profile(&token, embedded, Operation::Login, cancel)
                .await?;
            self.persist(&token)?;
            Ok::<_, AuthError>(user)
        }
        .await;

        match result {
            Ok(user) => {
                info!("Login successful");
                self.publish(|s| s.sign_in(user));
                Ok(())
            }
            Err(e) => Err(self.report(Operation::Login, e)),
        }
    }

    pub async fn register(&self, account: &NewAccount) -> Result<Registration, AuthError> {
        self.register_with_cancel(account, &CancellationToken::new())
            .await
    }

    /// Like [`register`](Self::register), abandoned when `cancel` fires.
    pub async fn register_with_cancel(
        &self,
        account: &NewAccount,
        cancel: &CancellationToken,
    ) -> Result<Registration, AuthError> {
        let _guard = self.try_begin(Operation::Register)?;
        self.ensure_resolved().await;

        let result = async {
            let grant = self
                .cancellable(cancel, Operation::Register, self.api.register(account))
                .await?;
            let Some(token) = grant.token else {
                return Ok::<_, AuthError>(None);
            };
            let user = self
                .resolve_profile(&token, grant.user, Operation::Register, cancel)
                .await?;
            self.persist(&token)?;
            Ok(Some(user))
        }
        .await;

        match result {
            Ok(Some(user)) => {
                info!("Registration successful; signed in");
                self.publish(|s| s.sign_in(user));
                Ok(Registration::SignedIn)
            }
            Ok(None) => {
                info!("Registration successful; login required");
                self.publish(Session::finish);
                Ok(Registration::LoginRequired)
            }
            Err(e) => Err(self.report(Operation::Register, e)),
        }
    }

    /// Sign out locally, telling the backend on a best-effort basis.
    ///
    /// The session always ends anonymous. An error is returned only when the
    /// stored credential could not be removed.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.in_flight.lock().await;
        self.publish(|s| s.begin(false));

        let never = CancellationToken::new();
        if let Err(e) = self
            .cancellable(&never, Operation::Logout, self.api.logout())
            .await
        {
            warn!(error = %e, "Logout API call failed; continuing with local logout");
        }

        let cleared = self.store().clear();
        self.publish(|s| {
            s.sign_out();
            s.clear_error();
            s.finish();
        });

        match cleared {
            Ok(()) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear credential on logout");
                Err(AuthError::Storage(e))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn try_begin(&self, operation: Operation) -> Result<MutexGuard<'_, ()>, AuthError> {
        let guard = self.in_flight.try_lock().map_err(|_| {
            debug!(?operation, "Rejected while another auth operation is pending");
            AuthError::Busy
        })?;
        self.publish(|s| s.begin(true));
        Ok(guard)
    }

    /// Load the stored credential and settle the session from it.
    ///
    /// Must run under the in-flight guard. Any failure clears the credential
    /// and resolves to anonymous; only a teardown leaves the phase unknown.
    /// Does not end `loading`.
    async fn resolve_stored(&self) -> AuthPhase {
        let Some(token) = self.store().load() else {
            debug!("No stored credential");
            self.publish(Session::sign_out);
            return AuthPhase::Anonymous;
        };

        let never = CancellationToken::new();
        match self
            .cancellable(&never, Operation::Restore, self.api.fetch_profile())
            .await
        {
            Ok(user) => {
                info!("Session restored");
                self.publish(|s| s.resolve(Some(user)));
                AuthPhase::Authenticated
            }
            Err(AuthError::Cancelled) => AuthPhase::Unknown,
            Err(e) => {
                warn!(error = %e, cause = ?std::error::Error::source(&e), "Session restore failed");
                if let Err(e) = self.store().clear_if(&token) {
                    warn!(error = %e, "Failed to clear stale credential");
                }
                self.publish(Session::sign_out);
                AuthPhase::Anonymous
            }
        }
    }

    /// Run the startup step if nothing has resolved the session yet.
    async fn ensure_resolved(&self) {
        let unresolved = self.state.borrow().phase() == AuthPhase::Unknown;
        if unresolved {
            debug!("Session unresolved; reading stored credential first");
            self.resolve_stored().await;
        }
    }

    /// Await `request` unless the caller or a teardown cancels first.
    async fn cancellable<T>(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        request: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, AuthError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(AuthError::Cancelled),
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = request => result.map_err(|e| AuthError::from_api(operation, e)),
        }
    }

    /// Use the profile embedded in the grant, or fetch it with the new token.
    async fn resolve_profile(
        &self,
        token: &str,
        embedded: Option<UserProfile>,
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<UserProfile, AuthError> {
        match embedded {
            Some(user) => Ok(user),
            None => {
                self.cancellable(cancel, operation, self.api.fetch_profile_with(token))
                    .await
            }
        }
    }

    fn persist(&self, token: &str) -> Result<(), AuthError> {
        self.store().save(token).map_err(AuthError::Storage)
    }

    /// Record a failed operation on the session and hand the error back.
    fn report(&self, operation: Operation, error: AuthError) -> AuthError {
        if error.is_reportable() {
            warn!(
                ?operation,
                error = %error,
                cause = ?std::error::Error::source(&error),
                "Auth operation failed"
            );
            let message = error.user_message();
            self.publish(|s| s.fail(message));
        } else {
            debug!(?operation, error = %error, "Auth operation abandoned");
            self.publish(Session::finish);
        }
        error
    }

    /// Apply `update` to the session unless the controller was torn down.
    fn publish(&self, update: impl FnOnce(&mut Session)) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.state.send_modify(update);
    }
}
