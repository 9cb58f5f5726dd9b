//! API client for the Optionix backend.
//!
//! Every backend call goes through [`ApiClient`], which owns the two
//! interceptor stages: the outbound stage attaches the stored credential as a
//! bearer header, the inbound stage turns a 401 on an authenticated call into
//! a cleared credential plus a session-expired signal.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{TokenStore, UserProfile};
use crate::config::{Config, LoginEncoding, Platform};
use crate::validation::NewAccount;

use super::{ApiError, AuthGrant};

/// Callback invoked after the inbound stage invalidates the session.
pub type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const LOGOUT_PATH: &str = "/auth/logout";

/// Which credential, if any, a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access<'a> {
    /// Login and register: sent bare, a 401 means bad credentials.
    Public,
    /// The stored credential; a 401 means the session expired.
    Stored,
    /// A freshly granted token not yet persisted; a 401 leaves the store alone.
    Bearer(&'a str),
}

/// API client for the Optionix backend.
/// Clone is cheap - reqwest::Client, the store and the hook list are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    platform: Platform,
    store: Arc<dyn TokenStore>,
    expiry_hooks: Arc<RwLock<Vec<ExpiryHook>>>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.expiry_hooks.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("platform", &self.platform)
            .field("expiry_hooks", &hooks)
            .finish()
    }
}

impl ApiClient {
    /// Create a client from configuration
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        Self::with_base_url(
            &config.api_base_url,
            config.platform,
            config.request_timeout(),
            store,
        )
    }

    pub fn with_base_url(
        base_url: &str,
        platform: Platform,
        timeout: Duration,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform,
            store,
            expiry_hooks: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Register a callback for inbound session invalidation.
    pub fn on_session_expired(&self, hook: ExpiryHook) {
        match self.expiry_hooks.write() {
            Ok(mut hooks) => hooks.push(hook),
            Err(poisoned) => poisoned.into_inner().push(hook),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ------------------------------------------------------------------------
    // Interceptor stages
    // ------------------------------------------------------------------------

    /// Outbound stage: attach the stored credential, or send without one.
    ///
    /// Returns the stored credential that was attached, if any.
    fn attach_credential(
        &self,
        request: RequestBuilder,
        access: Access<'_>,
    ) -> (RequestBuilder, Option<String>) {
        match access {
            Access::Public => (request, None),
            Access::Bearer(token) => (request.bearer_auth(token), None),
            Access::Stored => match self.store.load() {
                Some(token) => (request.bearer_auth(&token), Some(token)),
                None => {
                    debug!("No stored credential; sending request without bearer");
                    (request, None)
                }
            },
        }
    }

    /// Inbound stage: clear the credential the request carried and notify
    /// listeners.
    ///
    /// A 401 for a credential that has since been replaced (a login finished
    /// while the request was in flight) leaves the store and the session alone.
    fn invalidate_session(&self, attached: Option<&str>) {
        let current = match attached {
            Some(token) => self.store.clear_if(token).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to clear credential after 401");
                true
            }),
            None => self.store.load().is_none(),
        };
        if !current {
            debug!("Ignoring 401 for a credential that has been replaced");
            return;
        }
        info!("Session expired; credential cleared");

        let hooks: Vec<ExpiryHook> = match self.expiry_hooks.read() {
            Ok(hooks) => hooks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for hook in hooks {
            hook();
        }
    }

    async fn send(&self, request: RequestBuilder, access: Access<'_>) -> Result<Response, ApiError> {
        let (request, attached) = self.attach_credential(request, access);
        let response = request
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Request failed without a response");
                ApiError::Network(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, path = %url, "Backend returned error status");

        let error = ApiError::from_status(status, &body);
        if matches!(error, ApiError::Unauthorized) && access == Access::Stored {
            self.invalidate_session(attached.as_deref());
        }
        Err(error)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn read_grant(response: Response) -> Result<AuthGrant, ApiError> {
        let text = response.text().await?;
        let body: Value = if text.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))?
        };
        AuthGrant::parse(&body)
    }

    // ------------------------------------------------------------------------
    // Auth endpoints
    // ------------------------------------------------------------------------

    /// Exchange an identifier and secret for a grant.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<AuthGrant, ApiError> {
        let request = self.client.post(self.url(LOGIN_PATH));
        let request = match self.platform.login_encoding() {
            LoginEncoding::Json => request.json(&json!({
                "email": identifier,
                "password": secret,
            })),
            LoginEncoding::Form => request.form(&[("username", identifier), ("password", secret)]),
        };

        let response = self.send(request, Access::Public).await?;
        Self::read_grant(response).await
    }

    /// Create an account. The grant's token may be absent.
    pub async fn register(&self, account: &NewAccount) -> Result<AuthGrant, ApiError> {
        let request = self.client.post(self.url(REGISTER_PATH)).json(account);
        let response = self.send(request, Access::Public).await?;
        Self::read_grant(response).await
    }

    /// Profile of the session behind the stored credential.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        self.profile(Access::Stored).await
    }

    /// Profile for a token that has been granted but not yet stored.
    pub async fn fetch_profile_with(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.profile(Access::Bearer(token)).await
    }

    async fn profile(&self, access: Access<'_>) -> Result<UserProfile, ApiError> {
        let request = self.client.get(self.url(self.platform.profile_path()));
        let response = self.send(request, access).await?;
        Ok(UserProfile::new(Self::read_json::<Value>(response).await?))
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let request = self.client.post(self.url(LOGOUT_PATH));
        self.send(request, Access::Stored).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Passthroughs
    // ------------------------------------------------------------------------

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .send(self.client.get(self.url(path)), Access::Stored)
            .await?;
        Self::read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.send(request, Access::Stored).await?;
        Self::read_json(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(path)), Access::Stored)
            .await?;
        Ok(())
    }
}
