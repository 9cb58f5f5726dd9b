//! Client-side session management for Optionix frontends.
//!
//! The crate persists the bearer credential, keeps the observable session
//! state, and routes every backend call through a request pipeline that
//! attaches the credential and reacts to expired sessions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use optionix_core::{ApiClient, AuthController, Config, MemoryStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let api = ApiClient::new(&config, Arc::new(MemoryStore::new()))?;
//! let auth = AuthController::new(api);
//! auth.restore().await;
//! if let Err(e) = auth.login("trader@optionix.io", "Secret123").await {
//!     eprintln!("{}", e.user_message());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod validation;

pub use api::{ApiClient, ApiError, AuthGrant};
pub use auth::{
    open_store, AuthController, AuthError, AuthPhase, FileStore, KeyringStore, MemoryStore,
    Registration, Session, SessionSnapshot, StoreError, TokenStore, UserProfile,
};
pub use config::{Config, ConfigError, Platform, StorageBackend};
pub use validation::{validate_login, NewAccount, RegistrationForm, ValidationErrors};
