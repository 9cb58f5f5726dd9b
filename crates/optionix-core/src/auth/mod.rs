//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `TokenStore`: durable persistence of the bearer credential (memory,
//!   file or OS keychain)
//! - `AuthController`: login/register/logout orchestration and the observable
//!   `Session` exposed to the UI
//!
//! The credential carries no client-side expiry; a 401 from the backend is
//! the only signal that it is no longer valid.

pub mod controller;
pub mod error;
pub mod session;
pub mod store;

pub use controller::AuthController;
pub use error::{AuthError, Operation};
pub use session::{AuthPhase, Registration, Session, SessionSnapshot, UserProfile};
pub use store::{open_store, FileStore, KeyringStore, MemoryStore, StoreError, TokenStore};
