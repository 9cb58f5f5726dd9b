//! Request pipeline for the Optionix backend.
//!
//! This module provides the `ApiClient` through which every backend call is
//! made. It attaches the stored bearer credential to outbound requests and
//! invalidates the session when an authenticated call comes back 401.
//!
//! Login and register bodies are normalized into an `AuthGrant` before they
//! reach the auth controller.

pub mod client;
pub mod error;
pub mod grant;

pub use client::{ApiClient, ExpiryHook};
pub use error::ApiError;
pub use grant::AuthGrant;
