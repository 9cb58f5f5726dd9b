use thiserror::Error;

use crate::api::ApiError;

use super::StoreError;

const CONNECTIVITY_MESSAGE: &str = "Unable to connect to server. Check your internet connection.";
const MALFORMED_MESSAGE: &str = "Unexpected response from server. Please try again later.";
const SERVER_MESSAGE: &str = "Server error. Please try again later.";

/// Which controller operation produced an error; picks the fallback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Restore,
    Login,
    Register,
    Logout,
}

impl Operation {
    fn rejected_message(&self) -> &'static str {
        match self {
            Operation::Login => "Login failed. Please check your credentials.",
            Operation::Register => "Registration failed. Please try again.",
            Operation::Restore => "Your session could not be restored. Please sign in again.",
            Operation::Logout => "Logout failed.",
        }
    }
}

/// Failure of an auth controller operation.
///
/// `Display` is the single message meant for the user; `source()` carries the
/// underlying cause for logging.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The backend refused the request (4xx).
    #[error("{message}")]
    Rejected { message: String, source: ApiError },

    /// The backend failed (5xx).
    #[error("{message}")]
    Server { message: String, source: ApiError },

    /// No response was received.
    #[error("{message}")]
    Connectivity { message: String, source: ApiError },

    /// A response arrived but could not be understood.
    #[error("{message}")]
    Malformed { message: String, source: ApiError },

    #[error("Could not save your session on this device.")]
    Storage(#[source] StoreError),

    #[error("Another sign-in request is already in progress.")]
    Busy,

    #[error("The request was cancelled.")]
    Cancelled,
}

impl AuthError {
    pub fn from_api(operation: Operation, error: ApiError) -> Self {
        if error.is_connectivity() {
            return AuthError::Connectivity {
                message: CONNECTIVITY_MESSAGE.to_string(),
                source: error,
            };
        }
        if error.is_client_error() {
            return AuthError::Rejected {
                message: error
                    .backend_message()
                    .unwrap_or_else(|| operation.rejected_message().to_string()),
                source: error,
            };
        }
        match error {
            ApiError::Server { .. } => AuthError::Server {
                message: error
                    .backend_message()
                    .unwrap_or_else(|| SERVER_MESSAGE.to_string()),
                source: error,
            },
            _ => AuthError::Malformed {
                message: MALFORMED_MESSAGE.to_string(),
                source: error,
            },
        }
    }

    /// The message to show in the UI.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Errors that should be recorded on the session for the UI.
    pub(crate) fn is_reportable(&self) -> bool {
        !matches!(self, AuthError::Busy | AuthError::Cancelled)
    }
}
