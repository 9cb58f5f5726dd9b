use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - session expired or credential invalid")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Server error ({status}): {body}")]
    Server { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            400..=499 => ApiError::Rejected {
                status,
                body: truncated,
            },
            500..=599 => ApiError::Server {
                status,
                body: truncated,
            },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when no response was received at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    /// True for 4xx responses, where the backend refused the request itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized
                | ApiError::AccessDenied(_)
                | ApiError::NotFound(_)
                | ApiError::RateLimited
                | ApiError::Rejected { .. }
        )
    }

    /// Human-readable reason supplied by the backend, if any.
    ///
    /// Looks for a string `message` or `detail` field in a JSON error body.
    pub fn backend_message(&self) -> Option<String> {
        let body = match self {
            ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::Rejected { body, .. }
            | ApiError::Server { body, .. } => body,
            _ => return None,
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        ["message", "detail"]
            .iter()
            .filter_map(|field| value.get(field).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|msg| !msg.is_empty())
            .map(str::to_string)
    }
}
