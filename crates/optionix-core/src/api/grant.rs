//! Normalization of login/register response bodies.
//!
//! Backends answer with `{ "token": .. }` or `{ "access_token": .. }`, with or
//! without an embedded `user`. Everything is folded into [`AuthGrant`] here so
//! the controller never inspects raw JSON.

use serde_json::Value;

use crate::auth::UserProfile;

use super::ApiError;

const TOKEN_FIELDS: [&str; 2] = ["token", "access_token"];

/// Normalized result of a successful login or register call.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
}

impl AuthGrant {
    pub fn parse(body: &Value) -> Result<Self, ApiError> {
        let object = body
            .as_object()
            .ok_or_else(|| malformed(format!("expected a JSON object, got {}", kind_of(body))))?;

        let mut token: Option<&str> = None;
        for field in TOKEN_FIELDS {
            let Some(raw) = object.get(field) else {
                continue;
            };
            let value = match raw {
                Value::String(s) if !s.is_empty() => s.as_str(),
                Value::Null => continue,
                other => {
                    return Err(malformed(format!(
                        "'{}' must be a non-empty string, got {}",
                        field,
                        kind_of(other)
                    )))
                }
            };
            match token {
                Some(existing) if existing != value => {
                    return Err(malformed("'token' and 'access_token' disagree".to_string()))
                }
                _ => token = Some(value),
            }
        }

        let user = match object.get("user") {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(UserProfile::new(value.clone())),
            Some(other) => {
                return Err(malformed(format!(
                    "'user' must be an object, got {}",
                    kind_of(other)
                )))
            }
        };

        Ok(Self {
            token: token.map(str::to_string),
            user,
        })
    }

    /// Login responses must carry a token.
    pub fn require_token(self) -> Result<(String, Option<UserProfile>), ApiError> {
        match self.token {
            Some(token) => Ok((token, self.user)),
            None => Err(malformed("response carried no token".to_string())),
        }
    }
}

fn malformed(reason: String) -> ApiError {
    ApiError::InvalidResponse(format!("auth response: {}", reason))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
