//! Client-side form checks for the login and registration screens.
//!
//! These run before anything touches the network; a failing form never
//! reaches the auth controller.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const MIN_LOGIN_PASSWORD_LEN: usize = 6;
const MIN_REGISTER_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    FullName,
    Email,
    Password,
    ConfirmPassword,
    Terms,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::FullName => "full name",
            Field::Email => "email",
            Field::Password => "password",
            Field::ConfirmPassword => "password confirmation",
            Field::Terms => "terms",
        }
    }
}

/// Every failing field with its message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<Field, String>,
}

impl ValidationErrors {
    fn add(&mut self, field: Field, message: &str) {
        self.errors.insert(field, message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.errors.iter().map(|(f, m)| (*f, m.as_str()))
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.values().map(String::as_str).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+@\S+\.\S+").expect("email regex should compile"));

/// Something shaped like `x@y.z`, anywhere in the input.
pub fn looks_like_email(input: &str) -> bool {
    EMAIL_PATTERN.is_match(input)
}

fn check_email(errors: &mut ValidationErrors, email: &str) {
    if email.trim().is_empty() {
        errors.add(Field::Email, "Email is required");
    } else if !looks_like_email(email) {
        errors.add(Field::Email, "Email is invalid");
    }
}

pub fn validate_login(email: &str, password: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_email(&mut errors, email);

    if password.is_empty() {
        errors.add(Field::Password, "Password is required");
    } else if password.chars().count() < MIN_LOGIN_PASSWORD_LEN {
        errors.add(Field::Password, "Password must be at least 6 characters");
    }

    errors.into_result()
}

/// Raw registration form as entered.
#[derive(Clone, Default)]
pub struct RegistrationForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub accepted_terms: bool,
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("accepted_terms", &self.accepted_terms)
            .finish_non_exhaustive()
    }
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<NewAccount, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.full_name.trim().is_empty() {
            errors.add(Field::FullName, "Full name is required");
        }

        check_email(&mut errors, &self.email);

        let password = &self.password;
        if password.is_empty() {
            errors.add(Field::Password, "Password is required");
        } else if password.chars().count() < MIN_REGISTER_PASSWORD_LEN {
            errors.add(Field::Password, "Password must be at least 8 characters");
        } else if !(password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_ascii_digit()))
        {
            errors.add(
                Field::Password,
                "Password must contain uppercase, lowercase, and number",
            );
        }

        if self.confirm_password.is_empty() {
            errors.add(Field::ConfirmPassword, "Please confirm your password");
        } else if self.password != self.confirm_password {
            errors.add(Field::ConfirmPassword, "Passwords do not match");
        }

        if !self.accepted_terms {
            errors.add(Field::Terms, "You must accept the terms and conditions");
        }

        errors.into_result()?;

        Ok(NewAccount {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            data_retention_consent: self.accepted_terms,
            data_processing_consent: self.accepted_terms,
            marketing_consent: false,
        })
    }
}

/// Body of `POST /auth/register`.
#[derive(Clone, Serialize)]
pub struct NewAccount {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub data_retention_consent: bool,
    pub data_processing_consent: bool,
    pub marketing_consent: bool,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("data_retention_consent", &self.data_retention_consent)
            .field("data_processing_consent", &self.data_processing_consent)
            .field("marketing_consent", &self.marketing_consent)
            .finish()
    }
}
