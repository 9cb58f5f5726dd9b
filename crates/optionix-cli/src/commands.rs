use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use optionix_core::{
    validate_login, ApiError, AuthController, Config, Registration, RegistrationForm,
    ValidationErrors,
};

/// Password taken from the environment instead of a prompt (for scripting)
const ENV_PASSWORD: &str = "OPTIONIX_PASSWORD";

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}

/// Token cancelled when the user presses Ctrl-C.
fn on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Ctrl-C received; cancelling request");
            child.cancel();
        }
    });
    token
}

fn report_invalid(errors: &ValidationErrors) -> anyhow::Error {
    for (field, message) in errors.iter() {
        eprintln!("  {}: {}", field.label(), message);
    }
    anyhow::anyhow!("Please correct the highlighted fields")
}

pub async fn login(auth: &AuthController, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => prompt_password("Password: ")?,
    };

    validate_login(&email, &password).map_err(|e| report_invalid(&e))?;

    let cancel = on_ctrl_c();
    auth.login_with_cancel(&email, &password, &cancel).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    let session = auth.session();
    let name = session
        .user()
        .and_then(|u| u.display_name())
        .unwrap_or("your account");
    println!("Signed in as {}", name);
    Ok(())
}

pub async fn register(auth: &AuthController) -> Result<()> {
    let form = RegistrationForm {
        full_name: prompt("Full name: ")?,
        email: prompt("Email: ")?,
        password: prompt_password("Password: ")?,
        confirm_password: prompt_password("Confirm password: ")?,
        accepted_terms: matches!(
            prompt("Accept the terms and conditions? [y/N] ")?
                .to_ascii_lowercase()
                .as_str(),
            "y" | "yes"
        ),
    };

    let account = form.validate().map_err(|e| report_invalid(&e))?;

    let cancel = on_ctrl_c();
    match auth.register_with_cancel(&account, &cancel).await? {
        Registration::SignedIn => println!("Registration successful. You are signed in."),
        Registration::LoginRequired => {
            println!("Registration successful. Please sign in with your credentials.")
        }
    }
    Ok(())
}

pub async fn logout(auth: &AuthController) -> Result<()> {
    auth.logout().await?;
    println!("Signed out");
    Ok(())
}

pub async fn status(auth: &AuthController) -> Result<()> {
    auth.restore().await;
    let snapshot = auth.session().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub async fn get(auth: &AuthController, path: &str) -> Result<()> {
    match auth.api().get_json::<Value>(path).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(ApiError::Unauthorized) => {
            bail!("Not signed in or session expired (run `optionix login`)")
        }
        Err(e) => Err(e.into()),
    }
}
