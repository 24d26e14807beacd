//! Login, registration and logout.
//!
//! Form checks run before any request is sent; the backend owns everything
//! else about credentials.

use tracing::info;

use crate::error::ChatError;
use crate::gateway::Gateway;
use crate::token::TokenStore;

const MIN_PASSWORD_LEN: usize = 6;

pub fn validate_login(email: &str, password: &str) -> Result<(), ChatError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ChatError::Validation("Email and password are required.".into()));
    }
    Ok(())
}

pub fn validate_registration(name: &str, email: &str, password: &str) -> Result<(), ChatError> {
    if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(ChatError::Validation("All fields are required.".into()));
    }
    if !is_plausible_email(email.trim()) {
        return Err(ChatError::Validation("Please enter a valid email address.".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ChatError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long."
        )));
    }
    Ok(())
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub async fn login(gateway: &dyn Gateway, email: &str, password: &str) -> Result<(), ChatError> {
    validate_login(email, password)?;
    gateway.login(email.trim(), password).await.map_err(|e| match e {
        ChatError::Unauthorized => {
            ChatError::Validation("Invalid credentials. Please try again.".into())
        }
        other => other,
    })
}

pub async fn register(
    gateway: &dyn Gateway,
    name: &str,
    email: &str,
    password: &str,
) -> Result<(), ChatError> {
    validate_registration(name, email, password)?;
    gateway.register(name.trim(), email.trim(), password).await
}

pub fn logout(tokens: &TokenStore) -> Result<(), ChatError> {
    tokens.clear()?;
    info!("Logged out");
    Ok(())
}
