//! API credential handling.
//!
//! Secrets come from the environment, one `<VENUE>_SECRET_KEY` per
//! activated venue (plus `KUCOIN_API_PASSPHRASE` where required), and are
//! wrapped so they can never leak through Debug/Display output.

use std::fmt;

use crate::error::{GatewayError, Result};

/// Wrapper that masks sensitive strings in logs. Debug shows
/// `SecretString(***)`; Display shows `first4...last4`.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        SecretString(value)
    }

    /// Only for building the actual signature or header.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        let s = &self.0;
        if s.len() <= 8 {
            return "***".to_string();
        }
        format!("{}...{}", &s[..4], &s[s.len() - 4..])
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        SecretString::new(s)
    }
}

/// Signing material for one venue.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: SecretString,
    pub secret_key: SecretString,
    /// Venue C additionally signs an account passphrase.
    pub passphrase: Option<SecretString>,
}

impl Credentials {
    pub fn new(api_key: String, secret_key: String, passphrase: Option<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            secret_key: SecretString::new(secret_key),
            passphrase: passphrase.map(SecretString::new),
        }
    }
}

/// Reads `<VENUE>_SECRET_KEY` for the given venue name (uppercased).
/// A missing or empty variable is a startup configuration error.
pub fn secret_key_from_env(venue: &str) -> Result<String> {
    let var = format!("{}_SECRET_KEY", venue.to_uppercase());
    let value = std::env::var(&var)
        .map_err(|_| GatewayError::Config(format!("{} not set", var)))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(GatewayError::Config(format!("{} is empty", var)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_mask_the_value() {
        let secret = SecretString::new("NhqPtmdSJYdKjVHj".to_string());
        assert_eq!(format!("{:?}", secret), "SecretString(***)");
        assert_eq!(format!("{}", secret), "NhqP...jVHj");
        assert_eq!(SecretString::new("short".to_string()).masked(), "***");
    }

    #[test]
    fn env_lookup_uses_uppercased_venue_name() {
        // SAFETY: test-only, single-threaded test environment
        unsafe {
            std::env::set_var("TESTVENUE_SECRET_KEY", " s3cret ");
        }
        assert_eq!(secret_key_from_env("TestVenue").unwrap(), "s3cret");
        unsafe {
            std::env::remove_var("TESTVENUE_SECRET_KEY");
        }
        assert!(secret_key_from_env("TestVenue").is_err());
    }
}
