//! Credential Sources
//!
//! The connection state machine never talks to a terminal directly. When it needs a username
//! or password it asks a [`CredentialSource`]:
//!
//! - [`TerminalPrompt`]: interactive prompts via `dialoguer` (password input is not echoed)
//! - [`StaticCredentials`]: fixed answers for scripts, services and tests

use dialoguer::{Confirm, Input, Password};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::{Result, WrdsError};

/// Supplies credentials when the configured ones were not accepted
pub trait CredentialSource {
    /// Ask for a username, offering `default` (the OS user name)
    fn username(&self, default: &str) -> Result<String>;

    /// Ask for a password
    fn password(&self) -> Result<Zeroizing<String>>;

    /// Ask whether freshly prompted credentials should be saved to the credential file
    fn confirm_persist(&self) -> Result<bool>;
}

/// Interactive terminal prompts
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl CredentialSource for TerminalPrompt {
    fn username(&self, default: &str) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt("Enter your WRDS username");
        if !default.is_empty() {
            input = input.default(default.to_string());
        }
        input
            .interact_text()
            .map(|name| name.trim().to_string())
            .map_err(|e| WrdsError::credentials(format!("Failed to read username: {e}")))
    }

    fn password(&self) -> Result<Zeroizing<String>> {
        Password::new()
            .with_prompt("Enter your password")
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| WrdsError::credentials(format!("Failed to read password: {e}")))
    }

    fn confirm_persist(&self) -> Result<bool> {
        Confirm::new()
            .with_prompt("Create a credential file (pgpass) so you are not prompted next time?")
            .default(false)
            .interact()
            .map_err(|e| WrdsError::credentials(format!("Failed to read answer: {e}")))
    }
}

/// Fixed credentials
///
/// Clones share prompt counters, so a caller can keep one clone and hand another to a
/// connection.
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: Zeroizing<String>,
    persist: bool,
    username_prompts: Arc<AtomicUsize>,
    password_prompts: Arc<AtomicUsize>,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            persist: false,
            username_prompts: Arc::new(AtomicUsize::new(0)),
            password_prompts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer to [`CredentialSource::confirm_persist`] (default `false`)
    #[must_use]
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Times a username was requested
    #[must_use]
    pub fn username_prompts(&self) -> usize {
        self.username_prompts.load(Ordering::SeqCst)
    }

    /// Times a password was requested
    #[must_use]
    pub fn password_prompts(&self) -> usize {
        self.password_prompts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

impl CredentialSource for StaticCredentials {
    fn username(&self, _default: &str) -> Result<String> {
        self.username_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.username.clone())
    }

    fn password(&self) -> Result<Zeroizing<String>> {
        self.password_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.password.clone())
    }

    fn confirm_persist(&self) -> Result<bool> {
        Ok(self.persist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_count_prompts_across_clones() {
        let source = StaticCredentials::new("jdoe", "secret").persist(true);
        let observer = source.clone();

        assert_eq!(source.username("osuser").unwrap(), "jdoe");
        assert_eq!(source.password().unwrap().as_str(), "secret");
        assert!(source.confirm_persist().unwrap());

        assert_eq!(observer.username_prompts(), 1);
        assert_eq!(observer.password_prompts(), 1);
    }

    #[test]
    fn test_static_credentials_debug_hides_password() {
        let debug = format!("{:?}", StaticCredentials::new("jdoe", "secret"));
        assert!(debug.contains("jdoe"));
        assert!(!debug.contains("secret"));
    }
}
