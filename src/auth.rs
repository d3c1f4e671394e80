//! Credential verification
//!
//! The servers consume a boolean oracle: given a username and password,
//! is the pair valid? Directory backends (LDAP and friends) plug in
//! behind the same trait; the built-in backend is a flat map loaded
//! from the config file.

use std::collections::HashMap;

/// Boolean credential oracle shared by the IMAP and SMTP endpoints.
pub trait Authenticator: Send + Sync {
    /// Check a username/password pair.
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// Flat-map credential backend.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, String>,
}

impl StaticAuthenticator {
    #[must_use]
    pub const fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl Authenticator for StaticAuthenticator {
    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}
