//! Credential Store
//!
//! Static username/password table loaded once at startup from a
//! line-oriented `username:password` file. Never mutated afterwards, so
//! lookups need no locking.

use std::collections::HashMap;
use std::path::Path;

/// Credential loading errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read credentials from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable username -> password table
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    /// Parse `username:password` records. The first `:` separates the two
    /// fields; lines without one are skipped.
    pub fn parse(text: &str) -> Self {
        let mut users = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            match line.split_once(':') {
                Some((username, password)) if !username.is_empty() => {
                    users.insert(username.to_string(), password.to_string());
                }
                _ => {
                    if !line.trim().is_empty() {
                        log::debug!("Skipping malformed credential line {}", lineno + 1);
                    }
                }
            }
        }
        Self { users }
    }

    /// Load the store from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::parse(&text);
        log::info!("Loaded {} credentials from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn lookup(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(String::as_str)
    }

    /// Whether the username is known at all, online or not
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.lookup(username) == Some(password)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl<U: Into<String>, P: Into<String>> FromIterator<(U, P)> for CredentialStore {
    fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
        Self {
            users: iter
                .into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        }
    }
}
