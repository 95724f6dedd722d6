//! Session Registry
//!
//! Maps authenticated connections to usernames and enforces at most one
//! active session per username.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::outbox::{ConnectionId, Peer};

/// An authenticated connection's identity binding
#[derive(Debug, Clone)]
pub struct Session {
    pub peer: Peer,
    pub username: String,
}

/// Result of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Ok,
    AlreadyLoggedIn,
    BadCredentials,
}

#[derive(Default)]
struct Sessions {
    by_connection: HashMap<ConnectionId, Session>,
    by_username: HashMap<String, ConnectionId>,
}

/// Registry of active sessions
pub struct SessionRegistry {
    credentials: Arc<CredentialStore>,
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Check credentials and, if they match and the username is not already
    /// in use, register the session. The duplicate check and the insert
    /// happen under a single lock acquisition.
    pub fn authenticate_and_register(
        &self,
        peer: &Peer,
        username: &str,
        password: &str,
    ) -> LoginOutcome {
        if !self.credentials.verify(username, password) {
            return LoginOutcome::BadCredentials;
        }

        let mut sessions = self.sessions.lock();
        if sessions.by_username.contains_key(username) {
            return LoginOutcome::AlreadyLoggedIn;
        }
        sessions.by_username.insert(username.to_string(), peer.id);
        sessions.by_connection.insert(
            peer.id,
            Session {
                peer: peer.clone(),
                username: username.to_string(),
            },
        );
        LoginOutcome::Ok
    }

    /// Remove a connection's session. Returns the username it held, or
    /// `None` if it was not registered.
    pub fn unregister(&self, connection: ConnectionId) -> Option<String> {
        let mut sessions = self.sessions.lock();
        let session = sessions.by_connection.remove(&connection)?;
        sessions.by_username.remove(&session.username);
        Some(session.username)
    }

    /// Deliver a line to every session except `exclude`. Returns how many
    /// peers accepted it.
    pub fn broadcast(&self, message: impl fmt::Display, exclude: Option<ConnectionId>) -> usize {
        let line = message.to_string();
        let sessions = self.sessions.lock();
        sessions
            .by_connection
            .values()
            .filter(|s| Some(s.peer.id) != exclude)
            .filter(|s| s.peer.deliver(&line))
            .count()
    }

    pub fn find_by_username(&self, username: &str) -> Option<Peer> {
        let sessions = self.sessions.lock();
        let id = sessions.by_username.get(username)?;
        sessions.by_connection.get(id).map(|s| s.peer.clone())
    }

    pub fn username_of(&self, connection: ConnectionId) -> Option<String> {
        self.sessions
            .lock()
            .by_connection
            .get(&connection)
            .map(|s| s.username.clone())
    }

    /// Point-in-time copy of the active sessions
    pub fn snapshot(&self) -> Vec<(ConnectionId, String)> {
        self.sessions
            .lock()
            .by_connection
            .iter()
            .map(|(id, s)| (*id, s.username.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
