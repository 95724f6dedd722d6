//! Group Chat - Authenticated Multi-User Chat Server
//!
//! This library provides the core of a line-oriented TCP chat service with
//! broadcast, private and group messaging.

pub mod config;
pub mod connection;
pub mod credentials;
pub mod group;
pub mod listener;
pub mod outbox;
pub mod protocol;
pub mod session;

pub use config::{ClientConfig, ServerConfig};
pub use connection::{handle_connection, ConnectionError};
pub use credentials::CredentialStore;
pub use group::{GroupError, GroupRegistry};
pub use listener::{ChatServer, ConnectionSettings, ServerState};
pub use outbox::{ConnectionId, Outbox, Peer};
pub use protocol::{Command, Notice};
pub use session::{LoginOutcome, SessionRegistry};
