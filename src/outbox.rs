//! Outbound delivery
//!
//! Every connection owns a bounded queue drained by its writer task. The
//! registries hold clones of the sending half and deliver with `try_send`,
//! so a slow or dead peer never blocks a fan-out.

use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier assigned to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-peer delivery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Outbound queue is full")]
    QueueFull,
    #[error("Peer disconnected")]
    Disconnected,
}

/// Sending half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

impl Outbox {
    /// Create an outbox and the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue raw text exactly as given (prompts have no trailing newline)
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.tx.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }

    /// Queue one newline-terminated line
    pub fn send_line(&self, line: impl fmt::Display) -> Result<(), DeliveryError> {
        self.send_raw(format!("{}\n", line))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connection as seen by the registries: its id plus a way to reach it
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ConnectionId,
    pub outbox: Outbox,
}

impl Peer {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: ConnectionId::new(),
            outbox,
        }
    }

    /// Best-effort delivery of one line. Failures are logged and reported
    /// as `false`; they never propagate to the caller's other recipients.
    pub fn deliver(&self, line: impl fmt::Display) -> bool {
        match self.outbox.send_line(line) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping message for {}: {}", self.id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[tokio::test]
    async fn test_send_line_appends_newline() {
        let (outbox, mut rx) = Outbox::channel(4);
        outbox.send_line("hello").unwrap();
        outbox.send_raw("Enter username: ").unwrap();

        assert_eq!(rx.recv().await.unwrap(), "hello\n");
        assert_eq!(rx.recv().await.unwrap(), "Enter username: ");
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let (outbox, _rx) = Outbox::channel(1);
        outbox.send_line("first").unwrap();
        assert_eq!(outbox.send_line("second"), Err(DeliveryError::QueueFull));
    }

    #[test]
    fn test_closed_queue_reports_disconnect() {
        let (outbox, rx) = Outbox::channel(1);
        drop(rx);
        assert!(outbox.is_closed());
        assert_eq!(outbox.send_line("lost"), Err(DeliveryError::Disconnected));

        let peer = Peer::new(outbox);
        assert!(!peer.deliver("lost"));
    }
}
