//! Connection Handler
//!
//! Per-connection state machine: prompt for credentials, register the
//! session, serve commands until the client leaves, then tear down.

use std::fmt;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;

use crate::listener::ServerState;
use crate::outbox::{ConnectionId, DeliveryError, Outbox, Peer};
use crate::protocol::{Command, Notice, PASSWORD_PROMPT, USERNAME_PROMPT};
use crate::session::LoginOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Errors that end a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("Idle timeout")]
    IdleTimeout,
    #[error("Outbound writer closed")]
    WriterClosed,
}

enum Flow {
    Continue,
    Exit,
}

/// Teardown for an authenticated session. Runs on every exit path,
/// including panics and task cancellation.
struct SessionGuard {
    connection: ConnectionId,
    username: String,
    server: Arc<ServerState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.server.sessions.unregister(self.connection);
        let groups = self.server.groups.remove_member_everywhere(self.connection);
        let notified = self.server.sessions.broadcast(
            Notice::UserLeft {
                username: self.username.clone(),
            },
            None,
        );
        log::info!(
            "{} logged out (removed from {} groups, {} peers notified)",
            self.username,
            groups,
            notified
        );
    }
}

struct Connection<R> {
    reader: R,
    peer: Peer,
    addr: String,
    server: Arc<ServerState>,
    state: ConnectionState,
}

impl<R> Connection<R>
where
    R: AsyncBufRead + Unpin,
{
    fn set_state(&mut self, next: ConnectionState) {
        log::debug!("{}: {:?} -> {:?}", self.addr, self.state, next);
        self.state = next;
    }

    /// Queue a line for this connection's own client
    fn reply(&self, notice: impl fmt::Display) -> Result<(), ConnectionError> {
        match self.peer.outbox.send_line(notice) {
            Ok(()) => Ok(()),
            Err(DeliveryError::QueueFull) => {
                log::warn!("{}: outbound queue full, dropping reply", self.addr);
                Ok(())
            }
            Err(DeliveryError::Disconnected) => Err(ConnectionError::WriterClosed),
        }
    }

    /// Next line from the client. An over-long line or an idle timeout is
    /// reported to the client before the error is returned.
    async fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let limit = self.server.settings.max_line_length;
        let read = match self.server.settings.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, read_line(&mut self.reader, limit))
                .await
                .unwrap_or(Err(ConnectionError::IdleTimeout)),
            None => read_line(&mut self.reader, limit).await,
        };
        match read {
            Err(ConnectionError::LineTooLong(limit)) => {
                self.reply(Notice::LineTooLong { limit })?;
                Err(ConnectionError::LineTooLong(limit))
            }
            Err(ConnectionError::IdleTimeout) => {
                self.reply(Notice::IdleTimeout)?;
                Err(ConnectionError::IdleTimeout)
            }
            other => other,
        }
    }

    async fn prompt(&mut self, prompt: &str) -> Result<Option<String>, ConnectionError> {
        self.peer
            .outbox
            .send_raw(prompt)
            .map_err(|_| ConnectionError::WriterClosed)?;
        self.next_line().await
    }

    /// Returns the session guard on success, `None` if the client was
    /// turned away or hung up during login.
    async fn authenticate(&mut self) -> Result<Option<SessionGuard>, ConnectionError> {
        self.set_state(ConnectionState::Authenticating);

        let Some(username) = self.prompt(USERNAME_PROMPT).await? else {
            return Ok(None);
        };
        let Some(password) = self.prompt(PASSWORD_PROMPT).await? else {
            return Ok(None);
        };

        let outcome = self
            .server
            .sessions
            .authenticate_and_register(&self.peer, &username, &password);
        match outcome {
            LoginOutcome::Ok => {}
            LoginOutcome::BadCredentials => {
                log::info!("{}: authentication failed for {:?}", self.addr, username);
                self.reply(Notice::AuthenticationFailed)?;
                return Ok(None);
            }
            LoginOutcome::AlreadyLoggedIn => {
                log::info!("{}: duplicate login for {}", self.addr, username);
                self.reply(Notice::AlreadyLoggedIn)?;
                return Ok(None);
            }
        }

        let guard = SessionGuard {
            connection: self.peer.id,
            username: username.clone(),
            server: self.server.clone(),
        };
        log::info!("{}: {} logged in", self.addr, username);

        self.reply(Notice::Welcome {
            username: username.clone(),
        })?;
        self.server
            .sessions
            .broadcast(Notice::UserJoined { username }, Some(self.peer.id));
        Ok(Some(guard))
    }

    async fn serve(&mut self, username: &str) -> Result<(), ConnectionError> {
        self.set_state(ConnectionState::Active);
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(());
            };

            let flow = match Command::parse(&line) {
                Ok(command) => self.dispatch(username, command)?,
                Err(e) => {
                    log::debug!("{}: rejected {:?}: {}", self.addr, line, e);
                    self.reply(Notice::Rejected(e))?;
                    Flow::Continue
                }
            };
            if let Flow::Exit = flow {
                return Ok(());
            }
        }
    }

    fn dispatch(&self, username: &str, command: Command) -> Result<Flow, ConnectionError> {
        let server = &self.server;
        let id = self.peer.id;

        match command {
            Command::Broadcast { text } => {
                let delivered = server.sessions.broadcast(
                    Notice::Broadcast {
                        from: username.to_string(),
                        text,
                    },
                    Some(id),
                );
                log::debug!("{} broadcast to {} peers", username, delivered);
            }

            Command::Private { target, text } => {
                if target == username {
                    self.reply(Notice::SelfMessage)?;
                } else if let Some(recipient) = server.sessions.find_by_username(&target) {
                    recipient.deliver(Notice::Private {
                        from: username.to_string(),
                        text,
                    });
                } else if server.sessions.credentials().contains(&target) {
                    self.reply(Notice::UserOffline { username: target })?;
                } else {
                    self.reply(Notice::UserUnknown { username: target })?;
                }
            }

            Command::CreateGroup { name } => match server.groups.create(&name, &self.peer) {
                Ok(()) => self.reply(Notice::GroupCreated { group: name })?,
                Err(error) => self.reply(Notice::GroupFailed { group: name, error })?,
            },

            Command::JoinGroup { name } => match server.groups.join(&name, &self.peer) {
                Ok(()) => {
                    self.reply(Notice::GroupJoined { group: name.clone() })?;
                    server.groups.announce(
                        &name,
                        Some(id),
                        Notice::MemberJoinedGroup {
                            group: name.clone(),
                            username: username.to_string(),
                        },
                    );
                }
                Err(error) => self.reply(Notice::GroupFailed { group: name, error })?,
            },

            Command::GroupMessage { name, text } => {
                let notice = Notice::GroupMessage {
                    group: name.clone(),
                    from: username.to_string(),
                    text,
                };
                if let Err(error) = server.groups.post(&name, id, notice) {
                    self.reply(Notice::GroupFailed { group: name, error })?;
                }
            }

            Command::LeaveGroup { name } => match server.groups.leave(&name, id) {
                Ok(()) => {
                    self.reply(Notice::GroupLeft { group: name.clone() })?;
                    server.groups.announce(
                        &name,
                        None,
                        Notice::MemberLeftGroup {
                            group: name.clone(),
                            username: username.to_string(),
                        },
                    );
                }
                Err(error) => self.reply(Notice::GroupFailed { group: name, error })?,
            },

            Command::Exit => {
                self.reply(Notice::Goodbye)?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }
}

/// Read one line of at most `limit` bytes, not counting its `\n` or `\r\n`
/// terminator. `None` on end of stream.
async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64 + 2)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > limit {
        return Err(ConnectionError::LineTooLong(limit));
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Drain the outbound queue into the socket until every sender is gone
async fn write_outbound<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(text) = rx.recv().await {
        if let Err(e) = writer.write_all(text.as_bytes()).await {
            log::debug!("Write failed: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Run one client connection to completion
pub async fn handle_connection<S>(
    stream: S,
    addr: String,
    server: Arc<ServerState>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbox, rx) = Outbox::channel(server.settings.outbox_capacity);
    let mut writer = tokio::spawn(write_outbound(write_half, rx));

    let mut connection = Connection {
        reader: BufReader::new(read_half),
        peer: Peer::new(outbox),
        addr,
        server,
        state: ConnectionState::Connecting,
    };

    let result = match connection.authenticate().await {
        Ok(Some(guard)) => {
            let username = guard.username.clone();
            let result = connection.serve(&username).await;
            connection.set_state(ConnectionState::Closing);
            drop(guard);
            result
        }
        Ok(None) => {
            connection.set_state(ConnectionState::Closing);
            Ok(())
        }
        Err(e) => {
            connection.set_state(ConnectionState::Closing);
            Err(e)
        }
    };

    connection.set_state(ConnectionState::Closed);
    let addr = std::mem::take(&mut connection.addr);
    let flush_timeout = connection.server.settings.flush_timeout;
    // The writer exits once the last outbox clone is gone
    drop(connection);
    if tokio::time::timeout(flush_timeout, &mut writer).await.is_err() {
        // A peer that stopped reading keeps write_all pending forever
        log::warn!("{}: timed out flushing outbound queue", addr);
        writer.abort();
        let _ = writer.await;
    }
    log::info!("{} disconnected", addr);

    result
}
