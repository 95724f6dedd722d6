//! Listener
//!
//! Accepts TCP connections and spawns one handler task per connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::connection::handle_connection;
use crate::credentials::CredentialStore;
use crate::group::GroupRegistry;
use crate::session::SessionRegistry;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_line_length: usize,
    pub outbox_capacity: usize,
    pub idle_timeout: Option<Duration>,
    /// How long teardown waits for queued output before dropping the socket
    pub flush_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_line_length: 1024,
            outbox_capacity: 256,
            idle_timeout: None,
            flush_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared by every connection handler
pub struct ServerState {
    pub sessions: SessionRegistry,
    pub groups: GroupRegistry,
    pub settings: ConnectionSettings,
}

impl ServerState {
    pub fn new(credentials: Arc<CredentialStore>, settings: ConnectionSettings) -> Self {
        Self {
            sessions: SessionRegistry::new(credentials),
            groups: GroupRegistry::new(),
            settings,
        }
    }
}

pub struct ChatServer {
    state: Arc<ServerState>,
}

impl ChatServer {
    pub fn new(credentials: CredentialStore, settings: ConnectionSettings) -> Self {
        Self {
            state: Arc::new(ServerState::new(Arc::new(credentials), settings)),
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accept connections forever. Handlers are detached; a failed accept
    /// is logged and the loop keeps going.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        log::info!("Chat server listening on {}", local);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("set_nodelay failed for {}: {}", peer_addr, e);
            }

            let state = self.state.clone();
            tokio::spawn(async move {
                log::info!("New connection from {}", peer_addr);
                if let Err(e) = handle_connection(stream, peer_addr.to_string(), state).await {
                    log::warn!("Connection {} ended with error: {}", peer_addr, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn login(addr: SocketAddr, username: &str, password: &str) -> BufReader<TcpStream> {
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let mut prompt = vec![0u8; "Enter username: ".len()];
        stream.read_exact(&mut prompt).await.unwrap();
        assert_eq!(prompt, b"Enter username: ");
        stream
            .get_mut()
            .write_all(format!("{}\n", username).as_bytes())
            .await
            .unwrap();

        let mut prompt = vec![0u8; "Enter password: ".len()];
        stream.read_exact(&mut prompt).await.unwrap();
        assert_eq!(prompt, b"Enter password: ");
        stream
            .get_mut()
            .write_all(format!("{}\n", password).as_bytes())
            .await
            .unwrap();
        stream
    }

    async fn next_line(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let credentials: CredentialStore =
            [("alice", "pw1"), ("bob", "pw2")].into_iter().collect();
        let server = ChatServer::new(credentials, ConnectionSettings::default());
        let state = server.state();

        let listener = ChatServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        let mut alice = login(addr, "alice", "pw1").await;
        assert!(next_line(&mut alice).await.starts_with("Welcome"));

        let mut bob = login(addr, "bob", "pw2").await;
        assert!(next_line(&mut bob).await.starts_with("Welcome"));
        assert_eq!(next_line(&mut alice).await, "bob has joined the chat.\n");

        bob.get_mut().write_all(b"/broadcast hi all\n").await.unwrap();
        assert_eq!(next_line(&mut alice).await, "[bob]: hi all\n");

        bob.get_mut().write_all(b"/exit\n").await.unwrap();
        assert_eq!(next_line(&mut bob).await, "Goodbye.\n");
        assert_eq!(next_line(&mut alice).await, "bob has left the chat.\n");
        assert_eq!(state.sessions.len(), 1);
    }
}
