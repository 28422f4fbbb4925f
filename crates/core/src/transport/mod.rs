//! Network session layer underneath the sender.
//!
//! The sender never touches sockets directly. It talks to a
//! [`NetworkSession`] implementation which creates sessions, queues
//! outbound datagrams, and reports everything that happens on a session
//! asynchronously as a [`NetEvent`]:
//!
//! - **UDP** ([`udp`]): one connected datagram socket per session.
//! - **TCP datagram** ([`tcp`]): an outbound TCP connection carrying
//!   datagrams with a 16-bit big-endian length prefix. A
//!   [`NetEvent::Connected`] is reported once the connection is up.
//!
//! [`NetSessionManager`] is the tokio-backed implementation used by
//! [`SenderHandle`](crate::SenderHandle). Tests substitute a recording
//! double.

pub mod tcp;
pub mod udp;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SenderError};

/// Opaque identifier of a network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Asynchronous notification from the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A datagram arrived on the session.
    Datagram { session: SessionId, data: Vec<u8> },
    /// A TCP datagram session finished connecting.
    Connected { session: SessionId },
    /// The session failed. `during_send` distinguishes send failures from
    /// receive/connect failures.
    Error {
        session: SessionId,
        during_send: bool,
        detail: String,
    },
}

/// Socket/session operations the sender depends on.
///
/// Creation binds synchronously, so a bind failure is reported right away
/// and the caller can try another port. Everything after that is
/// asynchronous and surfaces as [`NetEvent`]s.
pub trait NetworkSession: Send {
    /// Bind `local_port` and direct datagrams at `remote`.
    fn create_udp_session(&mut self, local_port: u16, remote: SocketAddr) -> Result<SessionId>;

    /// Bind `local_port` and start connecting to `remote`.
    fn create_tcp_datagram_session(
        &mut self,
        local_port: u16,
        remote: SocketAddr,
    ) -> Result<SessionId>;

    /// Queue one datagram for sending.
    fn send_request(&mut self, session: SessionId, data: &[u8]) -> Result<()>;

    /// Close the session. Unknown ids are ignored.
    fn destroy_session(&mut self, session: SessionId);
}

/// Per-session state kept by [`NetSessionManager`].
struct SessionEntry {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// Tokio-backed [`NetworkSession`].
///
/// Each session runs in its own task, which owns the socket, drains the
/// outbound queue, and forwards receptions and failures to `events`.
/// Must be used from within a tokio runtime.
pub struct NetSessionManager {
    next_id: u32,
    sessions: HashMap<SessionId, SessionEntry>,
    events: mpsc::UnboundedSender<NetEvent>,
}

impl NetSessionManager {
    pub fn new(events: mpsc::UnboundedSender<NetEvent>) -> Self {
        Self {
            next_id: 1,
            sessions: HashMap::new(),
            events,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn allocate_id(&mut self) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn register(
        &mut self,
        id: SessionId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        task: JoinHandle<()>,
    ) -> SessionId {
        self.sessions.insert(id, SessionEntry { outbound, task });
        tracing::debug!(session = %id, total_sessions = self.sessions.len(), "network session created");
        id
    }
}

impl NetworkSession for NetSessionManager {
    fn create_udp_session(&mut self, local_port: u16, remote: SocketAddr) -> Result<SessionId> {
        let socket = udp::bind(local_port, remote)?;
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(udp::run(id, socket, rx, self.events.clone()));
        Ok(self.register(id, tx, task))
    }

    fn create_tcp_datagram_session(
        &mut self,
        local_port: u16,
        remote: SocketAddr,
    ) -> Result<SessionId> {
        let socket = tcp::bind(local_port, remote)?;
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(tcp::run(id, socket, remote, rx, self.events.clone()));
        Ok(self.register(id, tx, task))
    }

    fn send_request(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(SenderError::SessionNotFound(session))?;
        entry
            .outbound
            .send(data.to_vec())
            .map_err(|_| SenderError::SessionNotFound(session))
    }

    fn destroy_session(&mut self, session: SessionId) {
        if let Some(entry) = self.sessions.remove(&session) {
            entry.task.abort();
            tracing::debug!(session = %session, total_sessions = self.sessions.len(), "network session destroyed");
        }
    }
}

impl Drop for NetSessionManager {
    fn drop(&mut self) {
        for (_, entry) in self.sessions.drain() {
            entry.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn udp_session_sends_to_remote() {
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = peer.local_addr().unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut manager = NetSessionManager::new(events_tx);

        let id = manager.create_udp_session(0, remote).unwrap();
        assert_eq!(manager.len(), 1);
        manager.send_request(id, b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");

        manager.destroy_session(id);
        assert!(manager.is_empty());
        assert!(matches!(
            manager.send_request(id, b"late"),
            Err(SenderError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn udp_session_reports_datagrams() {
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut manager = NetSessionManager::new(events_tx);

        let id = manager
            .create_udp_session(0, peer.local_addr().unwrap())
            .unwrap();
        // Learn the ephemeral port from the first outbound datagram.
        manager.send_request(id, b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (_, from) = peer.recv_from(&mut buf).await.unwrap();
        peer.send_to(b"pong", from).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            NetEvent::Datagram {
                session: id,
                data: b"pong".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn bind_conflict_fails_synchronously() {
        let taken = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut manager = NetSessionManager::new(events_tx);

        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(manager.create_udp_session(port, remote).is_err());
        assert!(manager.is_empty());
    }
}
