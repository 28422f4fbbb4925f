//! Deterministic doubles for the sender's collaborators.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{Result, SenderError};
use crate::event::{Scheduler, SenderEvent};
use crate::transport::{NetworkSession, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Udp,
    TcpDatagram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: SessionId,
    pub kind: SessionKind,
    pub local_port: u16,
    pub remote: SocketAddr,
}

#[derive(Debug, Default)]
pub struct NetLog {
    pub created: Vec<CreatedSession>,
    pub destroyed: Vec<SessionId>,
    pub sent: Vec<(SessionId, Vec<u8>)>,
    /// Local ports whose bind fails.
    pub busy_ports: HashSet<u16>,
    next_id: u32,
}

impl NetLog {
    pub fn live(&self) -> Vec<&CreatedSession> {
        self.created
            .iter()
            .filter(|s| !self.destroyed.contains(&s.id))
            .collect()
    }

    pub fn sent_on(&self, id: SessionId) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(s, _)| *s == id)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

/// [`NetworkSession`] that records everything and never touches a socket.
#[derive(Debug, Clone, Default)]
pub struct RecordingNetwork {
    pub log: Arc<Mutex<NetLog>>,
}

impl RecordingNetwork {
    fn create(&mut self, kind: SessionKind, local_port: u16, remote: SocketAddr) -> Result<SessionId> {
        let mut log = self.log.lock();
        if log.busy_ports.contains(&local_port) {
            return Err(SenderError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "port busy",
            )));
        }
        log.next_id += 1;
        let id = SessionId(log.next_id);
        log.created.push(CreatedSession {
            id,
            kind,
            local_port,
            remote,
        });
        Ok(id)
    }
}

impl NetworkSession for RecordingNetwork {
    fn create_udp_session(&mut self, local_port: u16, remote: SocketAddr) -> Result<SessionId> {
        self.create(SessionKind::Udp, local_port, remote)
    }

    fn create_tcp_datagram_session(
        &mut self,
        local_port: u16,
        remote: SocketAddr,
    ) -> Result<SessionId> {
        self.create(SessionKind::TcpDatagram, local_port, remote)
    }

    fn send_request(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        if log.destroyed.contains(&session) || !log.created.iter().any(|s| s.id == session) {
            return Err(SenderError::SessionNotFound(session));
        }
        log.sent.push((session, data.to_vec()));
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionId) {
        self.log.lock().destroyed.push(session);
    }
}

/// [`Scheduler`] that collects posted events for the test to deliver.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    pub posted: Arc<Mutex<Vec<(SenderEvent, Duration)>>>,
}

impl RecordingScheduler {
    /// Remove and return everything posted so far.
    pub fn take(&self) -> Vec<(SenderEvent, Duration)> {
        std::mem::take(&mut *self.posted.lock())
    }
}

impl Scheduler for RecordingScheduler {
    fn post(&mut self, event: SenderEvent, delay: Duration) {
        self.posted.lock().push((event, delay));
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_us)),
        }
    }

    pub fn advance(&self, delta_us: i64) {
        self.now.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
