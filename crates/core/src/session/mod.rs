//! Network session bookkeeping and lifecycle.
//!
//! The sender owns up to four network sessions, one per [`SessionRole`].
//! Each moves through:
//!
//! ```text
//! Unbound -> Bound                          (UDP: usable right away)
//! Unbound -> Bound -> Connecting -> Connected  (TCP)
//! any     -> Dead                           (transport error, terminal)
//! ```
//!
//! A dead slot keeps no handle; late events for its old id no longer match
//! any role and are dropped.

pub mod transport;

use std::fmt;

use crate::transport::SessionId;
pub use transport::{SessionDescriptor, TransportMode};

/// What a network session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Rtp,
    Rtcp,
    RtpRetransmission,
    RtcpRetransmission,
}

impl SessionRole {
    pub const ALL: [SessionRole; 4] = [
        SessionRole::Rtp,
        SessionRole::Rtcp,
        SessionRole::RtpRetransmission,
        SessionRole::RtcpRetransmission,
    ];

    fn index(self) -> usize {
        match self {
            Self::Rtp => 0,
            Self::Rtcp => 1,
            Self::RtpRetransmission => 2,
            Self::RtcpRetransmission => 3,
        }
    }

    /// RTP sessions never expect inbound traffic, so receive-side errors on
    /// them are not fatal.
    pub fn carries_rtp(self) -> bool {
        matches!(self, Self::Rtp | Self::RtpRetransmission)
    }

    /// Sessions whose inbound datagrams are RTCP.
    pub fn carries_rtcp(self) -> bool {
        matches!(self, Self::Rtcp | Self::RtcpRetransmission)
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtp => write!(f, "RTP"),
            Self::Rtcp => write!(f, "RTCP"),
            Self::RtpRetransmission => write!(f, "RTP retransmission"),
            Self::RtcpRetransmission => write!(f, "RTCP retransmission"),
        }
    }
}

/// Lifecycle state of one network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    /// Socket bound; usable for datagram transports.
    Bound,
    /// TCP connect in flight.
    Connecting,
    /// TCP connection established.
    Connected,
    /// Failed and destroyed. Terminal.
    Dead,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: Option<SessionId>,
    state: SessionState,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            id: None,
            state: SessionState::Unbound,
        }
    }
}

/// Handles and states of the sender's network sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    slots: [Slot; 4],
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly created session.
    pub fn bind(&mut self, role: SessionRole, id: SessionId) {
        let slot = &mut self.slots[role.index()];
        slot.id = Some(id);
        slot.state = SessionState::Bound;
        tracing::debug!(%role, session = %id, "session bound");
    }

    /// Mark a bound TCP session as connecting.
    pub fn connecting(&mut self, role: SessionRole) {
        let slot = &mut self.slots[role.index()];
        if slot.state == SessionState::Bound {
            slot.state = SessionState::Connecting;
        }
    }

    /// Mark the session with `id` connected. Returns its role, or `None`
    /// when no live session has that id.
    pub fn connected(&mut self, id: SessionId) -> Option<SessionRole> {
        let role = self.role_of(id)?;
        let slot = &mut self.slots[role.index()];
        tracing::debug!(%role, session = %id, old_state = ?slot.state, "session connected");
        slot.state = SessionState::Connected;
        Some(role)
    }

    /// Clear the session with `id` and mark its slot dead.
    pub fn kill(&mut self, id: SessionId) -> Option<SessionRole> {
        let role = self.role_of(id)?;
        let slot = &mut self.slots[role.index()];
        slot.id = None;
        slot.state = SessionState::Dead;
        tracing::debug!(%role, session = %id, "session dead");
        Some(role)
    }

    pub fn role_of(&self, id: SessionId) -> Option<SessionRole> {
        SessionRole::ALL
            .into_iter()
            .find(|role| self.slots[role.index()].id == Some(id))
    }

    pub fn id(&self, role: SessionRole) -> Option<SessionId> {
        self.slots[role.index()].id
    }

    pub fn state(&self, role: SessionRole) -> SessionState {
        self.slots[role.index()].state
    }

    pub fn is_connected(&self, role: SessionRole) -> bool {
        self.state(role) == SessionState::Connected
    }

    /// Remove every live handle, leaving all slots unbound. Used at
    /// teardown.
    pub fn drain(&mut self) -> Vec<SessionId> {
        let ids = self.slots.iter().filter_map(|s| s.id).collect();
        self.slots = Default::default();
        ids
    }
}
