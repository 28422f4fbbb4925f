//! Error types for the RTP/RTCP sender.

use std::fmt;

use crate::transport::SessionId;

/// Errors that can occur in the sender.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`NoPortAvailable`](Self::NoPortAvailable),
///   [`SessionNotFound`](Self::SessionNotFound).
/// - **Setup**: [`NotInitialized`](Self::NotInitialized),
///   [`AlreadyInitialized`](Self::AlreadyInitialized),
///   [`InvalidChannel`](Self::InvalidChannel), [`RtcpRequired`](Self::RtcpRequired),
///   [`InvalidConfig`](Self::InvalidConfig).
/// - **Data plane**: [`InvalidBatch`](Self::InvalidBatch).
/// - **RTCP**: [`Rtcp`](Self::Rtcp): malformed or unsupported control packets.
/// - **Actor**: [`ActorClosed`](Self::ActorClosed).
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The local port scan ran past the top of the u16 range without
    /// binding a complete RTP/RTCP (and retransmission) set.
    #[error("no local port pair available starting at {base}")]
    NoPortAvailable { base: u16 },

    /// The network layer has no session with this identifier.
    #[error("network session not found: {0}")]
    SessionNotFound(SessionId),

    /// An operation that needs [`Sender::init`](crate::Sender::init) was
    /// called before it.
    #[error("sender not initialized")]
    NotInitialized,

    /// [`Sender::init`](crate::Sender::init) was called a second time.
    #[error("sender already initialized")]
    AlreadyInitialized,

    /// Interleaved channel numbers must fit in one byte.
    #[error("interleaved channel out of range: {0}")]
    InvalidChannel(u16),

    /// UDP retransmission needs a client RTCP port.
    #[error("retransmission requires a client RTCP port")]
    RtcpRequired,

    /// Rejected by [`SenderConfig::validate`](crate::SenderConfig::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A queued batch was not a whole number of 188-byte TS packets.
    #[error("TS batch of {len} bytes is not a multiple of 188")]
    InvalidBatch { len: usize },

    /// Failed to parse or handle an RTCP packet (RFC 3550 §6, RFC 4585 §6).
    #[error("RTCP error: {kind}")]
    Rtcp { kind: RtcpErrorKind },

    /// The actor task has stopped and no longer accepts commands.
    #[error("sender task is not running")]
    ActorClosed,
}

impl SenderError {
    /// Whether this error describes structurally invalid RTCP input.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Rtcp { kind } if kind.is_malformed())
    }

    /// Whether this error describes valid but unhandled RTCP input.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Rtcp { kind } if !kind.is_malformed())
    }
}

impl From<RtcpErrorKind> for SenderError {
    fn from(kind: RtcpErrorKind) -> Self {
        Self::Rtcp { kind }
    }
}

/// Specific kind of RTCP failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpErrorKind {
    /// Fewer than 8 bytes left where a sub-packet header was expected.
    TooShort { remaining: usize },
    /// Version field other than 2.
    UnsupportedVersion(u8),
    /// Padding count would leave less than a minimal packet.
    PaddingOverflow { padding: usize, remaining: usize },
    /// Declared length runs past the end of the buffer.
    LengthOverflow { declared: usize, remaining: usize },
    /// Transport feedback with a format other than generic NACK.
    UnsupportedFeedback(u8),
    /// Feedback addressed to a different media source.
    SsrcMismatch { expected: u32, actual: u32 },
    /// Feedback packet too short to carry the media source SSRC.
    TruncatedFeedback { len: usize },
}

impl RtcpErrorKind {
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedVersion(_) | Self::UnsupportedFeedback(_)
        )
    }
}

impl fmt::Display for RtcpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { remaining } => {
                write!(f, "truncated header ({remaining} bytes remaining)")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::PaddingOverflow { padding, remaining } => {
                write!(f, "padding of {padding} bytes exceeds packet of {remaining}")
            }
            Self::LengthOverflow {
                declared,
                remaining,
            } => write!(
                f,
                "declared length {declared} exceeds remaining {remaining} bytes"
            ),
            Self::UnsupportedFeedback(fmt) => {
                write!(f, "unsupported transport feedback format {fmt}")
            }
            Self::SsrcMismatch { expected, actual } => write!(
                f,
                "feedback for SSRC {actual:#010X}, expected {expected:#010X}"
            ),
            Self::TruncatedFeedback { len } => {
                write!(f, "feedback packet of {len} bytes is too short")
            }
        }
    }
}

/// Convenience alias for `Result<T, SenderError>`.
pub type Result<T> = std::result::Result<T, SenderError>;
