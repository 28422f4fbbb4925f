pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod media;
pub mod retransmission;
pub mod rtcp;
pub mod sender;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{RetransmissionConfig, SenderConfig};
pub use error::{Result, RtcpErrorKind, SenderError};
pub use event::{SenderNotification, TsBatch};
pub use handle::SenderHandle;
pub use sender::{RtcpCounters, Sender, SenderStats};
pub use session::{SessionRole, SessionState, TransportMode};
