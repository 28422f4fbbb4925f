//! Events consumed and notifications emitted by the sender.

use std::time::Duration;

use crate::transport::NetEvent;

/// A batch of whole TS packets sharing one presentation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsBatch {
    pub presentation_time_us: i64,
    pub data: Vec<u8>,
    /// Diagnostic tag set by the caller; does not affect sending.
    pub is_video: bool,
    /// Intended send time computed when the batch was queued.
    pub when_us: i64,
    /// Delay that was requested for the batch, possibly negative.
    pub delay_us: i64,
}

/// Everything the sender reacts to. The actor feeds these to
/// [`Sender::handle_event`](crate::Sender::handle_event) one at a time, in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// Network session activity.
    Net(NetEvent),
    /// A paced batch came due.
    SendBatch(TsBatch),
    /// The sender report timer fired.
    SendSenderReport,
}

/// Upward notifications to the owner of the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderNotification {
    /// Transport is ready for media.
    InitDone,
    /// A network session failed; the sender will not recover.
    SessionDead,
    /// Interleaved mode only: bytes to write on `channel` of the caller's
    /// connection.
    BinaryData { channel: u8, data: Vec<u8> },
}

/// Deferred delivery of events back into the sender.
pub trait Scheduler: Send {
    /// Deliver `event` after `delay`. Events due at the same time are
    /// delivered in posting order.
    fn post(&mut self, event: SenderEvent, delay: Duration);
}
