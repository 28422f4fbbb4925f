//! MPEG-TS packetization into RTP (RFC 2250 §2) and send pacing.
//!
//! ## RTP overview (RFC 3550)
//!
//! Whole 188-byte TS packets are packed back to back behind a 12-byte RTP
//! fixed header ([`rtp::RtpHeader`]). No TS packet is ever split across
//! RTP packets, so the payload of every RTP packet is a multiple of 188.
//!
//! - **Payload type** 33 (MP2T, RFC 3551 §6).
//! - **Timestamp**: 90 kHz, sampled from the sender clock at flush time.
//! - **Marker bit**: carries the batch's time-discontinuity flag.
//!
//! ## Sizing
//!
//! | Quantity | Value |
//! |----------|-------|
//! | Max RTP packet | 1500 bytes |
//! | TS packets per RTP packet | (1500 - 12) / 188 = 7 |
//! | Accumulation buffer | 12 + 7 * 188 = 1328 bytes |

pub mod pacing;
pub mod packetizer;
pub mod rtp;

pub use pacing::{PacedDelivery, PacingClock};
pub use packetizer::TsPacketizer;
pub use rtp::{RtpHeader, RtpStats};

/// Size of one MPEG transport stream packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Length of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Largest RTP packet the packetizer will emit.
pub const MAX_RTP_PACKET_SIZE: usize = 1500;

/// How many whole TS packets fit into one RTP packet.
pub const MAX_TS_PACKETS_PER_RTP_PACKET: usize =
    (MAX_RTP_PACKET_SIZE - RTP_HEADER_LEN) / TS_PACKET_SIZE;

/// Capacity of the TS accumulation buffer, header included.
pub const TS_QUEUE_CAPACITY: usize =
    RTP_HEADER_LEN + MAX_TS_PACKETS_PER_RTP_PACKET * TS_PACKET_SIZE;

/// Static payload type for MPEG-2 transport streams (RFC 3551 §6).
pub const MP2T_PAYLOAD_TYPE: u8 = 33;

/// RTP clock rate for MP2T.
pub const MP2T_CLOCK_RATE: u32 = 90_000;
