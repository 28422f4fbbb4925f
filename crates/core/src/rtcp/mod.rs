//! RTCP (RFC 3550 §6) sender reports and feedback parsing.
//!
//! Outbound, the sender periodically emits one compound packet consisting of
//! a Sender Report followed by an SDES packet ([`report`]). Inbound, compound
//! packets from the receiver are split into sub-packets by [`RtcpWalker`] and
//! dispatched by type; only generic NACK feedback ([`feedback`]) has an
//! effect.
//!
//! ## Common header
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  count  |      PT       |             length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `length` counts 32-bit words minus one, so a sub-packet spans
//! `4 * length + 4` bytes.

pub mod feedback;
pub mod ntp;
pub mod report;

use std::fmt;

use crate::error::{Result, RtcpErrorKind};

pub use feedback::{Nack, NackEntry};
pub use report::build_compound_report;

/// RTCP version (same as RTP, always 2).
pub const RTCP_VERSION: u8 = 2;

/// Smallest sub-packet the walker accepts.
const MIN_HEADER_LEN: usize = 8;

/// RTCP packet types (RFC 3550 §12.1, RFC 4585 §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Goodbye,
    ApplicationDefined,
    /// Transport layer feedback (RTPFB), carries NACKs.
    TransportFeedback,
    /// Payload specific feedback (PSFB), e.g. PLI.
    PayloadFeedback,
    Unknown(u8),
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::SenderReport => 200,
            Self::ReceiverReport => 201,
            Self::SourceDescription => 202,
            Self::Goodbye => 203,
            Self::ApplicationDefined => 204,
            Self::TransportFeedback => 205,
            Self::PayloadFeedback => 206,
            Self::Unknown(pt) => pt,
        }
    }
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            200 => Self::SenderReport,
            201 => Self::ReceiverReport,
            202 => Self::SourceDescription,
            203 => Self::Goodbye,
            204 => Self::ApplicationDefined,
            205 => Self::TransportFeedback,
            206 => Self::PayloadFeedback,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SenderReport => write!(f, "SR"),
            Self::ReceiverReport => write!(f, "RR"),
            Self::SourceDescription => write!(f, "SDES"),
            Self::Goodbye => write!(f, "BYE"),
            Self::ApplicationDefined => write!(f, "APP"),
            Self::TransportFeedback => write!(f, "RTPFB"),
            Self::PayloadFeedback => write!(f, "PSFB"),
            Self::Unknown(pt) => write!(f, "unknown({pt})"),
        }
    }
}

/// One sub-packet of a compound RTCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubPacket<'a> {
    pub packet_type: PacketType,
    /// Low five bits of the first byte: report count, source count, or
    /// feedback message type depending on `packet_type`.
    pub count: u8,
    /// The whole sub-packet, header included.
    pub data: &'a [u8],
}

/// Iterator over the sub-packets of a compound RTCP buffer.
///
/// Yields an error at the first structural problem and stops there;
/// sub-packets before the bad one have already been yielded. A sub-packet
/// with an unsupported version is reported and skipped, and the walk goes
/// on.
#[derive(Debug)]
pub struct RtcpWalker<'a> {
    remaining: &'a [u8],
    done: bool,
}

impl<'a> RtcpWalker<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            remaining: buffer,
            done: false,
        }
    }

    fn next_sub_packet(&mut self) -> Result<SubPacket<'a>> {
        let data = self.remaining;
        let mut size = data.len();

        if size < MIN_HEADER_LEN {
            return Err(RtcpErrorKind::TooShort { remaining: size }.into());
        }

        let version = data[0] >> 6;
        if version != RTCP_VERSION {
            // Step over it when its length is usable so the rest is still read.
            let declared = 4 * u16::from_be_bytes([data[2], data[3]]) as usize + 4;
            self.remaining = data.get(declared..).unwrap_or_default();
            return Err(RtcpErrorKind::UnsupportedVersion(version).into());
        }

        if data[0] & 0x20 != 0 {
            // Padding count sits in the last byte of what is left.
            let padding = data[size - 1] as usize;
            if padding + 12 > size {
                return Err(RtcpErrorKind::PaddingOverflow {
                    padding,
                    remaining: size,
                }
                .into());
            }
            size -= padding;
        }

        let declared = 4 * u16::from_be_bytes([data[2], data[3]]) as usize + 4;
        if size < declared {
            return Err(RtcpErrorKind::LengthOverflow {
                declared,
                remaining: size,
            }
            .into());
        }

        let (packet, rest) = data.split_at(declared);
        // Padding trimmed above is dropped with the rest of the walk.
        self.remaining = &rest[..size - declared];

        Ok(SubPacket {
            packet_type: PacketType::from(packet[1]),
            count: packet[0] & 0x1f,
            data: packet,
        })
    }
}

impl<'a> Iterator for RtcpWalker<'a> {
    type Item = Result<SubPacket<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining.is_empty() {
            return None;
        }
        let item = self.next_sub_packet();
        if matches!(&item, Err(err) if err.is_malformed()) {
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SenderError;

    fn header(pt: u8, count: u8, words: u16) -> Vec<u8> {
        let mut p = vec![0x80 | count, pt];
        p.extend_from_slice(&words.to_be_bytes());
        p.resize(4 * words as usize + 4, 0);
        p
    }

    #[test]
    fn walks_sr_sdes_and_unknown() {
        let mut buf = header(200, 0, 6);
        buf.extend(header(202, 1, 2));
        buf.extend(header(210, 0, 1));

        let types: Vec<_> = RtcpWalker::new(&buf)
            .map(|p| p.unwrap().packet_type)
            .collect();
        assert_eq!(
            types,
            vec![
                PacketType::SenderReport,
                PacketType::SourceDescription,
                PacketType::Unknown(210)
            ]
        );
    }

    #[test]
    fn short_buffer_is_malformed() {
        let buf = [0x80, 200, 0, 1];
        let err = RtcpWalker::new(&buf).next().unwrap().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn wrong_version_unsupported() {
        let mut buf = header(200, 0, 6);
        buf[0] = 0x40;
        let err = RtcpWalker::new(&buf).next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            SenderError::Rtcp {
                kind: RtcpErrorKind::UnsupportedVersion(1)
            }
        ));
        assert!(err.is_unsupported());
    }

    #[test]
    fn walk_continues_after_unsupported_version() {
        let mut buf = header(201, 0, 1);
        buf[0] = 0x40;
        buf.extend(header(203, 1, 1));
        let items: Vec<_> = RtcpWalker::new(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].as_ref().unwrap_err().is_unsupported());
        assert_eq!(items[1].as_ref().unwrap().packet_type, PacketType::Goodbye);
    }

    #[test]
    fn unsupported_version_with_bad_length_ends_walk() {
        let mut buf = header(201, 0, 1);
        buf[0] = 0x40;
        buf[3] = 9;
        let items: Vec<_> = RtcpWalker::new(&buf).collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn length_past_end_is_malformed() {
        let mut buf = header(201, 0, 1);
        buf[3] = 5;
        let err = RtcpWalker::new(&buf).next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            SenderError::Rtcp {
                kind: RtcpErrorKind::LengthOverflow { declared: 24, remaining: 8 }
            }
        ));
    }

    #[test]
    fn excessive_padding_is_malformed() {
        let mut buf = header(201, 0, 3);
        buf[0] |= 0x20;
        let last = buf.len() - 1;
        buf[last] = 8;
        let err = RtcpWalker::new(&buf).next().unwrap().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn padding_trimmed() {
        let mut buf = header(204, 0, 2);
        buf[0] |= 0x20;
        buf.extend_from_slice(&[0, 0, 0, 4]);
        let packets: Vec<_> = RtcpWalker::new(&buf).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].as_ref().unwrap().data.len(), 12);
    }

    #[test]
    fn walk_stops_after_error() {
        let mut buf = header(200, 0, 6);
        buf.extend_from_slice(&[0x80, 201]);
        let items: Vec<_> = RtcpWalker::new(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn packet_type_roundtrip() {
        for pt in 195..=210u8 {
            assert_eq!(PacketType::from(pt).as_u8(), pt);
        }
    }
}
