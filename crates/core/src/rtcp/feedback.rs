//! Generic NACK transport feedback (RFC 4585 §6.2.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P| FMT=1   |    PT=205     |             length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of packet sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of media source                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            PID                |             BLP               |  (repeated)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::error::{Result, RtcpErrorKind};

/// FMT value of a generic NACK.
pub const GENERIC_NACK_FMT: u8 = 1;

/// Offset of the first FCI entry.
const FCI_OFFSET: usize = 12;

/// One PID/BLP pair: the lost packet `pid`, plus `pid + i + 1` for every
/// set bit `i` of `blp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    pub pid: u16,
    pub blp: u16,
}

impl NackEntry {
    /// All sequence numbers this entry reports lost, base first.
    pub fn lost_sequences(&self) -> impl Iterator<Item = u16> + '_ {
        std::iter::once(self.pid).chain(
            (0..16u16)
                .filter(|i| self.blp & (1 << i) != 0)
                .map(|i| self.pid.wrapping_add(i + 1)),
        )
    }
}

/// Parsed generic NACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<NackEntry>,
}

impl Nack {
    /// Parse a transport feedback sub-packet, header included.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let fmt = data.first().map(|b| b & 0x1f).unwrap_or(0);
        if fmt != GENERIC_NACK_FMT {
            return Err(RtcpErrorKind::UnsupportedFeedback(fmt).into());
        }
        if data.len() < FCI_OFFSET {
            return Err(RtcpErrorKind::TruncatedFeedback { len: data.len() }.into());
        }

        let sender_ssrc = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let media_ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let entries = data[FCI_OFFSET..]
            .chunks_exact(4)
            .map(|fci| NackEntry {
                pid: u16::from_be_bytes([fci[0], fci[1]]),
                blp: u16::from_be_bytes([fci[2], fci[3]]),
            })
            .collect();

        Ok(Self {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }

    /// Reject feedback about a stream other than ours.
    pub fn check_media_ssrc(&self, expected: u32) -> Result<()> {
        if self.media_ssrc != expected {
            return Err(RtcpErrorKind::SsrcMismatch {
                expected,
                actual: self.media_ssrc,
            }
            .into());
        }
        Ok(())
    }

    /// Serialize as a standalone RTPFB packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        let words = (FCI_OFFSET + 4 * self.entries.len()) / 4 - 1;
        let mut out = Vec::with_capacity(FCI_OFFSET + 4 * self.entries.len());
        out.push(0x80 | GENERIC_NACK_FMT);
        out.push(205);
        out.extend_from_slice(&(words as u16).to_be_bytes());
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&self.media_ssrc.to_be_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.pid.to_be_bytes());
            out.extend_from_slice(&entry.blp.to_be_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SenderError;

    #[test]
    fn parse_entries() {
        let nack = Nack {
            sender_ssrc: 1,
            media_ssrc: 0xdeadbeef,
            entries: vec![
                NackEntry { pid: 10, blp: 0b101 },
                NackEntry { pid: 500, blp: 0 },
            ],
        };
        let bytes = nack.to_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 4);
        assert_eq!(Nack::parse(&bytes).unwrap(), nack);
    }

    #[test]
    fn lost_sequences_from_bitmask() {
        let entry = NackEntry { pid: 10, blp: 0b101 };
        assert_eq!(entry.lost_sequences().collect::<Vec<_>>(), vec![10, 11, 13]);
    }

    #[test]
    fn lost_sequences_wrap() {
        let entry = NackEntry {
            pid: u16::MAX,
            blp: 0x8001,
        };
        assert_eq!(
            entry.lost_sequences().collect::<Vec<_>>(),
            vec![u16::MAX, 0, 15]
        );
    }

    #[test]
    fn other_fmt_unsupported() {
        let mut bytes = Nack {
            sender_ssrc: 1,
            media_ssrc: 2,
            entries: vec![],
        }
        .to_bytes();
        bytes[0] = 0x80 | 15;
        let err = Nack::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            SenderError::Rtcp {
                kind: RtcpErrorKind::UnsupportedFeedback(15)
            }
        ));
    }

    #[test]
    fn foreign_ssrc_is_malformed() {
        let nack = Nack {
            sender_ssrc: 1,
            media_ssrc: 2,
            entries: vec![],
        };
        let err = nack.check_media_ssrc(3).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn truncated_feedback() {
        let err = Nack::parse(&[0x81, 205, 0, 1, 0, 0, 0, 1]).unwrap_err();
        assert!(err.is_malformed());
    }
}
