//! NACK-driven retransmission from a bounded send history.
//!
//! Every flushed RTP packet is moved into [`PacketHistory`], a ring of the
//! most recent packets in send order. When the history is over its bound
//! the oldest packet is evicted and its storage is handed back to the
//! packetizer as the next accumulation buffer, so steady-state operation
//! allocates nothing.
//!
//! A retransmitted packet uses the RTX payload format (RFC 4588 §4):
//!
//! ```text
//! [ original RTP header, seq := rtx seq (12) | OSN (2) | original payload ]
//! ```

use std::collections::VecDeque;

use crate::config::RetransmissionConfig;
use crate::media::RTP_HEADER_LEN;
use crate::rtcp::NackEntry;

#[derive(Debug)]
struct HistoryEntry {
    sequence: u16,
    packet: Vec<u8>,
}

/// Bounded, send-ordered store of sent RTP packets.
#[derive(Debug)]
pub struct PacketHistory {
    entries: VecDeque<HistoryEntry>,
    max_len: usize,
}

impl PacketHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len + 1),
            max_len,
        }
    }

    /// Record a sent packet. Returns the storage of the evicted packet when
    /// the bound was exceeded.
    pub fn push(&mut self, sequence: u16, packet: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.push_back(HistoryEntry { sequence, packet });
        if self.entries.len() > self.max_len {
            return self.entries.pop_front().map(|evicted| {
                tracing::trace!(seq = evicted.sequence, "history entry evicted");
                evicted.packet
            });
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sequence: u16) -> bool {
        self.entries.iter().any(|e| e.sequence == sequence)
    }

    /// Sequence number of the oldest retained packet.
    pub fn oldest(&self) -> Option<u16> {
        self.entries.front().map(|e| e.sequence)
    }
}

/// Packets to resend for one NACK entry, and what could not be found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NackAnswer {
    /// Ready-to-send retransmission packets, in history order.
    pub packets: Vec<Vec<u8>>,
    /// Requested sequence numbers no longer in the history.
    pub missing: Vec<u16>,
}

/// History plus the retransmission sequence counter.
#[derive(Debug)]
pub struct Retransmitter {
    history: PacketHistory,
    next_sequence: u16,
}

impl Retransmitter {
    pub fn new(config: &RetransmissionConfig) -> Self {
        Self {
            history: PacketHistory::new(config.max_history),
            next_sequence: 0,
        }
    }

    pub fn history(&self) -> &PacketHistory {
        &self.history
    }

    /// Store a flushed packet; see [`PacketHistory::push`].
    pub fn record(&mut self, sequence: u16, packet: Vec<u8>) -> Option<Vec<u8>> {
        self.history.push(sequence, packet)
    }

    /// Find every packet `entry` asks for, oldest first.
    ///
    /// The scan stops once the base packet has been found and every
    /// bitmask bit has been matched.
    pub fn answer(&mut self, entry: &NackEntry) -> NackAnswer {
        let mut answer = NackAnswer::default();
        let mut blp = entry.blp;
        let mut found_base = false;

        for stored in &self.history.entries {
            let mut retransmit = false;
            if stored.sequence == entry.pid {
                retransmit = true;
            } else if blp != 0 {
                for i in 0..16u16 {
                    if blp & (1 << i) != 0 && stored.sequence == entry.pid.wrapping_add(i + 1) {
                        blp &= !(1 << i);
                        retransmit = true;
                    }
                }
            }

            if !retransmit {
                continue;
            }

            tracing::debug!(
                seq = stored.sequence,
                rtx_seq = self.next_sequence,
                "retransmitting"
            );
            answer
                .packets
                .push(build_retransmission(&stored.packet, self.next_sequence));
            self.next_sequence = self.next_sequence.wrapping_add(1);

            if stored.sequence == entry.pid {
                found_base = true;
            }
            if found_base && blp == 0 {
                break;
            }
        }

        if !found_base {
            answer.missing.push(entry.pid);
        }
        answer.missing.extend(
            (0..16u16)
                .filter(|i| blp & (1 << i) != 0)
                .map(|i| entry.pid.wrapping_add(i + 1)),
        );

        answer
    }
}

/// Wrap a sent RTP packet for retransmission under `rtx_sequence`.
pub fn build_retransmission(original: &[u8], rtx_sequence: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(original.len() + 2);
    out.extend_from_slice(&original[..RTP_HEADER_LEN]);
    out[2..4].copy_from_slice(&rtx_sequence.to_be_bytes());
    out.extend_from_slice(&original[2..4]);
    out.extend_from_slice(&original[RTP_HEADER_LEN..]);
    out
}
