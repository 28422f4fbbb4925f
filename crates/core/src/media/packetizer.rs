use super::rtp::{RtpHeader, RtpStats, rtp_time_from_us};
use super::{RTP_HEADER_LEN, TS_PACKET_SIZE, TS_QUEUE_CAPACITY};
use crate::rtcp::ntp::ntp_from_us;

/// MPEG-TS to RTP packetizer (RFC 2250 §2).
///
/// TS packets are appended to an accumulation buffer whose first 12 bytes
/// are reserved for the RTP header. The buffer is flushed, i.e. stamped
/// with a header and handed out, when it is full or when the caller asks
/// for a flush (end of a batch).
///
/// Buffer ownership moves out on every flush via [`take_packet`](Self::take_packet)
/// and a replacement is handed back with [`install`](Self::install). The
/// replacement may be a recycled packet from the retransmission history.
///
/// ```text
/// [ RTP header (12) | TS #1 (188) | TS #2 (188) | ... | TS #n (188) ]   n <= 7
/// ```
#[derive(Debug)]
pub struct TsPacketizer {
    header: RtpHeader,
    queue: Vec<u8>,
    stats: RtpStats,
    flushed: bool,
}

impl TsPacketizer {
    pub fn new(ssrc: u32) -> Self {
        let mut packetizer = Self {
            header: RtpHeader::mp2t(ssrc),
            queue: Vec::new(),
            stats: RtpStats::default(),
            flushed: false,
        };
        packetizer.install(None);
        packetizer
    }

    /// Append one TS packet and flush if requested or if the buffer is full.
    ///
    /// Returns the sequence number of the RTP packet when a flush happened;
    /// the stamped packet must then be collected with
    /// [`take_packet`](Self::take_packet).
    ///
    /// # Panics
    ///
    /// If `packet` is not exactly 188 bytes, or if a previous flush was not
    /// collected (the buffer would overflow). Both are caller bugs.
    pub fn append_ts_data(
        &mut self,
        packet: &[u8],
        time_discontinuity: bool,
        flush: bool,
        now_us: i64,
    ) -> Option<u16> {
        assert_eq!(packet.len(), TS_PACKET_SIZE, "TS packets are 188 bytes");
        assert!(
            self.queue.len() + packet.len() <= TS_QUEUE_CAPACITY,
            "TS queue overflow"
        );

        self.queue.extend_from_slice(packet);

        if !flush && self.queue.len() < TS_QUEUE_CAPACITY {
            return None;
        }

        let rtp_time = rtp_time_from_us(now_us);
        let sequence = self.header.sequence();
        let header = self.header.write(time_discontinuity, rtp_time);
        self.queue[..RTP_HEADER_LEN].copy_from_slice(&header);

        let payload_len = (self.queue.len() - RTP_HEADER_LEN) as u32;
        self.stats.packets_sent = self.stats.packets_sent.wrapping_add(1);
        self.stats.octets_sent = self.stats.octets_sent.wrapping_add(payload_len);
        self.stats.last_rtp_time = rtp_time;
        self.stats.last_ntp_time = ntp_from_us(now_us);
        self.flushed = true;

        tracing::trace!(
            seq = sequence,
            rtp_time,
            len = self.queue.len(),
            marker = time_discontinuity,
            "RTP packet flushed"
        );

        Some(sequence)
    }

    /// Move the flushed packet out. The packetizer is unusable until
    /// [`install`](Self::install) provides a new buffer.
    pub fn take_packet(&mut self) -> Vec<u8> {
        debug_assert!(self.flushed, "take_packet without a flush");
        self.flushed = false;
        std::mem::take(&mut self.queue)
    }

    /// Provide the next accumulation buffer, reusing `buffer` when given.
    pub fn install(&mut self, buffer: Option<Vec<u8>>) {
        let mut buffer = buffer.unwrap_or_else(|| Vec::with_capacity(TS_QUEUE_CAPACITY));
        buffer.clear();
        buffer.resize(RTP_HEADER_LEN, 0);
        self.queue = buffer;
    }

    /// Bytes currently queued, header included.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Sequence number of the next RTP packet.
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    pub fn stats(&self) -> RtpStats {
        self.stats
    }
}
