use crate::media::RtpStats;

use super::PacketType;

/// Length in bytes of an SR without report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

/// SDES item types (RFC 3550 §6.5).
const SDES_CNAME: u8 = 1;
const SDES_NOTE: u8 = 7;

/// Append a Sender Report with no reception report blocks (RFC 3550 §6.4.1).
///
/// ```text
/// |V=2|P|RC=0 | PT=200 | length=6 |
/// | SSRC                          |
/// | NTP timestamp, high word      |
/// | NTP timestamp, low word       |
/// | RTP timestamp                 |
/// | sender's packet count         |
/// | sender's octet count          |
/// ```
pub fn write_sender_report(buf: &mut Vec<u8>, ssrc: u32, stats: &RtpStats) {
    buf.push(0x80);
    buf.push(PacketType::SenderReport.as_u8());
    buf.extend_from_slice(&6u16.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(&stats.last_ntp_time.to_be_bytes());
    buf.extend_from_slice(&stats.last_rtp_time.to_be_bytes());
    buf.extend_from_slice(&stats.packets_sent.to_be_bytes());
    buf.extend_from_slice(&stats.octets_sent.to_be_bytes());
}

/// Append an SDES packet with a single chunk carrying CNAME and NOTE items
/// (RFC 3550 §6.5), null-terminated and zero-padded to a word boundary.
///
/// Item values longer than 255 bytes are truncated;
/// [`SenderConfig::validate`](crate::SenderConfig::validate) rejects them
/// up front.
pub fn write_sdes(buf: &mut Vec<u8>, ssrc: u32, cname: &str, note: &str) {
    let start = buf.len();

    buf.push(0x80 | 1);
    buf.push(PacketType::SourceDescription.as_u8());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&ssrc.to_be_bytes());

    for (item, value) in [(SDES_CNAME, cname), (SDES_NOTE, note)] {
        let value = &value.as_bytes()[..value.len().min(u8::MAX as usize)];
        buf.push(item);
        buf.push(value.len() as u8);
        buf.extend_from_slice(value);
    }

    buf.push(0);
    while (buf.len() - start) % 4 != 0 {
        buf.push(0);
    }

    let words = ((buf.len() - start) / 4 - 1) as u16;
    buf[start + 2..start + 4].copy_from_slice(&words.to_be_bytes());
}

/// Build the periodic SR + SDES compound packet.
pub fn build_compound_report(ssrc: u32, stats: &RtpStats, cname: &str, note: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SENDER_REPORT_LEN + 64);
    write_sender_report(&mut buf, ssrc, stats);
    write_sdes(&mut buf, ssrc, cname, note);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::RtcpWalker;

    fn stats() -> RtpStats {
        RtpStats {
            packets_sent: 0x0102_0304,
            octets_sent: 0x0506_0708,
            last_rtp_time: 0x1122_3344,
            last_ntp_time: 0xAABB_CCDD_EEFF_0011,
        }
    }

    #[test]
    fn sender_report_layout() {
        let mut buf = Vec::new();
        write_sender_report(&mut buf, 0xdeadbeef, &stats());
        assert_eq!(buf.len(), SENDER_REPORT_LEN);
        assert_eq!(&buf[..4], &[0x80, 200, 0, 6]);
        assert_eq!(&buf[4..8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&buf[12..16], &[0xEE, 0xFF, 0x00, 0x11]);
        assert_eq!(&buf[16..20], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&buf[20..24], &[1, 2, 3, 4]);
        assert_eq!(&buf[24..28], &[5, 6, 7, 8]);
    }

    #[test]
    fn sdes_with_default_items() {
        let mut buf = Vec::new();
        write_sdes(&mut buf, 0xdeadbeef, "someone@somewhere", "Hell's frozen over.");
        // 8 + (2 + 17) + (2 + 19) + 1 = 49, padded to 52
        assert_eq!(buf.len(), 52);
        assert_eq!(&buf[..4], &[0x81, 202, 0, 12]);
        assert_eq!(buf[8], 1);
        assert_eq!(buf[9], 17);
        assert_eq!(&buf[10..27], b"someone@somewhere");
        assert_eq!(buf[27], 7);
        assert_eq!(buf[28], 19);
        assert_eq!(&buf[48..], &[0, 0, 0, 0]);
    }

    #[test]
    fn sdes_already_aligned_still_terminated() {
        // 8 + (2 + 1) + (2 + 2) + 1 = 16: no padding needed
        let mut buf = Vec::new();
        write_sdes(&mut buf, 1, "a", "bc");
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[15], 0);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 3);
    }

    #[test]
    fn compound_walks_cleanly() {
        let buf = build_compound_report(7, &stats(), "cname", "note");
        let types: Vec<_> = RtcpWalker::new(&buf)
            .map(|p| p.unwrap().packet_type)
            .collect();
        assert_eq!(
            types,
            vec![PacketType::SenderReport, PacketType::SourceDescription]
        );
    }
}
