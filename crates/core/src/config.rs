use std::time::Duration;

use crate::error::{Result, SenderError};

/// First local RTP port tried by the UDP port scan.
pub const DEFAULT_BASE_RTP_PORT: u16 = 15550;

/// Local RTP port used by the deferred TCP transport.
pub const DEFAULT_TCP_RTP_PORT: u16 = 20000;

/// Fixed synchronization source identifier.
pub const DEFAULT_SSRC: u32 = 0xdead_beef;

/// Interval between RTCP sender reports.
pub const DEFAULT_SENDER_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Distance between the primary and the retransmission port pairs.
pub const DEFAULT_RETRANSMISSION_PORT_OFFSET: u16 = 120;

/// Number of sent RTP packets kept for retransmission.
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 128;

/// Settings for the NACK-driven retransmission subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionConfig {
    /// Added to both the local and the client RTP/RTCP ports to form the
    /// retransmission port pair.
    pub port_offset: u16,
    /// Upper bound on the packet history; the oldest packet is evicted
    /// once it is exceeded.
    pub max_history: usize,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        Self {
            port_offset: DEFAULT_RETRANSMISSION_PORT_OFFSET,
            max_history: DEFAULT_MAX_HISTORY_LENGTH,
        }
    }
}

/// Sender-level configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Where the UDP port scan starts. Ports advance in steps of 2.
    pub base_rtp_port: u16,
    /// Local RTP port for [`TransportMode::Tcp`](crate::TransportMode::Tcp);
    /// RTCP uses the next port.
    pub tcp_rtp_port: u16,
    /// SSRC written to every RTP and RTCP packet.
    pub ssrc: u32,
    /// Period of the SR + SDES compound packet.
    pub sender_report_interval: Duration,
    /// SDES CNAME item (RFC 3550 §6.5.1).
    pub cname: String,
    /// SDES NOTE item (RFC 3550 §6.5.7).
    pub note: String,
    /// When `None`, no history is kept and NACKs are ignored.
    pub retransmission: Option<RetransmissionConfig>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            base_rtp_port: DEFAULT_BASE_RTP_PORT,
            tcp_rtp_port: DEFAULT_TCP_RTP_PORT,
            ssrc: DEFAULT_SSRC,
            sender_report_interval: DEFAULT_SENDER_REPORT_INTERVAL,
            cname: "someone@somewhere".to_string(),
            note: "Hell's frozen over.".to_string(),
            retransmission: None,
        }
    }
}

impl SenderConfig {
    /// Enable retransmission with default parameters.
    pub fn with_retransmission(mut self) -> Self {
        self.retransmission = Some(RetransmissionConfig::default());
        self
    }

    /// Check the values that would otherwise trip wire-format limits.
    pub fn validate(&self) -> Result<()> {
        if self.cname.len() > u8::MAX as usize || self.note.len() > u8::MAX as usize {
            return Err(SenderError::InvalidConfig(
                "SDES items are limited to 255 bytes",
            ));
        }
        if self.sender_report_interval.is_zero() {
            return Err(SenderError::InvalidConfig(
                "sender report interval must be non-zero",
            ));
        }
        if let Some(rtx) = &self.retransmission {
            if rtx.max_history == 0 {
                return Err(SenderError::InvalidConfig(
                    "retransmission history must hold at least one packet",
                ));
            }
            if rtx.port_offset < 2 {
                return Err(SenderError::InvalidConfig(
                    "retransmission ports must not overlap the primary pair",
                ));
            }
        }
        Ok(())
    }
}
