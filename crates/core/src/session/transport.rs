use std::fmt;
use std::net::IpAddr;

/// How RTP and RTCP reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Separate UDP sockets per stream, bound right away.
    Udp,
    /// Outbound TCP connections carrying length-prefixed datagrams. The
    /// sockets are only created by `finish_init`, because the client sets
    /// up its end late.
    Tcp,
    /// No sockets: packets are handed to the caller with a channel number
    /// for multiplexing over an existing connection (RFC 2326 §10.12).
    TcpInterleaved,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "RTP/AVP/UDP"),
            Self::Tcp => write!(f, "RTP/AVP/TCP"),
            Self::TcpInterleaved => write!(f, "RTP/AVP/TCP;interleaved"),
        }
    }
}

/// Where and how media goes, fixed at initialization.
///
/// For [`TransportMode::TcpInterleaved`] the "ports" are channel numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub mode: TransportMode,
    pub client_ip: IpAddr,
    pub client_rtp_port: u16,
    /// `None` when the client does not want RTCP.
    pub client_rtcp_port: Option<u16>,
    /// Local RTP port; 0 until bound (always 0 when interleaved).
    pub local_rtp_port: u16,
    /// Interleaved channel for RTP packets.
    pub rtp_channel: Option<u8>,
    /// Interleaved channel for RTCP packets.
    pub rtcp_channel: Option<u8>,
}

impl SessionDescriptor {
    pub fn new(
        mode: TransportMode,
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: Option<u16>,
    ) -> Self {
        Self {
            mode,
            client_ip,
            client_rtp_port,
            client_rtcp_port,
            local_rtp_port: 0,
            rtp_channel: None,
            rtcp_channel: None,
        }
    }

    pub fn is_interleaved(&self) -> bool {
        self.mode == TransportMode::TcpInterleaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_profile() {
        assert_eq!(TransportMode::Udp.to_string(), "RTP/AVP/UDP");
        assert_eq!(TransportMode::Tcp.to_string(), "RTP/AVP/TCP");
        assert_eq!(
            TransportMode::TcpInterleaved.to_string(),
            "RTP/AVP/TCP;interleaved"
        );
    }
}
