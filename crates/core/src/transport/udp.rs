use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{NetEvent, SessionId};
use crate::error::Result;

/// Largest datagram a UDP session will receive.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Bind `local_port` on the wildcard address matching `remote`'s family and
/// connect to `remote`.
///
/// Binding is synchronous so a port conflict is reported to the caller
/// immediately. Connecting the socket makes ICMP port-unreachable show up
/// as receive errors, which the sender expects on its RTP sessions.
pub(crate) fn bind(local_port: u16, remote: SocketAddr) -> Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(SocketAddr::new(wildcard_for(&remote), local_port))?;
    socket.connect(remote)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket)?)
}

pub(crate) fn wildcard_for(remote: &SocketAddr) -> IpAddr {
    match remote {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Session task: send queued datagrams, forward received ones.
///
/// Runs until the outbound queue is closed (session destroyed) or the event
/// receiver goes away.
pub(crate) async fn run(
    id: SessionId,
    socket: UdpSocket,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let event = tokio::select! {
            data = outbound.recv() => {
                let Some(data) = data else { break };
                match socket.send(&data).await {
                    Ok(_) => continue,
                    Err(e) => NetEvent::Error {
                        session: id,
                        during_send: true,
                        detail: e.to_string(),
                    },
                }
            }
            received = socket.recv(&mut buf) => match received {
                Ok(n) => NetEvent::Datagram {
                    session: id,
                    data: buf[..n].to_vec(),
                },
                Err(e) => NetEvent::Error {
                    session: id,
                    during_send: false,
                    detail: e.to_string(),
                },
            },
        };

        if events.send(event).is_err() {
            break;
        }
    }

    tracing::trace!(session = %id, "UDP session task exited");
}
