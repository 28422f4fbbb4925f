use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::udp::wildcard_for;
use super::{NetEvent, SessionId};
use crate::error::Result;

/// Bind `local_port` for an outbound connection to `remote`.
pub(crate) fn bind(local_port: u16, remote: SocketAddr) -> Result<TcpSocket> {
    let socket = match remote {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(wildcard_for(&remote), local_port))?;
    Ok(socket)
}

/// Session task: connect, then exchange length-prefixed datagrams.
///
/// ```text
/// | length (u16, BE) | datagram (length bytes) |
/// ```
///
/// Datagrams queued before the connection completes are sent once it does.
/// Any failure ends the session with a single [`NetEvent::Error`].
pub(crate) async fn run(
    id: SessionId,
    socket: TcpSocket,
    remote: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    let stream = match socket.connect(remote).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(NetEvent::Error {
                session: id,
                during_send: false,
                detail: format!("connect to {remote} failed: {e}"),
            });
            return;
        }
    };

    tracing::debug!(session = %id, %remote, "TCP datagram session connected");
    if events.send(NetEvent::Connected { session: id }).is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();

    let read_loop = async {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(data)) => {
                    if events.send(NetEvent::Datagram { session: id, data }).is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = events.send(NetEvent::Error {
                        session: id,
                        during_send: false,
                        detail: "connection closed by peer".to_string(),
                    });
                    return;
                }
                Err(e) => {
                    let _ = events.send(NetEvent::Error {
                        session: id,
                        during_send: false,
                        detail: e.to_string(),
                    });
                    return;
                }
            }
        }
    };

    let write_loop = async {
        while let Some(data) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &data).await {
                let _ = events.send(NetEvent::Error {
                    session: id,
                    during_send: true,
                    detail: e.to_string(),
                });
                return;
            }
        }
    };

    tokio::select! {
        _ = read_loop => {}
        _ = write_loop => {}
    }

    tracing::trace!(session = %id, "TCP datagram session task exited");
}

async fn read_frame(reader: &mut OwnedReadHalf) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

async fn write_frame(writer: &mut OwnedWriteHalf, data: &[u8]) -> io::Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "datagram exceeds 65535 bytes")
    })?;
    let mut frame = Vec::with_capacity(2 + data.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(data);
    writer.write_all(&frame).await
}
