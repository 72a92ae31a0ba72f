//! Reply collection for the multicast discovery probes.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Something datagrams can be received from.
#[async_trait]
pub trait Datagrams: Send + Sync {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl Datagrams for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}

/// Receive until `deadline`, passing every IPv4 datagram to `handle`.
///
/// A reset (an ICMP port-unreachable surfacing on the socket) skips to the
/// next datagram. Any other receive error ends the window early. Either way
/// what was already handled is kept.
pub async fn collect_until<S, F>(socket: &S, deadline: Instant, buf_len: usize, mut handle: F)
where
    S: Datagrams + ?Sized,
    F: FnMut(Ipv4Addr, &[u8]),
{
    let mut buf = vec![0u8; buf_len];

    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        match received {
            Ok((len, SocketAddr::V4(from))) => handle(*from.ip(), &buf[..len]),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!(error = %e, "Ignoring reset while collecting replies");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Receive failed; keeping replies so far");
                break;
            }
        }
    }
}
