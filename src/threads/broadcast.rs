use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::UdpSocket;

use crate::utils::types::Address;

const MAGIC: &str = "CHORD-NAMEDIR-DISCOVER";

/// The discovery substrate behind NameDir's `refresh` (§4.3): a one-line UDP
/// broadcast probe that lets a freshly-started host find *some* candidate
/// registry address to then dial through the normal RPC facade. It never
/// carries registry data itself.
pub struct Broadcaster {
    socket: UdpSocket,
    port: u16,
}

impl Broadcaster {
    pub async fn bind(port: u16) -> io::Result<Broadcaster> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        socket.set_broadcast(true)?;
        Ok(Broadcaster { socket, port })
    }

    /// Announces `self_address` as a candidate registry and listens briefly
    /// for any reply naming a different one, returning the first such
    /// candidate found within `timeout`.
    pub async fn discover(&self, self_address: &Address, timeout: Duration) -> Option<Address> {
        let announcement = format!("{MAGIC} {self_address}");
        let broadcast_addr: SocketAddr = ([255, 255, 255, 255], self.port).into();
        if let Err(e) = self.socket.send_to(announcement.as_bytes(), broadcast_addr).await {
            warn!("broadcast send failed: {e}");
            return None;
        }

        let mut buf = [0u8; 512];
        let recv = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await;
        let (len, _peer) = match recv {
            Ok(Ok(pair)) => pair,
            _ => return None,
        };
        let text = String::from_utf8_lossy(&buf[..len]);
        let Some(rest) = text.strip_prefix(MAGIC) else {
            return None;
        };
        let candidate: Address = rest.trim().parse().ok()?;
        if &candidate == self_address {
            return None;
        }
        debug!("discovered candidate registry {candidate}");
        Some(candidate)
    }

    /// Answers any discovery probes with `self_address`, the leader side of
    /// the protocol. Runs until the socket errors out.
    pub async fn respond_forever(&self, self_address: &Address) {
        let mut buf = [0u8; 512];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("broadcast listener error: {e}");
                    return;
                }
            };
            let text = String::from_utf8_lossy(&buf[..len]);
            if text.starts_with(MAGIC) {
                let reply = format!("{MAGIC} {self_address}");
                let _ = self.socket.send_to(reply.as_bytes(), peer).await;
            }
        }
    }
}
