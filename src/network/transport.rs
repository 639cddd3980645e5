use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SwarmError};
use crate::network::codec::{self, Message, MAX_DATAGRAM_SIZE};
use crate::network::registry::PeerAddr;

/// A node's bound datagram socket.
///
/// Sends are fire-and-forget. `receive` parks until a datagram arrives or
/// [`Transport::close`] is called, after which every call fails with
/// [`SwarmError::Closed`] without blocking.
pub struct Transport {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    closed: CancellationToken,
    close_once: AtomicBool,
}

impl Transport {
    /// Bind `addr` (`host:port`), retrying once after `retry_delay`.
    ///
    /// # Errors
    ///
    /// Returns `AddressInUse` if the retry also fails.
    pub async fn bind(addr: &str, retry_delay: Duration) -> Result<Self> {
        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(
                    addr,
                    error = %e,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "Failed to bind, retrying"
                );
                tokio::time::sleep(retry_delay).await;
                UdpSocket::bind(addr)
                    .await
                    .map_err(|source| SwarmError::AddressInUse {
                        addr: addr.to_string(),
                        source,
                    })?
            }
        };

        let local_addr = socket.local_addr()?;
        tracing::debug!(addr = %local_addr, "Transport bound");

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            closed: CancellationToken::new(),
            close_once: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send `message` to a configured peer.
    pub async fn send_to_peer(&self, peer: &PeerAddr, message: &Message) -> Result<()> {
        let socket = self.socket().ok_or(SwarmError::Closed)?;
        let bytes = codec::encode(message)?;
        socket
            .send_to(&bytes, (peer.host.as_str(), peer.port))
            .await
            .map_err(|source| SwarmError::SendFailure {
                peer: peer.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Send `message` to a raw socket address, e.g. the source of a probe.
    pub async fn send_to_addr(&self, addr: SocketAddr, message: &Message) -> Result<()> {
        let socket = self.socket().ok_or(SwarmError::Closed)?;
        let bytes = codec::encode(message)?;
        socket
            .send_to(&bytes, addr)
            .await
            .map_err(|source| SwarmError::SendFailure {
                peer: addr.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Wait for the next datagram and decode it.
    ///
    /// # Errors
    ///
    /// - `Closed` once the transport has been closed
    /// - `MalformedMessage` / `MessageTooLarge` for undecodable datagrams;
    ///   the transport stays usable
    /// - `Io` for socket errors
    pub async fn receive(&self) -> Result<(Message, SocketAddr)> {
        let socket = match self.socket() {
            Some(socket) if !self.closed.is_cancelled() => socket,
            _ => return Err(SwarmError::Closed),
        };

        // One spare byte so oversized datagrams are detected instead of truncated.
        let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];

        let (len, from) = tokio::select! {
            _ = self.closed.cancelled() => return Err(SwarmError::Closed),
            result = socket.recv_from(&mut buf) => result?,
        };

        let message = codec::decode(&buf[..len])?;
        Ok((message, from))
    }

    /// Close the transport and release the socket.
    ///
    /// Wakes any pending `receive`. Returns `true` only for the call that
    /// actually closed it.
    pub fn close(&self) -> bool {
        if self.close_once.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.closed.cancel();
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(addr = %self.local_addr, "Transport closed");
        true
    }
}
