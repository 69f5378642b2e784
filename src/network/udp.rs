//! UDP Transport
//!
//! A reader task owns the receive half of the socket and pushes datagrams
//! into a channel; the tick loop drains the channel at tick boundaries and
//! sends with non-blocking `try_send_to`. A full send buffer drops the
//! datagram, which the sync layer already tolerates.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::transport::{Transport, TransportError};

/// Largest datagram accepted.
pub const MAX_DATAGRAM: usize = 65_507;

/// Inbound datagrams buffered between ticks before new ones are dropped.
const INBOX_CAPACITY: usize = 4096;

/// Tokio UDP socket with a background reader.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    inbox: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    reader: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind and start the reader task. Must be called inside a tokio runtime.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let reader = tokio::spawn(read_loop(Arc::clone(&socket), tx));
        info!("UDP transport bound on {}", local_addr);

        Ok(Self {
            socket,
            inbox,
            reader,
            local_addr,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for at least one datagram, then drain everything queued.
    ///
    /// Used by tests and tools; tick loops should call `drain`.
    pub async fn recv_batch(&mut self) -> Result<Vec<(SocketAddr, Vec<u8>)>, TransportError> {
        let first = self.inbox.recv().await.ok_or(TransportError::Closed)?;
        let mut batch = vec![first];
        batch.extend(self.drain());
        Ok(batch)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transport for UdpTransport {
    type Endpoint = SocketAddr;

    fn send_unordered(&mut self, to: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError> {
        match self.socket.try_send_to(&payload, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("send buffer full, dropped {} bytes to {}", payload.len(), to);
                Ok(())
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn drain(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = Vec::new();
        while let Ok(datagram) = self.inbox.try_recv() {
            out.push(datagram);
        }
        out
    }
}

async fn read_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<(SocketAddr, Vec<u8>)>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => match tx.try_send((from, buf[..len].to_vec())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("inbox full, dropped datagram from {}", from);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            // ICMP port-unreachable surfaces here on some platforms; the
            // socket is still usable.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!("recv reset: {}", e);
            }
            Err(e) => {
                warn!("UDP recv failed: {}", e);
                break;
            }
        }
    }
}
