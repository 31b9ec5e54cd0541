/*!
 * Backend transports.
 *
 * A transport carries whole datagrams between an adapter and its backend.
 * It is created by a factory through a [`Connector`] and shared by `Arc`
 * with the device the factory attaches.
 */
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

/// Largest datagram accepted from a backend
pub const MAX_DATAGRAM: usize = 65_536;

/// Datagram transport to a backend
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send one datagram
    async fn send(&self, data: &[u8]) -> io::Result<usize>;

    /// Receive one datagram. An empty datagram means the peer went away.
    async fn recv(&self) -> io::Result<Bytes>;

    /// Mark the transport closed; further sends and receives fail
    fn close(&self);

    /// Whether the transport is still usable
    fn is_open(&self) -> bool;
}

/// A transport shared between a factory and its device
pub type SharedTransport = Arc<dyn Transport>;

/// Creates transports to a backend
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Establish a new transport
    async fn connect(&self) -> io::Result<SharedTransport>;

    /// Printable backend address
    fn target(&self) -> String;
}

/// Connected UDP socket transport
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    open: AtomicBool,
}

impl UdpTransport {
    /// Bind an ephemeral local socket and connect it to `peer`
    pub async fn connect(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!("UDP transport {} -> {}", socket.local_addr()?, peer);
        Ok(Self {
            socket,
            peer,
            open: AtomicBool::new(true),
        })
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.socket.send(data).await
    }

    async fn recv(&self) -> io::Result<Bytes> {
        self.ensure_open()?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = self.socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("UDP transport to {} closed", self.peer);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connector resolving a `host:port` string to a UDP transport
#[derive(Debug, Clone)]
pub struct UdpConnector {
    host: String,
}

impl UdpConnector {
    /// Create a connector for `host:port`
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    async fn connect(&self) -> io::Result<SharedTransport> {
        let peer = lookup_host(self.host.as_str()).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to an address", self.host),
            )
        })?;
        Ok(Arc::new(UdpTransport::connect(peer).await?))
    }

    fn target(&self) -> String {
        self.host.clone()
    }
}
