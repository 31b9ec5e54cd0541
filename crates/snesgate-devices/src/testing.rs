//! Test doubles for transports and backends.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::device::DeviceEvent;
use crate::protocols::retroarch as wire;
use crate::transport::{Connector, SharedTransport, Transport};

type Responder = Box<dyn Fn(&str) -> Option<Bytes> + Send + Sync>;

/// In-memory transport recording every outbound datagram
pub(crate) struct MockTransport {
    sent: StdMutex<Vec<String>>,
    replies_tx: mpsc::UnboundedSender<Bytes>,
    replies_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    responder: Responder,
    open: AtomicBool,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent", &self.sent())
            .field("open", &self.is_open())
            .finish()
    }
}

impl MockTransport {
    /// A backend that never answers
    pub fn silent() -> Arc<Self> {
        Self::with_responder(|_| None)
    }

    /// A backend answering each request through `responder`
    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Option<Bytes> + Send + Sync + 'static,
    {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: StdMutex::new(Vec::new()),
            replies_tx,
            replies_rx: Mutex::new(replies_rx),
            responder: Box::new(responder),
            open: AtomicBool::new(true),
        })
    }

    /// A backend serving memory where each byte equals the low byte of its offset
    pub fn memory() -> Arc<Self> {
        Self::with_responder(|request| {
            let (address, size) = parse_read(request)?;
            let bytes: Vec<u8> = (0..size).map(|i| (address + i) as u8).collect();
            Some(read_reply(address, &hex_spaced(&bytes)))
        })
    }

    /// A backend answering every read with the sentinel
    pub fn sentinel() -> Arc<Self> {
        Self::with_responder(|request| {
            let (address, _) = parse_read(request)?;
            Some(read_reply(address, wire::SENTINEL))
        })
    }

    /// Every datagram sent so far
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Queue an unsolicited datagram
    pub fn push_reply(&self, datagram: impl Into<Bytes>) {
        let _ = self.replies_tx.send(datagram.into());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        let text = String::from_utf8_lossy(data).to_string();
        self.sent.lock().unwrap().push(text.clone());
        if let Some(reply) = (self.responder)(&text) {
            self.push_reply(reply);
        }
        Ok(data.len())
    }

    async fn recv(&self) -> io::Result<Bytes> {
        let mut rx = self.replies_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "mock dropped"))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connector handing out a fixed transport, counting connects
#[derive(Debug)]
pub(crate) struct MockConnector {
    transport: Option<Arc<MockTransport>>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self {
            transport: Some(transport),
            connects: AtomicUsize::new(0),
        }
    }

    /// A connector whose connect always fails
    pub fn refusing() -> Self {
        Self {
            transport: None,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> io::Result<SharedTransport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.transport {
            Some(transport) => Ok(transport.clone()),
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        }
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

/// How a [`FakeRetroArch`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Never reply
    Silent,
    /// Reply to VERSION but answer reads with the sentinel
    NoMemory,
    /// Reply to VERSION and serve memory
    Full,
}

/// A RetroArch stand-in listening on a loopback UDP port
pub(crate) struct FakeRetroArch {
    pub addr: SocketAddr,
    pub version_probes: Arc<AtomicUsize>,
    pub requests: Arc<StdMutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeRetroArch {
    pub async fn start(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let version_probes = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(StdMutex::new(Vec::new()));

        let probes = version_probes.clone();
        let log = requests.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                log.lock().unwrap().push(request.clone());
                if behavior == Behavior::Silent {
                    continue;
                }
                let reply = if request == wire::VERSION {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Some(Bytes::from_static(b"1.9.0\n"))
                } else if let Some((address, size)) = parse_read(&request) {
                    if behavior == Behavior::NoMemory {
                        Some(read_reply(address, wire::SENTINEL))
                    } else {
                        let bytes: Vec<u8> = (0..size).map(|i| (address + i) as u8).collect();
                        Some(read_reply(address, &hex_spaced(&bytes)))
                    }
                } else {
                    None
                };
                if let Some(reply) = reply {
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });

        Self {
            addr,
            version_probes,
            requests,
            task,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn version_probes(&self) -> usize {
        self.version_probes.load(Ordering::SeqCst)
    }
}

impl Drop for FakeRetroArch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parse `READ_CORE_RAM <hex> <dec>`
pub(crate) fn parse_read(request: &str) -> Option<(u32, u32)> {
    let mut tokens = request.split_whitespace();
    if tokens.next()? != wire::READ_CORE_RAM {
        return None;
    }
    let address = u32::from_str_radix(tokens.next()?, 16).ok()?;
    let size = tokens.next()?.parse().ok()?;
    Some((address, size))
}

pub(crate) fn read_reply(address: u32, payload: &str) -> Bytes {
    Bytes::from(format!("{} {:x} {}\n", wire::READ_CORE_RAM, address, payload))
}

pub(crate) fn hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wait for the next device event
pub(crate) async fn next_event(rx: &mut broadcast::Receiver<DeviceEvent>) -> DeviceEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a device event")
        .expect("event channel closed")
}

/// Assert that no event arrives within `window`
pub(crate) async fn assert_quiet(rx: &mut broadcast::Receiver<DeviceEvent>, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected device event: {:?}", event);
    }
}
