//! Duplex byte connections and the providers that create them.
//!
//! A [`DuplexConnection`] is any ordered, reliable byte stream. The transport
//! never looks past that contract, so TCP sockets, in-memory pipes and
//! secure-channel wrappers are interchangeable.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::mpsc;

/// Ordered, reliable, bidirectional byte stream.
pub trait DuplexConnection: AsyncRead + AsyncWrite + Unpin + 'static {}

impl<T> DuplexConnection for T where T: AsyncRead + AsyncWrite + Unpin + 'static {}

/// Provider trait for creating connections and listeners.
///
/// Single-threaded design, no `Send` bounds.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// The connection type produced by this provider.
    type Stream: DuplexConnection;
    /// The listener type produced by this provider.
    type Listener: Listener<Stream = Self::Stream> + 'static;

    /// Create a listener bound to the given address.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Connect to a remote address.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Something that accepts incoming connections.
#[async_trait(?Send)]
pub trait Listener {
    /// The connection type this listener yields.
    type Stream: DuplexConnection;

    /// Accept a single incoming connection, returning it with the peer address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// TCP networking through Tokio.
#[derive(Debug, Clone, Default)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioListener { inner })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Listener half of [`TokioNetworkProvider`].
#[derive(Debug)]
pub struct TokioListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl Listener for TokioListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}

type Registry = Rc<RefCell<MemoryRegistry>>;

#[derive(Default)]
struct MemoryRegistry {
    listeners: HashMap<String, mpsc::UnboundedSender<(DuplexStream, String)>>,
    next_client: u64,
}

/// In-process network built on `tokio::io::duplex` pipes.
///
/// Clones share one address space. Addresses are arbitrary strings.
#[derive(Clone)]
pub struct MemoryNetworkProvider {
    registry: Registry,
    buffer_size: usize,
}

impl MemoryNetworkProvider {
    /// Create an empty in-memory network with 64 KiB pipe buffers.
    pub fn new() -> Self {
        Self::with_buffer_size(64 * 1024)
    }

    /// Create an empty in-memory network with the given pipe buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            registry: Rc::new(RefCell::new(MemoryRegistry::default())),
            buffer_size,
        }
    }
}

impl Default for MemoryNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl NetworkProvider for MemoryNetworkProvider {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let mut registry = self.registry.borrow_mut();
        if registry
            .listeners
            .get(addr)
            .is_some_and(|tx| !tx.is_closed())
        {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        registry.listeners.insert(addr.to_string(), tx);
        tracing::debug!(addr, "memory listener bound");
        Ok(MemoryListener {
            addr: addr.to_string(),
            registry: self.registry.clone(),
            incoming: RefCell::new(rx),
        })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let mut registry = self.registry.borrow_mut();
        registry.next_client += 1;
        let client_addr = format!("memory-client-{}", registry.next_client);
        let tx = registry.listeners.get(addr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening on {addr}"),
            )
        })?;
        let (client, server) = tokio::io::duplex(self.buffer_size);
        tx.send((server, client_addr)).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("listener on {addr} closed"),
            )
        })?;
        Ok(client)
    }
}

/// Listener half of [`MemoryNetworkProvider`]. Unbinds on drop.
pub struct MemoryListener {
    addr: String,
    registry: Registry,
    incoming: RefCell<mpsc::UnboundedReceiver<(DuplexStream, String)>>,
}

#[async_trait(?Send)]
impl Listener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        std::future::poll_fn(|cx| self.incoming.borrow_mut().poll_recv(cx))
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener unbound"))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.addr.clone())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.registry.borrow_mut().listeners.remove(&self.addr);
    }
}
