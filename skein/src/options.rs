//! Client and server configuration.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use skein_core::{PlainChannel, SecureChannel};
use skein_transport::ConnectionOptions;

/// Largest request or response header accepted by default.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Configuration of a [`ClientConnection`](crate::ClientConnection).
#[derive(Clone)]
pub struct ClientOptions {
    /// Transport settings of the connection.
    pub connection: ConnectionOptions,
    /// Largest encoded header sent or accepted.
    pub max_header_size: usize,
    /// Handshake run before the settings exchange.
    pub security: Rc<dyn SecureChannel>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            security: Rc::new(PlainChannel),
        }
    }
}

impl ClientOptions {
    /// Set the transport settings.
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Set the header size limit.
    pub fn with_max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    /// Set the secure channel.
    pub fn with_security(mut self, security: impl SecureChannel + 'static) -> Self {
        self.security = Rc::new(security);
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("connection", &self.connection)
            .field("max_header_size", &self.max_header_size)
            .finish_non_exhaustive()
    }
}

/// Configuration of a [`Server`](crate::Server).
#[derive(Clone)]
pub struct ServerOptions {
    /// Transport settings of every accepted connection.
    pub connection: ConnectionOptions,
    /// Largest encoded header sent or accepted.
    pub max_header_size: usize,
    /// How long [`Server::shutdown`](crate::Server::shutdown) lets
    /// connections close gracefully before disposing them.
    pub shutdown_timeout: Duration,
    /// Handshake run before the settings exchange.
    pub security: Rc<dyn SecureChannel>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            shutdown_timeout: Duration::from_secs(5),
            security: Rc::new(PlainChannel),
        }
    }
}

impl ServerOptions {
    /// Set the transport settings.
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Set the header size limit.
    pub fn with_max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    /// Set the graceful shutdown bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the secure channel.
    pub fn with_security(mut self, security: impl SecureChannel + 'static) -> Self {
        self.security = Rc::new(security);
        self
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("connection", &self.connection)
            .field("max_header_size", &self.max_header_size)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}
