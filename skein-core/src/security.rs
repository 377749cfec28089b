//! Secure-channel handshake run before a connection carries frames.
//!
//! The transport only needs to know whether the handshake succeeded and, if
//! not, whether the failure was a trust decision ([`HandshakeError::Authentication`])
//! or something else. Real deployments plug a TLS implementation in behind
//! [`SecureChannel`]; [`PlainChannel`] and [`IdentityChannel`] cover local use
//! and tests.

use std::rc::Rc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::DuplexConnection;

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The side that dialed.
    Client,
    /// The side that accepted.
    Server,
}

impl Role {
    /// Whether this is the accepting side.
    pub fn is_server(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// One of the peers refused to trust the other.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer spoke something other than the expected handshake.
    #[error("handshake protocol error: {0}")]
    Protocol(String),

    /// The underlying connection failed or closed mid-handshake.
    #[error("handshake i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A handshake over a freshly established duplex connection.
///
/// Returns the connection to use afterwards, which may wrap the original one
/// (an encrypting channel would).
#[async_trait(?Send)]
pub trait SecureChannel {
    /// Run the handshake for the given role.
    async fn handshake(
        &self,
        role: Role,
        connection: Box<dyn DuplexConnection>,
    ) -> Result<Box<dyn DuplexConnection>, HandshakeError>;
}

#[async_trait(?Send)]
impl<S: SecureChannel + ?Sized + 'static> SecureChannel for Rc<S> {
    async fn handshake(
        &self,
        role: Role,
        connection: Box<dyn DuplexConnection>,
    ) -> Result<Box<dyn DuplexConnection>, HandshakeError> {
        (**self).handshake(role, connection).await
    }
}

/// No handshake at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainChannel;

#[async_trait(?Send)]
impl SecureChannel for PlainChannel {
    async fn handshake(
        &self,
        _role: Role,
        connection: Box<dyn DuplexConnection>,
    ) -> Result<Box<dyn DuplexConnection>, HandshakeError> {
        Ok(connection)
    }
}

const IDENTITY_MAGIC: &[u8; 4] = b"SKID";
const MAX_IDENTITY_LEN: usize = 1024;
const VERDICT_ACCEPT: u8 = 1;
const VERDICT_REJECT: u8 = 0;

/// Mutual identity check.
///
/// Each side announces an identity, checks the peer's against its trust
/// predicate, then both sides exchange their verdicts. A rejection on either
/// end therefore fails the handshake on both ends instead of leaving one of
/// them waiting.
#[derive(Clone)]
pub struct IdentityChannel {
    identity: String,
    trust: Rc<dyn Fn(&str) -> bool>,
}

impl IdentityChannel {
    /// Announce `identity` and accept any peer for which `trust` returns true.
    pub fn new(identity: impl Into<String>, trust: impl Fn(&str) -> bool + 'static) -> Self {
        Self {
            identity: identity.into(),
            trust: Rc::new(trust),
        }
    }

    /// Announce `identity` and trust every peer.
    pub fn trusting(identity: impl Into<String>) -> Self {
        Self::new(identity, |_| true)
    }
}

#[async_trait(?Send)]
impl SecureChannel for IdentityChannel {
    async fn handshake(
        &self,
        role: Role,
        mut connection: Box<dyn DuplexConnection>,
    ) -> Result<Box<dyn DuplexConnection>, HandshakeError> {
        let id = self.identity.as_bytes();
        if id.len() > MAX_IDENTITY_LEN {
            return Err(HandshakeError::Protocol(format!(
                "identity too long: {} bytes",
                id.len()
            )));
        }
        let mut hello = Vec::with_capacity(6 + id.len());
        hello.extend_from_slice(IDENTITY_MAGIC);
        hello.extend_from_slice(&(id.len() as u16).to_le_bytes());
        hello.extend_from_slice(id);
        connection.write_all(&hello).await?;
        connection.flush().await?;

        let mut magic = [0u8; 4];
        connection.read_exact(&mut magic).await?;
        if &magic != IDENTITY_MAGIC {
            return Err(HandshakeError::Protocol("bad identity magic".into()));
        }
        let mut len = [0u8; 2];
        connection.read_exact(&mut len).await?;
        let len = u16::from_le_bytes(len) as usize;
        if len > MAX_IDENTITY_LEN {
            return Err(HandshakeError::Protocol(format!(
                "peer identity too long: {len} bytes"
            )));
        }
        let mut peer = vec![0u8; len];
        connection.read_exact(&mut peer).await?;
        let peer = String::from_utf8_lossy(&peer).into_owned();

        let trusted = (self.trust)(&peer);
        let verdict = if trusted {
            VERDICT_ACCEPT
        } else {
            VERDICT_REJECT
        };
        let sent = send_verdict(&mut *connection, verdict).await;
        let mut peer_verdict = [0u8; 1];
        // a peer that rejected us may hang up before our verdict lands, but its
        // own verdict is still buffered and decides how the handshake failed
        let received = connection.read_exact(&mut peer_verdict).await;

        if !trusted {
            tracing::warn!(?role, peer = %peer, "rejecting untrusted peer identity");
            return Err(HandshakeError::Authentication(format!(
                "untrusted peer identity '{peer}'"
            )));
        }
        received?;
        if peer_verdict[0] != VERDICT_ACCEPT {
            tracing::debug!(?role, "peer rejected our identity");
            return Err(HandshakeError::Authentication(format!(
                "peer '{peer}' rejected identity '{}'",
                self.identity
            )));
        }

        sent?;
        tracing::debug!(?role, peer = %peer, "identity handshake complete");
        Ok(connection)
    }
}

async fn send_verdict(
    connection: &mut dyn DuplexConnection,
    verdict: u8,
) -> std::io::Result<()> {
    connection.write_all(&[verdict]).await?;
    connection.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (Box<dyn DuplexConnection>, Box<dyn DuplexConnection>) {
        let (a, b) = tokio::io::duplex(1024);
        (Box::new(a), Box::new(b))
    }

    #[tokio::test]
    async fn test_identity_handshake_succeeds_when_both_trust() {
        let (a, b) = pipe();
        let client = IdentityChannel::new("client", |peer| peer == "server");
        let server = IdentityChannel::new("server", |peer| peer == "client");

        let (ra, rb) = tokio::join!(
            client.handshake(Role::Client, a),
            server.handshake(Role::Server, b)
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test]
    async fn test_identity_rejection_fails_both_sides() {
        let (a, b) = pipe();
        let client = IdentityChannel::trusting("mallory");
        let server = IdentityChannel::new("server", |peer| peer == "client");

        let (ra, rb) = tokio::join!(
            client.handshake(Role::Client, a),
            server.handshake(Role::Server, b)
        );
        assert!(matches!(ra, Err(HandshakeError::Authentication(_))));
        assert!(matches!(rb, Err(HandshakeError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_rejection_from_a_peer_that_hangs_up_is_authentication() {
        let (a, mut b) = pipe();
        let rejecting_peer = async move {
            let mut hello = [0u8; 6 + 6];
            b.read_exact(&mut hello).await.expect("client hello");
            let mut reply = Vec::new();
            reply.extend_from_slice(IDENTITY_MAGIC);
            reply.extend_from_slice(&6u16.to_le_bytes());
            reply.extend_from_slice(b"server");
            reply.push(VERDICT_REJECT);
            b.write_all(&reply).await.expect("server hello");
            drop(b);
        };

        let client = IdentityChannel::trusting("client");
        let (result, ()) = tokio::join!(client.handshake(Role::Client, a), rejecting_peer);
        assert!(
            matches!(result, Err(HandshakeError::Authentication(_))),
            "{:?}",
            result.err()
        );
    }

    #[tokio::test]
    async fn test_identity_peer_hangup_is_io_error() {
        let (a, b) = pipe();
        drop(b);
        let result = IdentityChannel::trusting("client")
            .handshake(Role::Client, a)
            .await;
        assert!(matches!(result, Err(HandshakeError::Io(_))));
    }
}
