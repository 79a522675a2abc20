//! Transport Socket capability consumed by the harness.
//!
//! The reliable transport under test is supplied from outside. It exposes a
//! blocking byte-stream API plus an [`EffectStack`] attachment point through
//! which every segment and timer tick of its lossy layer is routed.

use std::time::Duration;

use bytes::Bytes;

use crate::config::SocketDefaults;
use crate::effects::EffectStack;
use crate::errors::EffectError;

/// Errors reported by a Transport Socket implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The implementation has not provided this operation yet
    #[error("{operation} is not implemented")]
    NotImplemented {
        /// Name of the missing operation
        operation: &'static str,
    },

    /// Operation attempted on a closed connection
    #[error("Connection closed")]
    Closed,

    /// Connection establishment failed
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// Why the handshake was abandoned
        reason: String,
    },

    /// The effect chain rejected a segment
    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-socket configuration handed to a [`TransportFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Receive window advertised during the handshake
    pub window: u8,
    /// Retransmission timeout
    pub timeout: Duration,
    /// Whether unfinished operations should be tolerated
    pub suppress_not_implemented: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketDefaults::default().socket_config()
    }
}

impl SocketConfig {
    /// Creates a configuration with the given window and the default timeout.
    pub fn with_window(window: u8) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    /// Reports an operation the implementation has not provided yet.
    ///
    /// Implementations call this from unfinished operations. When
    /// suppression is configured the call is logged and tolerated so early
    /// bring-up can exercise the parts that already exist.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotImplemented` - If suppression is not configured
    pub fn not_implemented(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.suppress_not_implemented {
            tracing::warn!(operation, "suppressing not-implemented error");
            Ok(())
        } else {
            Err(TransportError::NotImplemented { operation })
        }
    }
}

/// Byte-stream operations shared by client and server sockets.
pub trait TransportSocket {
    /// Queues a prefix of `data` for transmission, returning its length.
    ///
    /// May accept fewer bytes than offered, including zero while the send
    /// window is saturated.
    ///
    /// # Errors
    /// Returns `TransportError` if the connection cannot accept data.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Blocks until bytes are available; an empty result means the peer
    /// closed the connection.
    ///
    /// # Errors
    /// Returns `TransportError` if the connection failed.
    fn recv(&mut self) -> Result<Bytes, TransportError>;

    /// Performs the connection termination handshake.
    ///
    /// # Errors
    /// Returns `TransportError` if termination failed.
    fn shutdown(&mut self) -> Result<(), TransportError>;

    /// Releases the socket's resources.
    ///
    /// # Errors
    /// Returns `TransportError` if cleanup failed.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Returns the effect chain attachment point of the lossy layer.
    fn effects(&self) -> &EffectStack;
}

/// Client side of a connection.
pub trait ClientSocket: TransportSocket {
    /// Performs the blocking connection handshake.
    ///
    /// # Errors
    /// Returns `TransportError` if the handshake failed.
    fn connect(&mut self) -> Result<(), TransportError>;
}

/// Server side of a connection.
pub trait ServerSocket: TransportSocket {
    /// Blocks until a client completes the handshake.
    ///
    /// # Errors
    /// Returns `TransportError` if the handshake failed.
    fn accept(&mut self) -> Result<(), TransportError>;
}

/// Builds the sockets of the transport implementation under test.
pub trait TransportFactory: Send + Sync {
    /// Client socket type
    type Client: ClientSocket;
    /// Server socket type
    type Server: ServerSocket;

    /// Creates a client socket.
    ///
    /// # Errors
    /// Returns `TransportError` if the socket could not be created.
    fn client(&self, config: &SocketConfig) -> Result<Self::Client, TransportError>;

    /// Creates a server socket.
    ///
    /// # Errors
    /// Returns `TransportError` if the socket could not be created.
    fn server(&self, config: &SocketConfig) -> Result<Self::Server, TransportError>;
}
