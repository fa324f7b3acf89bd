//! Outbound gateway connection with connect-retry.
//!
//! [`DeliveryChannel`] owns the connection lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --(attempt ok)--> Connected
//!                               ^    |                         |
//!                               +----+ (attempt failed,        | send error / close()
//!                                       sleep retry interval)  v
//!                                                          Disconnected
//! ```
//!
//! The channel never gives up on its own; deciding when a connection should
//! be abandoned despite looking healthy is up to the caller.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a graceful shutdown of the gateway stream.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Not connected to gateway")]
    NotConnected,
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] io::Error),
}

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a, S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send + 'a>>;

/// Opens streams to the gateway.
///
/// Abstracted so the retry and send logic can be exercised without a network.
pub trait Connector: Send + Sync {
    type Stream: AsyncWrite + Unpin + Send;

    /// One connection attempt.
    fn connect(&self) -> ConnectFuture<'_, Self::Stream>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> &str;
}

/// TCP connector for a `host:port` gateway address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> ConnectFuture<'_, TcpStream> {
        Box::pin(async move {
            let stream = TcpStream::connect(self.address.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok::<_, io::Error>(stream)
        })
    }

    fn peer(&self) -> &str {
        &self.address
    }
}

/// Timing knobs for [`DeliveryChannel::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between failed connection attempts.
    pub retry_interval: Duration,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_CONNECT_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// A persistent, self-healing connection to the gateway.
pub struct DeliveryChannel<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    state: ConnectionState,
    stream: Option<C::Stream>,
    /// Consecutive failed sends since the last successful connect or send.
    failures: u32,
}

impl<C: Connector> DeliveryChannel<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            state: ConnectionState::Disconnected,
            stream: None,
            failures: 0,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Connect to the gateway, retrying until an attempt succeeds.
    ///
    /// Returns immediately when already connected. Cancel by dropping the
    /// future; the channel is then left in `Connecting` with no stream.
    pub async fn connect(&mut self) {
        if self.is_connected() {
            return;
        }
        self.state = ConnectionState::Connecting;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result =
                tokio::time::timeout(self.policy.connect_timeout, self.connector.connect()).await;

            match result {
                Ok(Ok(stream)) => {
                    info!(peer = self.connector.peer(), attempt, "connected to gateway");
                    self.stream = Some(stream);
                    self.state = ConnectionState::Connected;
                    self.failures = 0;
                    return;
                }
                Ok(Err(error)) => {
                    warn!(peer = self.connector.peer(), attempt, %error, "gateway connection failed");
                }
                Err(_) => {
                    warn!(
                        peer = self.connector.peer(),
                        attempt,
                        timeout = ?self.policy.connect_timeout,
                        "gateway connection attempt timed out"
                    );
                }
            }

            tokio::time::sleep(self.policy.retry_interval).await;
        }
    }

    /// Send `message` in full.
    ///
    /// Partial writes are continued until every byte is accepted. On failure
    /// the stream is dropped and the channel becomes `Disconnected`.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), SendError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(SendError::NotConnected);
        };

        let result = match stream.write_all(message).await {
            Ok(()) => stream.flush().await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                self.failures = 0;
                Ok(())
            }
            Err(error) => {
                self.failures += 1;
                self.stream = None;
                self.state = ConnectionState::Disconnected;
                warn!(
                    peer = self.connector.peer(),
                    failures = self.failures,
                    %error,
                    "send to gateway failed"
                );
                Err(SendError::TransportFailure(error))
            }
        }
    }

    /// Close the connection. Errors are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
                Ok(Ok(())) => debug!(peer = self.connector.peer(), "gateway connection closed"),
                Ok(Err(error)) => {
                    warn!(peer = self.connector.peer(), %error, "error closing gateway connection")
                }
                Err(_) => warn!(peer = self.connector.peer(), "timed out closing gateway connection"),
            }
        }
        self.state = ConnectionState::Disconnected;
    }
}
