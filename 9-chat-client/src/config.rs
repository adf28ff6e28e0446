use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Bytes requested per read from the remote stream.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 10;

/// Writer tasks spawned per destination (remote and local).
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Messages each bus queue holds before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Upper bound on the greeting exchange, send and reply included.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a client session needs to know before it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Name announced in the greeting and stamped on every chat message.
    pub identity: String,
    pub endpoint: Endpoint,
    /// Maximum bytes per read; also caps a partially received envelope.
    pub buffer_capacity: usize,
    /// Number of remote writer tasks and of local writer tasks.
    pub concurrency: usize,
    /// Capacity of the inbound and of the outbound queue.
    pub queue_capacity: usize,
    pub handshake_timeout: Duration,
    /// Send a departure message before closing the stream.
    pub send_departure: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("identity cannot be empty")]
    EmptyIdentity,
    #[error("buffer capacity must be greater than zero")]
    ZeroBufferCapacity,
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("handshake timeout must be greater than zero")]
    ZeroHandshakeTimeout,
}

impl ClientConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: Endpoint::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            send_departure: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.trim().is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        Ok(())
    }
}
