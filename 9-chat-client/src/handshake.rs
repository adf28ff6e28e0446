//! Greeting exchange that turns a raw stream into a [`Session`].
//!
//! The client sends a `hello` envelope carrying its identity and expects the
//! server's first envelope to be a `hello` as well. Nothing here retries; a
//! caller that wants another attempt dials a fresh stream.

use std::{fmt, io, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    config::ClientConfig,
    endpoint::{DEFAULT_TRANSPORT, Endpoint},
    frame::FrameDecoder,
    message::{Message, MessageKind, is_greeting, write_message},
    session::Session,
};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("could not connect to {transport}://{endpoint}: {source}")]
    Dial {
        endpoint: String,
        transport: String,
        #[source]
        source: io::Error,
    },
    #[error("could not send hello message: {source}")]
    Send {
        #[source]
        source: io::Error,
    },
    #[error("could not read message from the server: {source}")]
    Read {
        #[source]
        source: io::Error,
    },
    #[error(
        "could not perform handshake, expected hello type message but received {}",
        received_label(.received)
    )]
    ProtocolMismatch { received: Option<MessageKind> },
    #[error("server did not answer the greeting within {after:?}")]
    Timeout { after: Duration },
}

/// Coarse classification of [`HandshakeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeErrorKind {
    DialFailure,
    SendFailure,
    ReadFailure,
    ProtocolMismatch,
    Timeout,
}

impl fmt::Display for HandshakeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DialFailure => write!(f, "dial failure"),
            Self::SendFailure => write!(f, "send failure"),
            Self::ReadFailure => write!(f, "read failure"),
            Self::ProtocolMismatch => write!(f, "protocol mismatch"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl HandshakeError {
    pub fn kind(&self) -> HandshakeErrorKind {
        match self {
            Self::Dial { .. } => HandshakeErrorKind::DialFailure,
            Self::Send { .. } => HandshakeErrorKind::SendFailure,
            Self::Read { .. } => HandshakeErrorKind::ReadFailure,
            Self::ProtocolMismatch { .. } => HandshakeErrorKind::ProtocolMismatch,
            Self::Timeout { .. } => HandshakeErrorKind::Timeout,
        }
    }
}

fn received_label(received: &Option<MessageKind>) -> String {
    match received {
        Some(kind) => format!("{kind} type"),
        None => "an undecodable payload".to_string(),
    }
}

/// Opens a stream to `endpoint`. Only the `tcp` transport is supported.
pub async fn dial(endpoint: &Endpoint) -> Result<TcpStream, HandshakeError> {
    let dial_error = |source| HandshakeError::Dial {
        endpoint: endpoint.render(),
        transport: endpoint.transport().to_string(),
        source,
    };

    if endpoint.transport() != DEFAULT_TRANSPORT {
        return Err(dial_error(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported transport '{}'", endpoint.transport()),
        )));
    }

    TcpStream::connect(endpoint.render()).await.map_err(dial_error)
}

/// Dials the configured endpoint and performs the handshake on the result.
pub async fn connect(config: &ClientConfig) -> Result<Session<TcpStream>, HandshakeError> {
    info!(endpoint = %config.endpoint, "connecting");
    let stream = dial(&config.endpoint).await?;
    perform_handshake(stream, config).await
}

/// Exchanges greetings over `stream` and wraps it in a [`Session`].
///
/// The whole exchange is bounded by `config.handshake_timeout`.
pub async fn perform_handshake<S>(
    mut stream: S,
    config: &ClientConfig,
) -> Result<Session<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let deadline = config.handshake_timeout;
    let leftover = match timeout(deadline, exchange_greetings(&mut stream, config)).await {
        Ok(exchanged) => exchanged?,
        Err(_) => return Err(HandshakeError::Timeout { after: deadline }),
    };

    info!(identity = %config.identity, "handshake complete");
    Ok(Session::new(stream, config.clone(), leftover))
}

/// Sends our greeting, waits for the server's, and returns whatever bytes
/// arrived after it.
async fn exchange_greetings<S>(
    stream: &mut S,
    config: &ClientConfig,
) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(stream, &Message::greeting(config.identity.as_str()))
        .await
        .map_err(|source| HandshakeError::Send { source })?;

    let mut frames = FrameDecoder::new(config.buffer_capacity);
    let mut chunk = vec![0; config.buffer_capacity.max(1)];
    let reply = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|source| HandshakeError::Read { source })?;
        if n == 0 {
            return Err(HandshakeError::Read {
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection before replying",
                ),
            });
        }

        frames.extend(&chunk[..n]);
        match frames.next_frame() {
            Some(Ok(frame)) => break frame,
            Some(Err(err)) => {
                debug!(error = %err, "unusable greeting reply");
                return Err(HandshakeError::ProtocolMismatch { received: None });
            }
            // The reply is split across reads.
            None => continue,
        }
    };

    let (greeted, kind) = is_greeting(&reply);
    if !greeted {
        return Err(HandshakeError::ProtocolMismatch { received: kind });
    }
    Ok(frames.into_remainder())
}
