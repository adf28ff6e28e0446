use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// RFC 850 style, e.g. `Monday, 02-Jan-06 15:04:05 UTC`.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday], [day]-[month repr:short]-[year repr:last_two] [hour]:[minute]:[second] UTC"
);

const FRAME_DELIMITER: u8 = b'\n';

/// Envelope kind. On the wire `type` is the integer code: 0 for a greeting,
/// 1 for a chat message, 2 for a departure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageKind {
    Greeting,
    Chat,
    Departure,
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Greeting => 0,
            MessageKind::Chat => 1,
            MessageKind::Departure => 2,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Greeting),
            1 => Ok(Self::Chat),
            2 => Ok(Self::Departure),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greeting => write!(f, "hello"),
            Self::Chat => write!(f, "message"),
            Self::Departure => write!(f, "bye"),
        }
    }
}

/// A single chat envelope.
///
/// Every field is required on decode, so a payload missing `type` or
/// carrying an unknown one is rejected rather than defaulted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub author: String,
    pub timestamp: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("could not encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("could not decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Message {
    pub fn new(author: impl Into<String>, body: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            author: author.into(),
            timestamp: now_timestamp(),
            body: body.into(),
            kind,
        }
    }

    pub fn greeting(author: impl Into<String>) -> Self {
        Self::new(author, String::new(), MessageKind::Greeting)
    }

    pub fn chat(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(author, body, MessageKind::Chat)
    }

    pub fn departure(author: impl Into<String>) -> Self {
        Self::new(author, String::new(), MessageKind::Departure)
    }

    /// Serializes the message as compact JSON without a trailing delimiter.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Chat => write!(f, "{} - {}: {}", self.timestamp, self.author, self.body),
            MessageKind::Greeting => write!(f, "*** {} joined the chat", self.author),
            MessageKind::Departure => write!(f, "*** {} left the chat", self.author),
        }
    }
}

/// Reports whether `bytes` hold a greeting envelope.
///
/// A payload that fails to decode yields `(false, None)`, which callers must
/// read as "not a greeting".
pub fn is_greeting(bytes: &[u8]) -> (bool, Option<MessageKind>) {
    match Message::decode(bytes) {
        Ok(message) => (message.kind == MessageKind::Greeting, Some(message.kind)),
        Err(_) => (false, None),
    }
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write_all per envelope keeps frames contiguous on the wire.
    let mut encoded = message.encode().map_err(to_io_error)?;
    encoded.push(FRAME_DELIMITER);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn to_io_error(err: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
