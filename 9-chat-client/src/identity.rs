use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_IDENTITY_CHARS: usize = 20;

const PROMPT: &str = "Username: ";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("username cannot be empty")]
    Empty,
    #[error("username cannot contain whitespace")]
    Whitespace,
    #[error("username cannot be longer than {} characters", MAX_IDENTITY_CHARS)]
    TooLong,
    #[error("no username entered before input closed")]
    InputClosed,
    #[error("could not read username: {0}")]
    Io(#[from] io::Error),
}

/// Checks a username and strips the line terminator it was typed with.
pub fn validate_identity(raw: &str) -> Result<String, IdentityError> {
    let name = raw.trim_end_matches(['\r', '\n']);
    if name.is_empty() {
        return Err(IdentityError::Empty);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(IdentityError::Whitespace);
    }
    if name.chars().count() > MAX_IDENTITY_CHARS {
        return Err(IdentityError::TooLong);
    }
    Ok(name.to_string())
}

/// Asks for a username on `output` and reads one line from `input`.
pub async fn prompt_identity<R, W>(input: &mut R, output: &mut W) -> Result<String, IdentityError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(PROMPT.as_bytes()).await?;
    output.flush().await?;

    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Err(IdentityError::InputClosed);
    }
    validate_identity(&line)
}
