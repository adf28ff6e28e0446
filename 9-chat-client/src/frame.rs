//! Splits an incoming byte stream into JSON envelopes.
//!
//! The peer is only guaranteed to send one envelope per write; nothing
//! promises that one read yields exactly one envelope. Outgoing frames are
//! terminated with `\n`, and incoming bytes are split with a streaming JSON
//! parser so newline-terminated, unterminated, concatenated and split
//! envelopes are all recovered.
//!
//! Envelopes are limited to the session's buffer capacity (1024 bytes by
//! default). A longer envelope is discarded whole, however the reads split
//! it, and the local reader refuses to send lines whose envelope would
//! exceed the same limit.

use serde::de::IgnoredAny;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("discarded {len} bytes of malformed input")]
    Malformed { len: usize },
    #[error("discarded partial envelope of {len} bytes exceeding the {limit} byte limit")]
    Oversized { len: usize, limit: usize },
}

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len: max_frame_len.max(1),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the bytes not yet consumed as frames.
    pub fn into_remainder(self) -> Vec<u8> {
        self.buffer
    }

    /// Pops the next complete envelope, if one is buffered.
    ///
    /// `None` means more bytes are needed. An `Err` reports input that was
    /// dropped; the caller may keep calling to drain what follows it.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, FrameError>> {
        let (next, end) = {
            let mut values =
                serde_json::Deserializer::from_slice(&self.buffer).into_iter::<IgnoredAny>();
            let next = values.next();
            (next, values.byte_offset())
        };
        match next {
            None => {
                // Only whitespace is left.
                self.buffer.clear();
                None
            }
            Some(Ok(_)) => {
                let frame: Vec<u8> = self.buffer.drain(..end).collect();
                let len = frame
                    .iter()
                    .skip_while(|byte| byte.is_ascii_whitespace())
                    .count();
                if len > self.max_frame_len {
                    return Some(Err(FrameError::Oversized {
                        len,
                        limit: self.max_frame_len,
                    }));
                }
                Some(Ok(frame))
            }
            Some(Err(err)) if err.is_eof() => {
                if self.buffer.len() > self.max_frame_len {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(FrameError::Oversized {
                        len,
                        limit: self.max_frame_len,
                    }));
                }
                None
            }
            Some(Err(_)) => Some(Err(self.skip_malformed())),
        }
    }

    fn skip_malformed(&mut self) -> FrameError {
        let len = match self.buffer.iter().position(|byte| *byte == b'\n') {
            Some(newline) => newline + 1,
            None => self.buffer.len(),
        };
        self.buffer.drain(..len);
        FrameError::Malformed { len }
    }
}
