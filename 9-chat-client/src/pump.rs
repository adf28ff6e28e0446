//! The four task roles that move messages between the stream, the bus and
//! local I/O.
//!
//! - [`RemoteReader`] owns the read half of the stream and fills `inbound`.
//! - [`LocalReader`] owns the local line source and fills `outbound`.
//! - [`RemoteWriter`] tasks drain `outbound` onto the shared write half.
//! - [`LocalWriter`] tasks drain `inbound` onto the shared output sink.
//!
//! Every blocking point selects on the [`ShutdownSignal`] first, so a raised
//! signal is observed on the next poll no matter what the task waits on.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::Mutex,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    bus::{MessageQueue, QueueClosed},
    frame::FrameDecoder,
    message::{Message, write_message},
    shutdown::{ShutdownSignal, StopReason},
};

/// Typed at the start of a line, ends the session.
pub const QUIT_COMMAND: &str = "/quit";

/// Pause before retrying after an I/O error that did not close the stream.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Bound on finishing the write in hand once a local stop is raised.
pub(crate) const IN_FLIGHT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters shared by every task of one session.
#[derive(Debug, Default)]
pub struct PumpStats {
    received: AtomicU64,
    sent: AtomicU64,
    rendered: AtomicU64,
    dropped: AtomicU64,
    write_interrupted: AtomicBool,
}

impl PumpStats {
    /// Messages decoded from the stream and queued for display.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages written to the stream.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages written to the local output.
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    /// Malformed or oversized input discarded by the remote reader.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether shutdown cut a stream write short, leaving a partial frame.
    pub fn write_interrupted(&self) -> bool {
        self.write_interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn record_sent(&self) {
        Self::bump(&self.sent);
    }

    pub(crate) fn mark_write_interrupted(&self) {
        self.write_interrupted.store(true, Ordering::Release);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reads the remote stream and queues decoded messages on `inbound`.
pub struct RemoteReader<R> {
    reader: R,
    frames: FrameDecoder,
    chunk_size: usize,
    inbound: MessageQueue,
    shutdown: ShutdownSignal,
    stats: Arc<PumpStats>,
}

impl<R> RemoteReader<R>
where
    R: AsyncRead + Unpin,
{
    /// `pending` holds bytes that were already read off the stream, such as
    /// whatever followed the handshake reply.
    pub fn new(
        reader: R,
        pending: &[u8],
        chunk_size: usize,
        inbound: MessageQueue,
        shutdown: ShutdownSignal,
        stats: Arc<PumpStats>,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut frames = FrameDecoder::new(chunk_size);
        frames.extend(pending);
        Self {
            reader,
            frames,
            chunk_size,
            inbound,
            shutdown,
            stats,
        }
    }

    pub async fn run(mut self) {
        if !self.forward_frames().await {
            return;
        }

        let mut chunk = vec![0; self.chunk_size];
        loop {
            let read = select! {
                biased;
                _ = self.shutdown.raised() => return,
                read = self.reader.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    info!("server closed connection");
                    self.shutdown.raise(StopReason::RemoteClosed);
                    return;
                }
                Ok(n) => {
                    self.frames.extend(&chunk[..n]);
                    if !self.forward_frames().await {
                        return;
                    }
                }
                Err(err) if is_connection_closed(&err) => {
                    info!(error = %err, "connection to server lost");
                    self.shutdown.raise(StopReason::RemoteClosed);
                    return;
                }
                Err(err) => {
                    warn!(error = ?err, "could not read from server");
                    if !pause(&self.shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    /// Decodes every complete frame and queues it. Returns `false` when the
    /// task should stop.
    async fn forward_frames(&mut self) -> bool {
        while let Some(frame) = self.frames.next_frame() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "dropping unreadable input from server");
                    PumpStats::bump(&self.stats.dropped);
                    continue;
                }
            };
            let message = match Message::decode(&frame) {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "dropping malformed message from server");
                    PumpStats::bump(&self.stats.dropped);
                    continue;
                }
            };
            if !deliver(&self.inbound, message, &self.shutdown).await {
                return false;
            }
            PumpStats::bump(&self.stats.received);
        }
        true
    }
}

/// Turns local input lines into chat messages on `outbound`.
///
/// Lines whose envelope would be longer than `max_frame_len` bytes are not
/// sent, since the receiving side discards such frames.
pub struct LocalReader<I> {
    input: I,
    identity: String,
    max_frame_len: usize,
    outbound: MessageQueue,
    shutdown: ShutdownSignal,
}

impl<I> LocalReader<I>
where
    I: AsyncBufRead + Unpin,
{
    pub fn new(
        input: I,
        identity: impl Into<String>,
        max_frame_len: usize,
        outbound: MessageQueue,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            input,
            identity: identity.into(),
            max_frame_len,
            outbound,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            let read = select! {
                biased;
                _ = self.shutdown.raised() => return,
                read = self.input.read_line(&mut line) => read,
            };

            match read {
                Ok(0) => {
                    debug!("local input closed");
                    self.shutdown.raise(StopReason::InputClosed);
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = ?err, "could not read local input");
                    if !pause(&self.shutdown).await {
                        return;
                    }
                    continue;
                }
            }

            let text = line.trim_end_matches(['\r', '\n']);
            if text.trim().is_empty() {
                continue;
            }
            if text.trim().eq_ignore_ascii_case(QUIT_COMMAND) {
                info!("leaving chat");
                self.shutdown.raise(StopReason::Requested);
                return;
            }

            let message = Message::chat(self.identity.as_str(), text);
            if !self.fits(&message) {
                continue;
            }
            if !deliver(&self.outbound, message, &self.shutdown).await {
                return;
            }
        }
    }

    fn fits(&self, message: &Message) -> bool {
        let len = match message.encode() {
            Ok(encoded) => encoded.len(),
            Err(err) => {
                warn!(error = %err, "could not encode typed line");
                return false;
            }
        };
        if len > self.max_frame_len {
            warn!(
                len,
                limit = self.max_frame_len,
                "line too long to send, shorten it and try again"
            );
            return false;
        }
        true
    }
}

/// One of the tasks draining `outbound` onto the stream.
///
/// Writers share the write half behind a mutex so frames from different
/// tasks never interleave.
pub struct RemoteWriter<W> {
    id: usize,
    writer: Arc<Mutex<W>>,
    outbound: MessageQueue,
    shutdown: ShutdownSignal,
    stats: Arc<PumpStats>,
}

impl<W> RemoteWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        id: usize,
        writer: Arc<Mutex<W>>,
        outbound: MessageQueue,
        shutdown: ShutdownSignal,
        stats: Arc<PumpStats>,
    ) -> Self {
        Self {
            id,
            writer,
            outbound,
            shutdown,
            stats,
        }
    }

    pub async fn run(self) {
        loop {
            let Some(message) = next_message(&self.outbound, &self.shutdown, self.id).await else {
                return;
            };

            let send = self.send(&message);
            tokio::pin!(send);
            let sent = select! {
                biased;
                reason = self.shutdown.raised() => {
                    // The message in hand is dropped only when the remote closed.
                    if reason == StopReason::RemoteClosed {
                        self.stats.mark_write_interrupted();
                        debug!(writer = self.id, "abandoning write, remote closed");
                        return;
                    }
                    match timeout(IN_FLIGHT_WRITE_TIMEOUT, &mut send).await {
                        Ok(sent) => {
                            self.settle(sent);
                        }
                        Err(_) => {
                            self.stats.mark_write_interrupted();
                            warn!(writer = self.id, "timed out finishing write at shutdown");
                        }
                    }
                    return;
                }
                sent = &mut send => sent,
            };

            if !self.settle(sent) {
                return;
            }
        }
    }

    /// Records the outcome of one write. Returns `false` when the connection
    /// is gone.
    fn settle(&self, sent: io::Result<()>) -> bool {
        match sent {
            Ok(()) => {
                self.stats.record_sent();
                true
            }
            Err(err) if is_connection_closed(&err) => {
                info!(writer = self.id, error = %err, "connection to server lost");
                self.shutdown.raise(StopReason::RemoteClosed);
                false
            }
            Err(err) => {
                warn!(writer = self.id, error = ?err, "could not write to server");
                true
            }
        }
    }

    async fn send(&self, message: &Message) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await
    }
}

/// One of the tasks rendering `inbound` onto the local output.
pub struct LocalWriter<O> {
    id: usize,
    output: Arc<Mutex<O>>,
    inbound: MessageQueue,
    shutdown: ShutdownSignal,
    stats: Arc<PumpStats>,
}

impl<O> LocalWriter<O>
where
    O: AsyncWrite + Unpin,
{
    pub fn new(
        id: usize,
        output: Arc<Mutex<O>>,
        inbound: MessageQueue,
        shutdown: ShutdownSignal,
        stats: Arc<PumpStats>,
    ) -> Self {
        Self {
            id,
            output,
            inbound,
            shutdown,
            stats,
        }
    }

    pub async fn run(self) {
        loop {
            let Some(message) = next_message(&self.inbound, &self.shutdown, self.id).await else {
                return;
            };

            let rendered = select! {
                biased;
                _ = self.shutdown.raised() => return,
                rendered = self.render(&message) => rendered,
            };

            match rendered {
                Ok(()) => PumpStats::bump(&self.stats.rendered),
                Err(err) => warn!(writer = self.id, error = ?err, "could not render message"),
            }
        }
    }

    async fn render(&self, message: &Message) -> io::Result<()> {
        let line = format!("{message}\n");
        let mut output = self.output.lock().await;
        output.write_all(line.as_bytes()).await?;
        output.flush().await
    }
}

/// Waits for the next message unless the signal wins. A closed queue raises
/// the signal.
async fn next_message(
    queue: &MessageQueue,
    shutdown: &ShutdownSignal,
    writer: usize,
) -> Option<Message> {
    let next = select! {
        biased;
        _ = shutdown.raised() => return None,
        next = queue.pop() => next,
    };
    if next.is_none() {
        warn!(writer, "worker could not read from closed queue, shutting down");
        shutdown.raise(StopReason::QueueClosed);
    }
    next
}

/// Queues a message unless the signal wins. Returns `false` when the caller
/// should stop.
async fn deliver(queue: &MessageQueue, message: Message, shutdown: &ShutdownSignal) -> bool {
    select! {
        biased;
        _ = shutdown.raised() => false,
        pushed = queue.push(message) => match pushed {
            Ok(()) => true,
            Err(QueueClosed) => {
                warn!("message queue closed while enqueueing, shutting down");
                shutdown.raise(StopReason::QueueClosed);
                false
            }
        },
    }
}

/// Sleeps for the retry delay. Returns `false` if the signal was raised
/// meanwhile.
async fn pause(shutdown: &ShutdownSignal) -> bool {
    select! {
        biased;
        _ = shutdown.raised() => false,
        _ = sleep(TRANSIENT_RETRY_DELAY) => true,
    }
}

pub(crate) fn is_connection_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}
