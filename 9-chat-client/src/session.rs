//! A connected chat session and its run-to-completion lifecycle.
//!
//! [`Session::run`] consumes the session, so the pool is started once and the
//! teardown that follows it runs exactly once regardless of how many stop
//! triggers fire. Unless the remote closed first, teardown writes whatever is
//! still queued for the server before the departure message, so a line typed
//! just before `/quit` or end of input is not lost.

use std::{fmt, sync::Arc, time::Duration};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    bus::MessageBus,
    config::ClientConfig,
    message::{Message, write_message},
    pump::{LocalReader, LocalWriter, PumpStats, RemoteReader, RemoteWriter},
    shutdown::{ShutdownSignal, StopReason},
};

/// Bound on each best-effort teardown write.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: StopReason,
    pub received: u64,
    pub sent: u64,
    pub rendered: u64,
    pub dropped: u64,
    pub departure_sent: bool,
}

/// An established connection that has completed the greeting exchange.
pub struct Session<S> {
    config: ClientConfig,
    reader: ReadHalf<S>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    pending: Vec<u8>,
    bus: MessageBus,
    shutdown: ShutdownSignal,
    stats: Arc<PumpStats>,
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.config.identity)
            .field("endpoint", &self.config.endpoint.render())
            .field("pending_bytes", &self.pending.len())
            .field("state", &self.shutdown.state())
            .finish_non_exhaustive()
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps a stream whose handshake already succeeded. `pending` holds any
    /// bytes read past the greeting reply.
    pub(crate) fn new(stream: S, config: ClientConfig, pending: Vec<u8>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let bus = MessageBus::new(config.queue_capacity, config.queue_capacity);
        Self {
            config,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            pending,
            bus,
            shutdown: ShutdownSignal::new(),
            stats: Arc::new(PumpStats::default()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Queues shared with the pump. Pushing onto `outbound` sends a message
    /// alongside the local reader.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Handle for stopping the session from outside.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    /// Runs every pump task until the session stops, then tears it down.
    ///
    /// `input` feeds the local reader; `output` receives rendered messages.
    /// Returns only after every task has exited and the stream is closed.
    pub async fn run<I, O>(self, input: I, output: O) -> SessionReport
    where
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let Session {
            config,
            reader,
            writer,
            pending,
            bus,
            shutdown,
            stats,
        } = self;
        let concurrency = config.concurrency.max(1);
        let output = Arc::new(Mutex::new(output));

        let mut tasks: FuturesUnordered<JoinHandle<()>> = FuturesUnordered::new();
        tasks.push(tokio::spawn(
            RemoteReader::new(
                reader,
                &pending,
                config.buffer_capacity,
                bus.inbound.clone(),
                shutdown.clone(),
                Arc::clone(&stats),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            LocalReader::new(
                input,
                config.identity.as_str(),
                config.buffer_capacity,
                bus.outbound.clone(),
                shutdown.clone(),
            )
            .run(),
        ));
        for id in 0..concurrency {
            tasks.push(tokio::spawn(
                RemoteWriter::new(
                    id,
                    Arc::clone(&writer),
                    bus.outbound.clone(),
                    shutdown.clone(),
                    Arc::clone(&stats),
                )
                .run(),
            ));
            tasks.push(tokio::spawn(
                LocalWriter::new(
                    id,
                    Arc::clone(&output),
                    bus.inbound.clone(),
                    shutdown.clone(),
                    Arc::clone(&stats),
                )
                .run(),
            ));
        }
        info!(identity = %config.identity, writers = concurrency, "session started");

        while let Some(joined) = tasks.next().await {
            if let Err(err) = joined {
                // A task that died without raising would leave the rest waiting.
                error!(error = ?err, "pump task failed");
                shutdown.raise(StopReason::Requested);
            }
        }

        let reason = shutdown.reason().unwrap_or(StopReason::Requested);
        info!(%reason, "all pump tasks stopped");

        let departure_sent = teardown(&config, reason, &*writer, &bus, &stats).await;
        if let Err(err) = output.lock().await.flush().await {
            debug!(error = ?err, "could not flush local output");
        }

        SessionReport {
            reason,
            received: stats.received(),
            sent: stats.sent(),
            rendered: stats.rendered(),
            dropped: stats.dropped(),
            departure_sent,
        }
    }
}

/// Flushes what is left on `outbound`, sends the departure message if it
/// can, closes the stream, then closes both queues. Returns whether the
/// departure went out.
async fn teardown<W>(
    config: &ClientConfig,
    reason: StopReason,
    writer: &Mutex<W>,
    bus: &MessageBus,
    stats: &PumpStats,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;

    if reason != StopReason::RemoteClosed && !stats.write_interrupted() {
        flush_outbound(&mut *writer, bus, stats).await;
    }

    let departure_sent = if !config.send_departure {
        false
    } else if reason == StopReason::RemoteClosed {
        debug!("remote already closed, skipping departure");
        false
    } else if stats.write_interrupted() {
        debug!("a write was cut short, skipping departure");
        false
    } else {
        let departure = Message::departure(config.identity.as_str());
        match timeout(TEARDOWN_TIMEOUT, write_message(&mut *writer, &departure)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(error = ?err, "could not send departure message");
                false
            }
            Err(_) => {
                warn!("timed out sending departure message");
                false
            }
        }
    };

    match timeout(TEARDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => debug!("connection closed"),
        Ok(Err(err)) => debug!(error = ?err, "connection close reported an error"),
        Err(_) => warn!("timed out closing connection"),
    }

    let closed = bus.close();
    debug!(closed, "message queues closed");

    departure_sent
}

/// Writes every message still queued on `outbound`, in queue order. Stops at
/// the first failure and marks the stream as cut short.
async fn flush_outbound<W>(writer: &mut W, bus: &MessageBus, stats: &PumpStats)
where
    W: AsyncWrite + Unpin,
{
    let mut flushed = 0usize;
    while let Some(message) = bus.outbound.try_pop() {
        match timeout(TEARDOWN_TIMEOUT, write_message(writer, &message)).await {
            Ok(Ok(())) => {
                stats.record_sent();
                flushed += 1;
            }
            Ok(Err(err)) => {
                warn!(error = ?err, "could not flush queued message");
                stats.mark_write_interrupted();
                break;
            }
            Err(_) => {
                warn!("timed out flushing queued message");
                stats.mark_write_interrupted();
                break;
            }
        }
    }
    if flushed > 0 {
        debug!(flushed, "flushed queued messages before leaving");
    }
}
