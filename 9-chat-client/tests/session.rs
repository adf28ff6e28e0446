use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use anyhow::{Context, Result};
use chat_client::{
    ClientConfig, Message, MessageKind, Session, StopReason, perform_handshake,
    message::write_message,
};
use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
        duplex, sink,
    },
    time::timeout,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Stream that counts how often it is shut down.
struct CountingStream {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
}

impl AsyncRead for CountingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.shutdowns.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

struct Harness {
    session: Session<CountingStream>,
    peer: BufReader<DuplexStream>,
    shutdowns: Arc<AtomicUsize>,
}

/// Completes a handshake against an in-memory peer that answers with a
/// greeting from `server`.
async fn connected(config: ClientConfig) -> Result<Harness> {
    let (client, peer) = duplex(8192);
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let stream = CountingStream {
        inner: client,
        shutdowns: Arc::clone(&shutdowns),
    };

    let mut peer = BufReader::new(peer);
    let answer = async {
        let greeting = read_envelope(&mut peer)
            .await?
            .context("client should greet first")?;
        anyhow::ensure!(greeting.kind == MessageKind::Greeting, "expected hello");
        write_message(&mut peer, &Message::greeting("server")).await?;
        Ok::<_, anyhow::Error>(())
    };
    let (session, answered) = tokio::join!(perform_handshake(stream, &config), answer);
    answered?;

    Ok(Harness {
        session: session?,
        peer,
        shutdowns,
    })
}

/// Local input that never produces a line until the returned handle is
/// written to or dropped.
fn idle_input() -> (BufReader<DuplexStream>, DuplexStream) {
    let (input, handle) = duplex(1024);
    (BufReader::new(input), handle)
}

#[tokio::test]
async fn peer_disconnect_stops_everything_once() -> Result<()> {
    let Harness {
        session,
        peer,
        shutdowns,
    } = connected(ClientConfig::new("alice")).await?;
    let bus = session.bus().clone();
    let signal = session.shutdown_signal();
    let (input, _input) = idle_input();

    let run = tokio::spawn(session.run(input, sink()));
    drop(peer);

    let report = timeout(TEST_TIMEOUT, run).await??;
    assert_eq!(report.reason, StopReason::RemoteClosed);
    assert!(!report.departure_sent);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(bus.inbound.is_closed());
    assert!(bus.outbound.is_closed());
    assert_eq!(bus.close(), 0, "teardown already closed both queues");
    assert!(signal.is_raised());
    Ok(())
}

#[tokio::test]
async fn repeated_stop_requests_tear_down_once() -> Result<()> {
    let Harness {
        session,
        mut peer,
        shutdowns,
    } = connected(ClientConfig::new("alice")).await?;
    let signal = session.shutdown_signal();
    let (input, _input) = idle_input();

    let run = tokio::spawn(session.run(input, sink()));
    assert!(signal.raise(StopReason::Requested));
    assert!(!signal.raise(StopReason::Requested));
    assert!(!signal.raise(StopReason::RemoteClosed));

    let report = timeout(TEST_TIMEOUT, run).await??;
    assert_eq!(report.reason, StopReason::Requested);
    assert!(report.departure_sent);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    let departure = read_envelope(&mut peer)
        .await?
        .context("expected a departure")?;
    assert_eq!(departure.kind, MessageKind::Departure);
    assert_eq!(departure.author, "alice");
    assert!(read_envelope(&mut peer).await?.is_none(), "stream should be closed");
    Ok(())
}

#[tokio::test]
async fn typed_lines_are_sent_until_quit() -> Result<()> {
    let Harness {
        session, mut peer, ..
    } = connected(ClientConfig::new("bob")).await?;
    let (input, mut keyboard) = idle_input();

    let run = tokio::spawn(session.run(input, sink()));
    keyboard.write_all(b"hello world\n\n   \n").await?;

    let chat = timeout(TEST_TIMEOUT, read_envelope(&mut peer))
        .await??
        .context("expected a chat message")?;
    assert_eq!(chat.kind, MessageKind::Chat);
    assert_eq!(chat.author, "bob");
    assert_eq!(chat.body, "hello world");

    keyboard.write_all(b"/quit\n").await?;
    let report = timeout(TEST_TIMEOUT, run).await??;
    assert_eq!(report.reason, StopReason::Requested);
    assert_eq!(report.sent, 1);

    let departure = read_envelope(&mut peer)
        .await?
        .context("expected a departure")?;
    assert_eq!(departure.kind, MessageKind::Departure);
    assert!(read_envelope(&mut peer).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn end_of_input_closes_the_session() -> Result<()> {
    let Harness {
        session, mut peer, ..
    } = connected(ClientConfig::new("alice")).await?;

    let report = timeout(TEST_TIMEOUT, session.run(&b""[..], sink())).await?;
    assert_eq!(report.reason, StopReason::InputClosed);
    assert!(report.departure_sent);

    let departure = read_envelope(&mut peer)
        .await?
        .context("expected a departure")?;
    assert_eq!(departure.kind, MessageKind::Departure);
    Ok(())
}

#[tokio::test]
async fn piped_line_is_sent_before_end_of_input() -> Result<()> {
    let Harness {
        session, mut peer, ..
    } = connected(ClientConfig::new("bob")).await?;

    let report = timeout(TEST_TIMEOUT, session.run(&b"hello world\n"[..], sink())).await?;
    assert_eq!(report.reason, StopReason::InputClosed);
    assert_eq!(report.sent, 1);
    assert!(report.departure_sent);

    let chat = read_envelope(&mut peer)
        .await?
        .context("expected the piped line")?;
    assert_eq!(chat.kind, MessageKind::Chat);
    assert_eq!(chat.body, "hello world");

    let departure = read_envelope(&mut peer)
        .await?
        .context("expected a departure")?;
    assert_eq!(departure.kind, MessageKind::Departure);
    assert!(read_envelope(&mut peer).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn lines_typed_right_before_quit_are_sent() -> Result<()> {
    let Harness {
        session, mut peer, ..
    } = connected(ClientConfig::new("bob")).await?;

    let input = &b"first\nlast words\n/quit\nnever sent\n"[..];
    let report = timeout(TEST_TIMEOUT, session.run(input, sink())).await?;
    assert_eq!(report.reason, StopReason::Requested);
    assert_eq!(report.sent, 2);

    let mut envelopes = Vec::new();
    while let Some(message) = read_envelope(&mut peer).await? {
        envelopes.push(message);
    }
    let (departure, chats) = envelopes
        .split_last()
        .context("expected envelopes before the stream closed")?;
    assert_eq!(departure.kind, MessageKind::Departure);

    // Two writers may swap the pair, but both lines must precede the bye.
    let mut bodies: Vec<_> = chats.iter().map(|chat| chat.body.as_str()).collect();
    bodies.sort_unstable();
    assert_eq!(bodies, ["first", "last words"]);
    Ok(())
}

#[tokio::test]
async fn departure_can_be_disabled() -> Result<()> {
    let config = ClientConfig {
        send_departure: false,
        ..ClientConfig::new("alice")
    };
    let Harness {
        session,
        mut peer,
        shutdowns,
    } = connected(config).await?;
    let signal = session.shutdown_signal();
    let (input, _input) = idle_input();

    let run = tokio::spawn(session.run(input, sink()));
    signal.raise(StopReason::Requested);

    let report = timeout(TEST_TIMEOUT, run).await??;
    assert!(!report.departure_sent);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(read_envelope(&mut peer).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn queued_messages_reach_the_wire() -> Result<()> {
    let Harness {
        session, mut peer, ..
    } = connected(ClientConfig::new("alice")).await?;
    session
        .bus()
        .outbound
        .push(Message::chat("alice", "queued before start"))
        .await?;
    let (input, _input) = idle_input();

    let run = tokio::spawn(session.run(input, sink()));
    let chat = timeout(TEST_TIMEOUT, read_envelope(&mut peer))
        .await??
        .context("expected the queued message")?;
    assert_eq!(chat.body, "queued before start");

    drop(peer);
    let report = timeout(TEST_TIMEOUT, run).await??;
    assert_eq!(report.reason, StopReason::RemoteClosed);
    assert_eq!(report.sent, 1);
    Ok(())
}

#[tokio::test]
async fn every_inbound_message_is_rendered_with_many_writers() -> Result<()> {
    let config = ClientConfig {
        concurrency: 4,
        queue_capacity: 2,
        ..ClientConfig::new("alice")
    };
    let Harness {
        session, mut peer, ..
    } = connected(config).await?;
    let (input, _input) = idle_input();
    let (output, rendered) = duplex(8192);

    let run = tokio::spawn(session.run(input, output));

    write_message(&mut peer, &Message::greeting("carol")).await?;
    for n in 0..10 {
        write_message(&mut peer, &Message::chat("carol", format!("line {n}"))).await?;
    }
    write_message(&mut peer, &Message::departure("carol")).await?;

    // A stop abandons whatever is still queued, so hang up only once every
    // line is on screen.
    let mut rendered = BufReader::new(rendered).lines();
    let mut lines = Vec::new();
    while lines.len() < 12 {
        let line = timeout(TEST_TIMEOUT, rendered.next_line())
            .await??
            .context("output closed early")?;
        lines.push(line);
    }
    drop(peer);

    let report = timeout(TEST_TIMEOUT, run).await??;
    assert_eq!(report.reason, StopReason::RemoteClosed);
    assert_eq!(report.received, 12);
    assert_eq!(report.rendered, 12);
    assert!(timeout(TEST_TIMEOUT, rendered.next_line()).await??.is_none());

    // Writers race each other, so only the set of lines is fixed.
    assert_eq!(lines.len(), 12);
    assert!(lines.contains(&"*** carol joined the chat".to_string()));
    assert!(lines.contains(&"*** carol left the chat".to_string()));
    for n in 0..10 {
        let suffix = format!(" - carol: line {n}");
        assert!(
            lines.iter().any(|line| line.ends_with(&suffix)),
            "missing {suffix:?} in {lines:?}"
        );
    }
    Ok(())
}

async fn read_envelope(peer: &mut BufReader<DuplexStream>) -> Result<Option<Message>> {
    let mut line = String::new();
    if peer.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let message = Message::decode(line.trim_end().as_bytes())
        .with_context(|| format!("undecodable envelope {line:?}"))?;
    Ok(Some(message))
}
