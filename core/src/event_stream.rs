//! Decoding of the line-delimited event stream shared by both
//! collaborators.
//!
//! Events are separated by a blank line. Each line of an event carries the
//! `data:` marker followed by one JSON payload whose `type` field selects the
//! [`StreamEvent`] variant. A line that fails to parse is logged and skipped;
//! it never aborts the read.

use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use replaycast_async_utils::CancelErr;
use replaycast_async_utils::OrCancelExt;
use replaycast_protocol::StreamEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ReplayError;
use crate::transport::ByteStream;

const DATA_MARKER: &str = "data:";

/// Incremental decoder. Incomplete trailing bytes are kept across
/// [`EventDecoder::push`] calls, so a chunk boundary may fall anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = find_delimiter(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
            events.extend(parse_block(&String::from_utf8_lossy(&block[..end])));
        }
        events
    }

    /// Flush whatever is left once the transport has ended. A final event
    /// without its trailing blank line is still delivered.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Earliest blank-line delimiter: `(start, len)`.
fn find_delimiter(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Vec<StreamEvent> {
    block
        .lines()
        .filter_map(|line| parse_line(line.trim_end_matches('\r')))
        .collect()
}

fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_MARKER)?.trim_start();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream event");
            None
        }
    }
}

/// Callbacks driven by [`read_events`].
///
/// `on_complete` and `on_error` are mutually exclusive and fire at most
/// once per read. A cancelled read fires neither.
pub trait EventSink: Send {
    fn on_event(&mut self, event: StreamEvent);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: ReplayError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Drain `stream` into `sink` until it ends, fails, stalls past
/// `idle_timeout`, or `cancel` fires.
pub async fn read_events<S>(
    mut stream: ByteStream,
    sink: &mut S,
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> ReadOutcome
where
    S: EventSink + ?Sized,
{
    let mut decoder = EventDecoder::new();

    loop {
        let next = stream.next().or_cancel_within(cancel, idle_timeout).await;
        let chunk = match next {
            Err(CancelErr::Cancelled) => return ReadOutcome::Cancelled,
            Err(CancelErr::DeadlineElapsed(limit)) => {
                tracing::warn!(?limit, "event stream stalled");
                sink.on_error(ReplayError::Timeout(limit));
                return ReadOutcome::Failed;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                sink.on_error(e);
                return ReadOutcome::Failed;
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        for event in decoder.push(&chunk) {
            if cancel.is_cancelled() {
                return ReadOutcome::Cancelled;
            }
            tracing::trace!(kind = event.kind(), "stream event");
            sink.on_event(event);
        }
    }

    if decoder.has_pending() {
        tracing::debug!("stream ended mid-event, flushing the remainder");
    }
    for event in decoder.finish() {
        if cancel.is_cancelled() {
            return ReadOutcome::Cancelled;
        }
        sink.on_event(event);
    }
    sink.on_complete();
    ReadOutcome::Completed
}

/// Pull-based view over a byte stream: a `Stream` of decoded events.
///
/// A transport failure is yielded as the final `Err` item. Dropping the
/// `EventStream` stops the background reader.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Result<StreamEvent, ReplayError>>,
    cancel: CancellationToken,
}

impl EventStream {
    pub fn spawn(stream: ByteStream, idle_timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut sink = ChannelSink { tx };
            read_events(stream, &mut sink, &reader_cancel, idle_timeout).await;
        });

        Self { rx, cancel }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, ReplayError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<Result<StreamEvent, ReplayError>>,
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: StreamEvent) {
        if self.tx.send(Ok(event)).is_err() {
            tracing::debug!("event stream consumer dropped");
        }
    }

    fn on_complete(&mut self) {}

    fn on_error(&mut self, error: ReplayError) {
        let _ = self.tx.send(Err(error));
    }
}
