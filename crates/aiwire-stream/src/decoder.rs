//! Line-delimited event decoder.
//!
//! Turns a byte stream of `data: <payload>` lines into a lazy stream of
//! payload strings, stopping at the `[DONE]` sentinel.

use futures_util::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::trace;

/// Prefix of a line carrying a payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload marking a clean end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Classification of one line of the event protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// A payload, prefix already stripped.
    Payload(&'a str),
    /// The sentinel.
    Done,
    /// Blank lines, comments, other SSE fields and anything unrecognized.
    Ignored,
}

/// Classifies a single line (without its `\n`).
pub fn parse_line(line: &str) -> Line<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Ignored;
    };
    let payload = rest.strip_prefix(' ').unwrap_or(rest);
    match payload.trim() {
        DONE_SENTINEL => Line::Done,
        "" => Line::Ignored,
        _ => Line::Payload(payload),
    }
}

/// How a frame sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// The sentinel was observed.
    Sentinel,
    /// The source closed first. Payloads before the close are still valid,
    /// but the connection may have been severed.
    SourceClosed,
}

/// Lazy decoder over a byte stream.
///
/// Only reads from the source when polled and yields each payload as soon
/// as its line is complete. A source error is yielded once; the decoder is
/// finished afterwards.
#[derive(Debug)]
pub struct FrameDecoder<S> {
    source: S,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    source_done: bool,
    faulted: bool,
    end: Option<FrameEnd>,
}

impl<S> FrameDecoder<S> {
    /// Wraps a byte source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            scanned: 0,
            source_done: false,
            faulted: false,
            end: None,
        }
    }

    /// How the sequence ended, once it has.
    pub fn termination(&self) -> Option<FrameEnd> {
        self.end
    }

    /// True once the sentinel was seen.
    pub fn saw_sentinel(&self) -> bool {
        self.end == Some(FrameEnd::Sentinel)
    }

    /// True once no further items will be produced.
    pub fn is_finished(&self) -> bool {
        self.end.is_some() || self.faulted
    }

    fn next_buffered_line(&mut self) -> Option<String> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let pos = self.scanned + offset;
        self.scanned = 0;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    fn take_tail(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.scanned = 0;
        let tail = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}

impl<S, B, E> Stream for FrameDecoder<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<String, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.is_finished() {
                return Poll::Ready(None);
            }

            while let Some(line) = this.next_buffered_line() {
                match parse_line(&line) {
                    Line::Payload(payload) => return Poll::Ready(Some(Ok(payload.to_owned()))),
                    Line::Done => {
                        trace!("Sentinel received");
                        this.end = Some(FrameEnd::Sentinel);
                        this.buffer.clear();
                        this.scanned = 0;
                        return Poll::Ready(None);
                    }
                    Line::Ignored => {}
                }
            }

            if this.source_done {
                // Last line without a trailing newline.
                if let Some(tail) = this.take_tail() {
                    match parse_line(&tail) {
                        Line::Payload(payload) => return Poll::Ready(Some(Ok(payload.to_owned()))),
                        Line::Done => {
                            this.end = Some(FrameEnd::Sentinel);
                            return Poll::Ready(None);
                        }
                        Line::Ignored => {}
                    }
                }
                trace!("Source closed before sentinel");
                this.end = Some(FrameEnd::SourceClosed);
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.source).poll_next(cx)) {
                Some(Ok(chunk)) => this.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    this.faulted = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => this.source_done = true,
            }
        }
    }
}
