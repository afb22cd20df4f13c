//! Server-Sent Events (SSE) parsing.
//!
//! [`SseParser`] turns text into events according to the W3C EventSource
//! framing; [`SseStream`] drives it from an HTTP response body.

use bytes::Bytes;
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// The effective event type; untyped events are `message` events.
    pub fn kind(&self) -> &str {
        self.event_type.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE parser that processes text into events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    // Last chunk ended in `\r`; a leading `\n` in the next one is the same line break
    pending_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        let chunk = if std::mem::take(&mut self.pending_cr) {
            chunk.strip_prefix('\n').unwrap_or(chunk)
        } else {
            chunk
        };

        if chunk.contains('\r') {
            let normalized = chunk.replace("\r\n", "\n");
            self.pending_cr = normalized.ends_with('\r');
            self.buffer.push_str(&normalized.replace('\r', "\n"));
        } else {
            self.buffer.push_str(chunk);
        }
        let mut events = Vec::new();

        // Event blocks are separated by a blank line
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            }
        }

        events
    }

    /// Parse a single SSE block (lines between blank lines) into an event.
    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut id = None;
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => data_lines.push(value.to_string()),
                "id" => id = Some(value.to_string()),
                _ => {} // retry and unknown fields
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
            id,
        })
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pin_project! {
    /// An async stream of [`SseEvent`]s read from an HTTP response body.
    pub struct SseStream {
        #[pin]
        inner: ByteStream,
        parser: SseParser,
        ready: VecDeque<SseEvent>,
        // Trailing bytes of a UTF-8 sequence split across chunks
        partial: Vec<u8>,
    }
}

impl SseStream {
    /// Create an SSE stream from a reqwest byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            ready: VecDeque::new(),
            partial: Vec::new(),
        }
    }

    /// Create an SSE stream from a response whose body is an event stream.
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream())
    }
}

impl Stream for SseStream {
    type Item = Result<SseEvent, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.partial.extend_from_slice(&bytes);
                    let valid = match std::str::from_utf8(this.partial) {
                        Ok(_) => this.partial.len(),
                        Err(e) if e.error_len().is_none() => e.valid_up_to(),
                        // Invalid bytes rather than a split sequence: decode lossily
                        Err(_) => this.partial.len(),
                    };
                    let rest = this.partial.split_off(valid);
                    let text = String::from_utf8_lossy(this.partial).into_owned();
                    *this.partial = rest;
                    this.ready.extend(this.parser.feed(&text));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
