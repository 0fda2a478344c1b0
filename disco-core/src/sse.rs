//! Server-Sent Events wire format: byte chunks to lines, lines to frames.
//!
//! Format handled:
//! - `event: <type>` sets the frame's event type
//! - `data: <payload>` appends a payload line (several are joined with `\n`)
//! - `id: <id>` sets the last event id, which persists across frames
//! - `retry: <ms>` asks the client to change its reconnect delay
//! - lines starting with `:` are comments
//! - an empty line ends the frame

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;

use crate::transport::TransportError;

/// One complete frame as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `None` when the server sent no `event:` line (SSE's default `message`).
    pub event: Option<String>,
    pub data: String,
    /// Last event id seen on this stream, including from earlier frames.
    pub id: Option<String>,
}

/// Line-oriented frame assembler. Feed it lines without the trailing newline.
#[derive(Debug, Default)]
pub struct FrameParser {
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a frame when `line` is the blank line closing one.
    ///
    /// A frame is emitted if it carried data or an event type; a bare `event: end`
    /// with no `data:` line still terminates a stream.
    pub fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    };
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => {}
        }
        None
    }

    /// Reconnect delay requested by the server since the last call, in ms.
    pub fn take_retry(&mut self) -> Option<u64> {
        self.retry.take()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Drop a partially received frame. The last event id is kept.
    pub fn discard_pending(&mut self) {
        self.event = None;
        self.data.clear();
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            data,
            id: self.last_event_id.clone(),
        })
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Internal line splitter over a bytes stream; yields lines separated by '\n'
/// with any trailing '\r' removed.
///
/// Bytes are buffered raw and decoded one complete line at a time, so a UTF-8
/// sequence split across chunks survives intact.
pub(crate) struct LineStream {
    inner: ByteStream,
    buf: Vec<u8>,
    flushed_tail: bool,
}

impl LineStream {
    pub(crate) fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            flushed_tail: false,
        }
    }
}

fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

impl Stream for LineStream {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
                let mut raw: Vec<u8> = self.buf.drain(..=idx).collect();
                raw.pop();
                return Poll::Ready(Some(Ok(decode_line(raw))));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(TransportError::Body(e.to_string()))));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let raw = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(decode_line(raw))));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
