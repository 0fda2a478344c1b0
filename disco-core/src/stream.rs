//! Authenticated event-stream sessions.
//!
//! Contract:
//! - `output` and `stats` frames are handed to the consumer verbatim, in arrival order.
//! - An `end` frame or an explicit `close()` are the only ways a session finishes.
//! - The transport is closed before the session future resolves, and no consumer
//!   callback runs after that.
//! - Transport errors go to [`StreamConsumer::on_error`] and never end the session;
//!   the transport decides whether and when to reconnect.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use http::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::auth::ApiKey;
use crate::config::ClientCfg;
use crate::error::{CoreResult, DiscoError};
use crate::http_client::{HttpClient, auth_header_value};
use crate::sse::SseFrame;
use crate::telemetry::SPAN_STREAM_SESSION;
use crate::transport::{
    HeaderProvider, SseTransport, Transport, TransportError, TransportEvent, TransportHandle,
};

const MIME_EVENT_STREAM: &str = "text/event-stream";

/// The frame types this client reacts to. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Application output, e.g. a log line.
    Output,
    /// Periodic metrics.
    Stats,
    /// The server is done; the session closes.
    End,
}

impl FrameKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "output" => Some(Self::Output),
            "stats" => Some(Self::Stats),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Stats => "stats",
            Self::End => "end",
        }
    }
}

/// A dispatched frame. `data` is left undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub kind: FrameKind,
    pub data: String,
    pub last_event_id: Option<String>,
}

impl MessageEvent {
    /// Decode `data` as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Callbacks for one session. They run on the session's task, one at a time.
///
/// Default methods ignore the event, so a consumer only implements what it
/// cares about. Panics are not caught.
pub trait StreamConsumer: Send + 'static {
    fn on_output(&mut self, _event: MessageEvent) {}

    fn on_stats(&mut self, _event: MessageEvent) {}

    /// Raw transport error. The session keeps going.
    fn on_error(&mut self, _error: &TransportError) {}
}

/// Routes `output` and `stats` to one closure; errors are only logged.
pub struct OnMessage<F>(pub F);

impl<F> StreamConsumer for OnMessage<F>
where
    F: FnMut(MessageEvent) + Send + 'static,
{
    fn on_output(&mut self, event: MessageEvent) {
        (self.0)(event)
    }

    fn on_stats(&mut self, event: MessageEvent) {
        (self.0)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct SessionShared {
    state: AtomicU8,
    wake: Notify,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
            wake: Notify::new(),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// One-shot: true only for the caller that moved the session into `Closing`.
    /// Works from either live state, even while the driver flips between them.
    fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok()
    }

    fn finish_close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    fn request_close(&self) {
        if self.begin_close() {
            self.wake.notify_one();
        }
    }
}

/// Opens authenticated event streams over a [`Transport`].
#[derive(Clone)]
pub struct EventStreamClient<T: Transport = SseTransport> {
    transport: Arc<T>,
}

impl EventStreamClient<SseTransport> {
    pub fn from_cfg(cfg: &ClientCfg) -> CoreResult<Self> {
        let http = HttpClient::streaming(&cfg.http)?;
        Ok(Self::new(SseTransport::new(http, &cfg.stream)))
    }
}

impl<T: Transport> EventStreamClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Connect to `url` and start dispatching to `consumer`.
    ///
    /// Must be called inside a tokio runtime. The returned session resolves on
    /// the first `end` frame or `close()`, whichever comes first.
    pub fn open<C: StreamConsumer>(
        &self,
        url: &str,
        api_key: &ApiKey,
        consumer: C,
    ) -> CoreResult<StreamSession> {
        reqwest::Url::parse(url)
            .map_err(|e| DiscoError::Validation(format!("invalid stream url '{url}': {e}")))?;
        // the provider below relies on this succeeding
        auth_header_value(api_key)?;

        let handle = self.transport.connect(url, stream_headers(api_key.clone()));
        let shared = Arc::new(SessionShared::new());
        let span = tracing::info_span!(SPAN_STREAM_SESSION, stream.url = %url);
        let driver = tokio::spawn(drive(handle, consumer, shared.clone()).instrument(span));
        Ok(StreamSession { shared, driver })
    }
}

fn stream_headers(api_key: ApiKey) -> HeaderProvider {
    Arc::new(move || {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MIME_EVENT_STREAM));
        if let Ok(value) = auth_header_value(&api_key) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    })
}

async fn drive<C: StreamConsumer>(
    mut handle: Box<dyn TransportHandle>,
    mut consumer: C,
    shared: Arc<SessionShared>,
) {
    let mut exhausted = false;
    loop {
        if shared.state() == SessionState::Closing {
            break;
        }
        let event = tokio::select! {
            biased;
            _ = shared.wake.notified() => continue,
            event = handle.next_event(), if !exhausted => event,
        };

        match event {
            None => {
                // no end frame and no more events; only close() can finish now
                tracing::debug!("transport stopped");
                exhausted = true;
            }
            Some(TransportEvent::Open) => {
                shared.transition(SessionState::Connecting, SessionState::Open);
                tracing::debug!("stream open");
            }
            Some(TransportEvent::Error(err)) => {
                shared.transition(SessionState::Open, SessionState::Connecting);
                tracing::warn!(error.message = %err, "stream transport error");
                consumer.on_error(&err);
            }
            Some(TransportEvent::Frame(frame)) => {
                if dispatch(frame, &mut consumer) {
                    shared.begin_close();
                    break;
                }
            }
        }
    }

    handle.close();
    shared.finish_close();
    tracing::debug!("stream closed");
}

/// Returns true for the terminating frame.
fn dispatch<C: StreamConsumer>(frame: SseFrame, consumer: &mut C) -> bool {
    let Some(kind) = frame.event.as_deref().and_then(FrameKind::from_event_name) else {
        tracing::trace!(stream.event = ?frame.event, "dropping unrecognized frame");
        return false;
    };
    tracing::debug!(stream.event = kind.as_str(), "frame");

    let event = MessageEvent {
        kind,
        data: frame.data,
        last_event_id: frame.id,
    };
    match kind {
        FrameKind::Output => consumer.on_output(event),
        FrameKind::Stats => consumer.on_stats(event),
        FrameKind::End => return true,
    }
    false
}

/// One open stream. Await it to wait for the end of the stream.
///
/// Resolves exactly once, after the transport has been closed. Dropping the
/// session without awaiting it closes it as well; the transport is released on
/// the session task shortly after.
///
/// If the runtime shuts down under a live session, the session task is
/// cancelled and the future resolves without an `end` frame or `close()`.
#[derive(Debug)]
pub struct StreamSession {
    shared: Arc<SessionShared>,
    driver: JoinHandle<()>,
}

impl StreamSession {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Finish the session without waiting for `end`. Idempotent.
    pub fn close(&self) {
        self.shared.request_close();
    }

    /// A handle that can close this session from elsewhere, e.g. from inside a callback.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            shared: self.shared.clone(),
        }
    }
}

impl Future for StreamSession {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.driver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // a consumer callback panicked; hand the panic to whoever awaits
            Poll::Ready(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(()),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // no-op once the session has finished
        self.shared.request_close();
    }
}

#[derive(Debug, Clone)]
pub struct SessionCloser {
    shared: Arc<SessionShared>,
}

impl SessionCloser {
    pub fn close(&self) {
        self.shared.request_close();
    }
}
