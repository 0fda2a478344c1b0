//! Long-lived push connections.
//!
//! A [`Transport`] opens a connection and keeps it alive on its own: when the
//! connection drops it reports a [`TransportError`] and reconnects. Every
//! connect attempt asks the [`HeaderProvider`] for fresh headers, so
//! credentials survive reconnects without the caller doing anything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::StreamCfg;
use crate::http_client::HttpClient;
use crate::sse::{FrameParser, LineStream, SseFrame};

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");
const EVENT_BUFFER: usize = 64;
/// Floor for a server-sent `retry:` so a misbehaving server cannot make us spin.
const MIN_SERVER_RETRY: Duration = Duration::from_millis(100);

/// Produces the headers for one connect attempt. Called again on every reconnect.
pub type HeaderProvider = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

/// Connection-level failures. None of these end a stream session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("stream body error: {0}")]
    Body(String),

    #[error("connection closed by server")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect attempt succeeded; frames follow.
    Open,
    Frame(SseFrame),
    Error(TransportError),
}

pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`. Returns immediately; progress arrives as events.
    fn connect(&self, url: &str, headers: HeaderProvider) -> Box<dyn TransportHandle>;
}

/// Exclusive handle to one connection and its reconnects.
#[async_trait]
pub trait TransportHandle: Send {
    /// Next event in delivery order. `None` once the transport has stopped for good.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Tear down the connection and stop reconnecting. Idempotent.
    fn close(&mut self);
}

/// SSE over reqwest with fixed-delay reconnects.
///
/// Reconnects after network errors, non-2xx statuses and clean EOF. A server
/// `retry:` field replaces the delay (never below 100 ms). HTTP 204 stops the
/// transport.
#[derive(Debug, Clone)]
pub struct SseTransport {
    http: HttpClient,
    reconnect_delay: Duration,
}

impl SseTransport {
    pub fn new(http: HttpClient, cfg: &StreamCfg) -> Self {
        Self {
            http,
            reconnect_delay: cfg.reconnect_delay(),
        }
    }
}

impl Transport for SseTransport {
    fn connect(&self, url: &str, headers: HeaderProvider) -> Box<dyn TransportHandle> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let driver = Reconnector {
            http: self.http.clone(),
            url: url.to_string(),
            headers,
            delay: self.reconnect_delay,
            tx,
        };
        let task = tokio::spawn(driver.run().in_current_span());
        Box::new(SseHandle {
            rx,
            task: Some(task),
        })
    }
}

struct SseHandle {
    rx: mpsc::Receiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportHandle for SseHandle {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct Reconnector {
    http: HttpClient,
    url: String,
    headers: HeaderProvider,
    delay: Duration,
    tx: mpsc::Sender<TransportEvent>,
}

impl Reconnector {
    async fn run(mut self) {
        let mut parser = FrameParser::new();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            tracing::debug!(stream.attempt = attempt, "connecting");
            match self.connect_once(&mut parser).await {
                Ok(Some(err)) => {
                    if !self.emit(TransportEvent::Error(err)).await {
                        return;
                    }
                }
                Ok(None) => return,
                Err(Stop) => return,
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    /// One connection's lifetime. `Ok(Some(err))` means reconnect after reporting
    /// `err`; `Ok(None)` and `Err(Stop)` both stop the transport.
    async fn connect_once(&mut self, parser: &mut FrameParser) -> Result<Option<TransportError>, Stop> {
        let mut req_headers = HeaderMap::new();
        if let Some(id) = parser.last_event_id()
            && let Ok(value) = HeaderValue::from_str(id)
        {
            req_headers.insert(LAST_EVENT_ID, value);
        }
        // provider headers win over ours
        for (name, value) in (self.headers)().iter() {
            req_headers.insert(name.clone(), value.clone());
        }

        let resp = match self.http.inner().get(&self.url).headers(req_headers).send().await {
            Ok(resp) => resp,
            Err(e) => return Ok(Some(TransportError::Connect(e.to_string()))),
        };

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            self.emit(TransportEvent::Error(TransportError::Status(status.as_u16())))
                .await;
            return Ok(None);
        }
        if !status.is_success() {
            return Ok(Some(TransportError::Status(status.as_u16())));
        }

        if !self.emit(TransportEvent::Open).await {
            return Err(Stop);
        }

        parser.discard_pending();
        let mut lines = LineStream::new(Box::pin(resp.bytes_stream()));
        while let Some(item) = lines.next().await {
            let line = match item {
                Ok(line) => line,
                Err(e) => return Ok(Some(e)),
            };
            if let Some(frame) = parser.feed_line(&line)
                && !self.emit(TransportEvent::Frame(frame)).await
            {
                return Err(Stop);
            }
            if let Some(ms) = parser.take_retry() {
                self.delay = Duration::from_millis(ms).max(MIN_SERVER_RETRY);
            }
        }
        Ok(Some(TransportError::Disconnected))
    }

    /// False once the receiving side is gone.
    async fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// The receiving side went away.
struct Stop;
