//! In-memory transport and recording consumer for session tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::header::HeaderMap;
use tokio::sync::mpsc;

use crate::sse::SseFrame;
use crate::stream::{MessageEvent, StreamConsumer};
use crate::transport::{HeaderProvider, Transport, TransportError, TransportEvent, TransportHandle};

#[derive(Default)]
struct FakeState {
    closed: AtomicBool,
    header_calls: AtomicUsize,
    provider: Mutex<Option<HeaderProvider>>,
}

impl FakeState {
    fn call_provider(&self) -> HeaderMap {
        let provider = self.provider.lock().unwrap().clone().expect("connected");
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        provider()
    }
}

/// Single-connection transport driven by a [`FakeRemote`].
pub struct FakeTransport {
    rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    state: Arc<FakeState>,
}

/// The "server" side of a [`FakeTransport`].
pub struct FakeRemote {
    tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeRemote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(FakeState::default());
        (
            Self {
                rx: Mutex::new(Some(rx)),
                state: state.clone(),
            },
            FakeRemote {
                tx: Mutex::new(Some(tx)),
                state,
            },
        )
    }
}

impl Transport for FakeTransport {
    fn connect(&self, _url: &str, headers: HeaderProvider) -> Box<dyn TransportHandle> {
        *self.state.provider.lock().unwrap() = Some(headers);
        self.state.call_provider();
        let rx = self.rx.lock().unwrap().take().expect("FakeTransport connects once");
        Box::new(FakeHandle {
            rx,
            state: self.state.clone(),
        })
    }
}

struct FakeHandle {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    state: Arc<FakeState>,
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl FakeRemote {
    /// Returns false once the client side has closed.
    pub fn push(&self, event: TransportEvent) -> bool {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn frame(&self, event: &str, data: &str) -> bool {
        self.push(TransportEvent::Frame(SseFrame {
            event: Some(event.to_string()),
            data: data.to_string(),
            id: None,
        }))
    }

    /// Simulate a transport-internal reconnect: ask for headers again.
    pub fn reconnect(&self) -> HeaderMap {
        self.state.call_provider()
    }

    /// The transport stops for good; `next_event` yields `None`.
    pub fn finish(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn header_calls(&self) -> usize {
        self.state.header_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Output(String),
    Stats(String),
    Error(TransportError),
}

/// Consumer that records every callback.
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> (Self, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, seen)
    }
}

impl StreamConsumer for Recorder {
    fn on_output(&mut self, event: MessageEvent) {
        self.seen.lock().unwrap().push(Seen::Output(event.data));
    }

    fn on_stats(&mut self, event: MessageEvent) {
        self.seen.lock().unwrap().push(Seen::Stats(event.data));
    }

    fn on_error(&mut self, error: &TransportError) {
        self.seen.lock().unwrap().push(Seen::Error(error.clone()));
    }
}
