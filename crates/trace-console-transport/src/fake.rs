//! In-memory connector for exercising the connection lifecycle.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    protocol::{InboundEvent, OutboundEvent},
    transport::{Connector, Endpoint, Transport, TransportError},
};

pub(crate) type Remotes = mpsc::UnboundedReceiver<FakeRemote>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Journal {
    Open(u16),
    Close(u16),
}

type SharedJournal = Arc<Mutex<Vec<Journal>>>;

pub(crate) struct FakeConnector {
    remotes: mpsc::UnboundedSender<FakeRemote>,
    journal: SharedJournal,
    fail_next: AtomicBool,
}

impl FakeConnector {
    /// Every opened link is announced on the returned receiver.
    pub(crate) fn new() -> (Self, Remotes) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes,
                journal: SharedJournal::default(),
                fail_next: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn open(&self, endpoint: &Endpoint) -> Result<FakeTransport, TransportError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Handshake("connection refused".to_string()));
        }

        let port = endpoint.port;
        self.journal.lock().unwrap().push(Journal::Open(port));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (emitted_tx, emitted_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));

        let _ = self.remotes.send(FakeRemote {
            port,
            events: events_tx,
            emitted: emitted_rx,
            closes: Arc::clone(&closes),
            journal: Arc::clone(&self.journal),
        });

        Ok(FakeTransport {
            port,
            events: events_rx,
            emitted: emitted_tx,
            closes,
            journal: Arc::clone(&self.journal),
        })
    }
}

pub(crate) struct FakeTransport {
    port: u16,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    emitted: mpsc::UnboundedSender<OutboundEvent>,
    closes: Arc<AtomicUsize>,
    journal: SharedJournal,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    async fn emit(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        self.emitted.send(event).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push(Journal::Close(self.port));
        Ok(())
    }
}

/// Server side of one fake link.
pub(crate) struct FakeRemote {
    pub(crate) port: u16,
    events: mpsc::UnboundedSender<InboundEvent>,
    emitted: mpsc::UnboundedReceiver<OutboundEvent>,
    closes: Arc<AtomicUsize>,
    journal: SharedJournal,
}

impl FakeRemote {
    /// Deliver an event. Returns false once the link is gone.
    pub(crate) fn send(&self, event: InboundEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub(crate) async fn next_emitted(&mut self) -> Option<OutboundEvent> {
        self.emitted.recv().await
    }

    pub(crate) fn try_emitted(&mut self) -> Option<OutboundEvent> {
        self.emitted.try_recv().ok()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn journal(&self) -> Vec<Journal> {
        self.journal.lock().unwrap().clone()
    }

    /// Resolves when the client side of the link has been dropped.
    pub(crate) async fn closed(&self) {
        self.events.closed().await;
    }
}
