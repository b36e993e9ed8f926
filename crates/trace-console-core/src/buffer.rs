//! Ordered, deduplicating trace record store with live updates.

use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{RecordFilter, TraceRecord};

/// Live update capacity before slow subscribers start lagging.
const LIVE_CAPACITY: usize = 10_000;

/// Change notification published by [`TraceBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    /// A record was accepted and appended at `position`.
    Appended { position: usize, record: TraceRecord },
    /// The buffer was emptied.
    Cleared,
    /// The display flag of the record at `position` changed.
    FormattedChanged { position: usize, formatted: bool },
}

#[derive(Default)]
struct Inner {
    records: Vec<TraceRecord>,
    /// Call paths of every record present, whatever its kind.
    call_paths: HashSet<String>,
}

/// Append-only trace store.
///
/// Records keep arrival order. A service record is dropped on insert when a
/// record of any kind with the same call path is already present. Every
/// other kind is kept as-is. The only
/// removal is [`TraceBuffer::clear`].
pub struct TraceBuffer {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<BufferEvent>,
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record, applying the service dedup rule.
    ///
    /// Returns `false` when the record was suppressed as a duplicate.
    pub fn append(&self, record: TraceRecord) -> bool {
        let mut inner = self.write();

        if let Some(path) = &record.call_path {
            let seen = !inner.call_paths.insert(path.clone());
            if seen && record.is_service() {
                tracing::trace!(call_path = %path, "Dropping duplicate service record");
                return false;
            }
        }

        let position = inner.records.len();
        inner.records.push(record.clone());
        // Publish while still holding the lock so subscribers observe the
        // same order as the history.
        let _ = self.sender.send(BufferEvent::Appended { position, record });
        true
    }

    /// Remove every record.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.records.clear();
        inner.call_paths.clear();
        let _ = self.sender.send(BufferEvent::Cleared);
    }

    /// Set the local display flag of the record at `position`.
    ///
    /// Order and content are untouched. Returns `false` when `position` is
    /// out of range.
    pub fn set_formatted(&self, position: usize, formatted: bool) -> bool {
        let mut inner = self.write();
        let Some(record) = inner.records.get_mut(position) else {
            return false;
        };
        if record.is_formatted != formatted {
            record.is_formatted = formatted;
            let _ = self.sender.send(BufferEvent::FormattedChanged {
                position,
                formatted,
            });
        }
        true
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Whether the buffer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Clone of the record at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<TraceRecord> {
        self.read().records.get(position).cloned()
    }

    /// Copy of all records in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceRecord> {
        self.read().records.clone()
    }

    /// Records accepted by `filter`, in arrival order, with their positions.
    #[must_use]
    pub fn filtered(&self, filter: &RecordFilter) -> Vec<(usize, TraceRecord)> {
        self.read()
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| filter.accepts(record))
            .map(|(position, record)| (position, record.clone()))
            .collect()
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.sender.subscribe()
    }

    /// Stream that yields the current records first, then live updates.
    ///
    /// History and subscription are taken under one lock, so no update is
    /// lost or repeated between them.
    #[must_use]
    pub fn snapshot_plus_stream(&self) -> futures::stream::BoxStream<'static, BufferEvent> {
        let (history, rx) = {
            let inner = self.read();
            (inner.records.clone(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(
            history
                .into_iter()
                .enumerate()
                .map(|(position, record)| BufferEvent::Appended { position, record }),
        );
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
