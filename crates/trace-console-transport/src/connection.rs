//! Connection lifecycle: one link per port, torn down before the next opens.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use trace_console_core::TraceBuffer;

use crate::{
    config::ConnectionConfig,
    execution::{ExecuteError, ExecutionOutcome, PendingExecutions, RemoteExecutionChannel},
    protocol::{ConsoleLine, ExecutionId, InboundEvent, OutboundEvent},
    transport::{Connector, Endpoint, Transport},
};

/// Console event capacity before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 1024;

/// Connectivity of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    /// Link requested; waiting for the server's `connect`.
    Connecting,
    Connected,
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Target port, once one has been requested.
    pub port: Option<u16>,
    pub phase: ConnectionPhase,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Connected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            port: None,
            phase: ConnectionPhase::Disconnected,
        }
    }
}

/// Notification for console consumers. Trace records go to the
/// [`TraceBuffer`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// Console output from the remote process. Not stored.
    RemoteConsole(ConsoleLine),
    /// A remote execution reported back.
    ExecutionFinished(ExecutionOutcome),
    /// An execution request was refused locally.
    ExecutionRejected(ExecuteError),
}

pub(crate) enum LinkCommand {
    Execute { id: ExecutionId, code: String },
}

/// State shared between the manager, its link task and execution handles.
pub(crate) struct Shared {
    pub(crate) buffer: Arc<TraceBuffer>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) events: broadcast::Sender<ConsoleEvent>,
    /// Command channel of the current link.
    pub(crate) outbound: RwLock<Option<mpsc::UnboundedSender<LinkCommand>>>,
}

impl Shared {
    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<LinkCommand>>) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    pub(crate) fn outbound(&self) -> Option<mpsc::UnboundedSender<LinkCommand>> {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.state.send_if_modified(|state| {
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        });
    }

    pub(crate) fn publish(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }

    fn dispatch(&self, port: u16, event: InboundEvent, pending: &mut PendingExecutions) {
        match event {
            InboundEvent::Connect => {
                tracing::info!("Connected to debug server on port {port}");
                self.set_phase(ConnectionPhase::Connected);
            }
            InboundEvent::Disconnect { reason } => {
                tracing::info!("Disconnected from port {port}: {reason}");
                pending.clear();
                self.set_phase(ConnectionPhase::Disconnected);
            }
            InboundEvent::FnTrace(None) => {
                tracing::trace!("Ignoring empty fn-trace event");
            }
            InboundEvent::FnTrace(Some(record)) => {
                self.buffer.append(record.arrived());
            }
            InboundEvent::ConsoleLog(line) => {
                match line.level.as_str() {
                    "error" => tracing::error!(target: "remote", "{}", line.content),
                    "warn" => tracing::warn!(target: "remote", "{}", line.content),
                    "debug" => tracing::debug!(target: "remote", "{}", line.content),
                    _ => tracing::info!(target: "remote", "{}", line.content),
                }
                self.publish(ConsoleEvent::RemoteConsole(line));
            }
            InboundEvent::ExecuteResult(result) => {
                let outcome = pending.resolve(result);
                if outcome.success {
                    tracing::info!("Remote execution result: {}", outcome.result);
                } else {
                    tracing::error!("Remote execution failed: {}", outcome.result);
                }
                self.publish(ConsoleEvent::ExecutionFinished(outcome));
            }
            InboundEvent::Other { name } => {
                tracing::debug!("Ignoring unhandled event '{name}'");
            }
        }
    }
}

struct LinkHandle {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the session's transport.
///
/// [`ConnectionManager::connect`] closes the current link, if any, before
/// opening one for the new port, so at most one link is ever live. There is
/// no automatic reconnect: a dropped link stays down until the port changes.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    link: Option<LinkHandle>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager with a fresh trace buffer.
    #[must_use]
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self::with_buffer(connector, config, Arc::new(TraceBuffer::new()))
    }

    /// Create a manager that appends into an existing buffer.
    #[must_use]
    pub fn with_buffer(connector: C, config: ConnectionConfig, buffer: Arc<TraceBuffer>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector: Arc::new(connector),
            config,
            shared: Arc::new(Shared {
                buffer,
                state,
                events,
                outbound: RwLock::new(None),
            }),
            link: None,
        }
    }

    /// The trace buffer fed by this session.
    #[must_use]
    pub fn buffer(&self) -> Arc<TraceBuffer> {
        Arc::clone(&self.shared.buffer)
    }

    /// Empty the trace buffer.
    pub fn clear_logs(&self) {
        self.shared.buffer.clear();
    }

    /// Watch connectivity changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Port of the current link.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.link.as_ref().map(|link| link.port)
    }

    /// Get a receiver for console events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.shared.events.subscribe()
    }

    /// Handle for sending code to the remote side.
    #[must_use]
    pub fn execution_channel(&self) -> RemoteExecutionChannel {
        RemoteExecutionChannel::new(Arc::clone(&self.shared))
    }

    /// (Re)connect to `port`.
    ///
    /// Any existing link is closed and the session marked disconnected
    /// before the new link is opened in the background.
    pub async fn connect(&mut self, port: u16) {
        self.teardown().await;

        let endpoint = self.config.endpoint(port);
        tracing::info!("Connecting to {}", endpoint.url());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shared.set_outbound(Some(command_tx));
        self.shared.state.send_replace(ConnectionState {
            port: Some(port),
            phase: ConnectionPhase::Connecting,
        });

        let task = tokio::spawn(run_link(
            Arc::clone(&self.connector),
            endpoint,
            Arc::clone(&self.shared),
            command_rx,
            shutdown_rx,
        ));
        self.link = Some(LinkHandle {
            port,
            shutdown_tx,
            task,
        });
    }

    /// Close the current link, if any.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    /// Connect to the current port and reconnect whenever it changes.
    ///
    /// Returns after the sender side is dropped, with the link closed.
    pub async fn follow_port(&mut self, mut port: watch::Receiver<u16>) {
        let initial = *port.borrow_and_update();
        self.connect(initial).await;

        while port.changed().await.is_ok() {
            let next = *port.borrow_and_update();
            if self.port() == Some(next) {
                continue;
            }
            tracing::info!("Port changed to {next}, reconnecting");
            self.connect(next).await;
        }

        self.shutdown().await;
    }

    async fn teardown(&mut self) {
        self.shared.set_outbound(None);

        if let Some(mut link) = self.link.take() {
            let _ = link.shutdown_tx.send(());
            let grace = self.config.close_grace();
            if tokio::time::timeout(grace, &mut link.task).await.is_err() {
                tracing::warn!("Link on port {} did not close within {grace:?}, aborting", link.port);
                link.task.abort();
                let _ = link.task.await;
            }
        }

        self.shared.set_phase(ConnectionPhase::Disconnected);
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
        self.shared.set_outbound(None);
        self.shared.set_phase(ConnectionPhase::Disconnected);
    }
}

async fn run_link<C: Connector>(
    connector: Arc<C>,
    endpoint: Endpoint,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let port = endpoint.port;
    let opened = tokio::select! {
        opened = connector.open(&endpoint) => opened,
        _ = &mut shutdown => return,
    };
    let mut transport = match opened {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {e}", endpoint.url());
            shared.set_phase(ConnectionPhase::Disconnected);
            return;
        }
    };

    let mut pending = PendingExecutions::default();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = transport.next_event() => match event {
                Some(event) => shared.dispatch(port, event, &mut pending),
                None => break,
            },
            Some(command) = commands.recv() => match command {
                LinkCommand::Execute { id, code } => {
                    pending.insert(id);
                    if let Err(e) = transport.emit(OutboundEvent::ExecuteCode { id, code }).await {
                        tracing::error!("Failed to send execute-code: {e}");
                        pending.remove(id);
                    }
                }
            },
        }
    }

    if let Err(e) = transport.close().await {
        tracing::debug!("Error closing link on port {port}: {e}");
    }
    shared.set_phase(ConnectionPhase::Disconnected);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trace_console_core::{CallKind, TraceRecord};

    use super::*;
    use crate::fake::{FakeConnector, Journal, Remotes};

    fn manager() -> (ConnectionManager<FakeConnector>, Remotes) {
        let (connector, remotes) = FakeConnector::new();
        (ConnectionManager::new(connector, ConnectionConfig::default()), remotes)
    }

    async fn wait_connected(manager: &ConnectionManager<FakeConnector>) {
        let mut state = manager.state();
        state.wait_for(ConnectionState::is_connected).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_event_sets_connected() {
        let (mut manager, mut remotes) = manager();
        let mut state = manager.state();

        manager.connect(4000).await;
        assert_eq!(
            *state.borrow_and_update(),
            ConnectionState {
                port: Some(4000),
                phase: ConnectionPhase::Connecting
            }
        );

        let remote = remotes.recv().await.unwrap();
        assert_eq!(remote.port, 4000);
        remote.send(InboundEvent::Connect);
        wait_connected(&manager).await;
        assert!(manager.is_connected());

        remote.send(InboundEvent::Disconnect {
            reason: "io server disconnect".to_string(),
        });
        state
            .wait_for(|s| s.phase == ConnectionPhase::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fn_trace_appended_and_empty_ignored() {
        let (mut manager, mut remotes) = manager();
        let buffer = manager.buffer();
        let mut updates = buffer.subscribe();

        manager.connect(4000).await;
        let remote = remotes.recv().await.unwrap();
        remote.send(InboundEvent::FnTrace(None));
        let mut record = TraceRecord::new("svc.a", CallKind::Service);
        record.is_formatted = true;
        remote.send(InboundEvent::FnTrace(Some(record.clone())));
        remote.send(InboundEvent::FnTrace(Some(record)));
        remote.send(InboundEvent::FnTrace(Some(TraceRecord::new("fn.b", CallKind::Function))));

        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        let records = buffer.snapshot();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_formatted);
        assert_eq!(records[1].call_path.as_deref(), Some("fn.b"));
    }

    #[tokio::test]
    async fn test_port_change_closes_old_link_once() {
        let (mut manager, mut remotes) = manager();
        let buffer = manager.buffer();
        let mut updates = buffer.subscribe();

        manager.connect(4000).await;
        let first = remotes.recv().await.unwrap();
        first.send(InboundEvent::Connect);
        first.send(InboundEvent::FnTrace(Some(TraceRecord::new("a", CallKind::Function))));
        updates.recv().await.unwrap();

        manager.connect(5000).await;
        assert_eq!(first.closes(), 1);
        assert!(!manager.is_connected());

        // The old link is gone: nothing it sends can reach the buffer.
        assert!(!first.send(InboundEvent::FnTrace(Some(TraceRecord::new("stale", CallKind::Function)))));

        let second = remotes.recv().await.unwrap();
        assert_eq!(second.port, 5000);
        second.send(InboundEvent::Connect);
        second.send(InboundEvent::FnTrace(Some(TraceRecord::new("b", CallKind::Function))));
        updates.recv().await.unwrap();

        let paths: Vec<_> = buffer.snapshot().into_iter().filter_map(|r| r.call_path).collect();
        assert_eq!(paths, ["a", "b"]);
        assert_eq!(first.closes(), 1);
        assert_eq!(second.closes(), 0);
        assert_eq!(
            first.journal(),
            vec![Journal::Open(4000), Journal::Close(4000), Journal::Open(5000)]
        );
    }

    #[tokio::test]
    async fn test_follow_port() {
        let (manager, mut remotes) = manager();
        let mut state = manager.state();
        let (port_tx, port_rx) = watch::channel(4000);

        let session = tokio::spawn(async move {
            let mut manager = manager;
            manager.follow_port(port_rx).await;
            manager
        });

        let first = remotes.recv().await.unwrap();
        assert_eq!(first.port, 4000);

        port_tx.send(4001).unwrap();
        let second = remotes.recv().await.unwrap();
        assert_eq!(second.port, 4001);
        assert_eq!(first.closes(), 1);

        second.send(InboundEvent::Connect);
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        drop(port_tx);
        let manager = session.await.unwrap();
        assert_eq!(second.closes(), 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_failed_open_leaves_disconnected() {
        let (connector, _remotes) = FakeConnector::new();
        connector.fail_next_open();
        let mut manager = ConnectionManager::new(connector, ConnectionConfig::default());
        let mut state = manager.state();

        manager.connect(4000).await;
        state
            .wait_for(|s| s.phase == ConnectionPhase::Disconnected)
            .await
            .unwrap();
        assert_eq!(state.borrow().port, Some(4000));
    }

    #[tokio::test]
    async fn test_console_log_published_not_buffered() {
        let (mut manager, mut remotes) = manager();
        let mut events = manager.subscribe();

        manager.connect(4000).await;
        let remote = remotes.recv().await.unwrap();
        let line = ConsoleLine {
            level: "log".to_string(),
            content: "hello".to_string(),
            time: 1.0,
        };
        remote.send(InboundEvent::ConsoleLog(line.clone()));

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConsoleEvent::RemoteConsole(line));
        assert!(manager.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_link() {
        let (mut manager, mut remotes) = manager();
        manager.connect(4000).await;
        let remote = remotes.recv().await.unwrap();

        drop(manager);
        tokio::time::timeout(Duration::from_secs(1), remote.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_marks_session_disconnected() {
        let (mut manager, mut remotes) = manager();
        let state = manager.state();
        let channel = manager.execution_channel();

        manager.connect(4000).await;
        let remote = remotes.recv().await.unwrap();
        remote.send(InboundEvent::Connect);
        wait_connected(&manager).await;

        drop(manager);
        assert!(!state.borrow().is_connected());
        assert_eq!(
            channel.execute_remote_code("1 + 1"),
            Err(ExecuteError::NotConnected)
        );
    }
}
