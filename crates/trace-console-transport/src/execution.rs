//! Sending code to the remote process and collecting its results.

use std::{collections::HashSet, sync::Arc};

use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    connection::{ConsoleEvent, LinkCommand, Shared},
    protocol::{ExecutionId, ExecutionResult},
};

/// Reason an execution request was not sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    #[error("Not connected to the debug server")]
    NotConnected,
    #[error("Connection closed before the request completed")]
    LinkClosed,
}

/// Reported result of one remote execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Request this result belongs to, when it could be correlated.
    pub id: Option<ExecutionId>,
    pub success: bool,
    /// Result or error value, exactly as reported.
    pub result: Value,
}

/// Requests sent on the current link and not yet answered.
#[derive(Debug, Default)]
pub(crate) struct PendingExecutions {
    ids: HashSet<ExecutionId>,
}

impl PendingExecutions {
    pub(crate) fn insert(&mut self, id: ExecutionId) {
        self.ids.insert(id);
    }

    pub(crate) fn remove(&mut self, id: ExecutionId) {
        self.ids.remove(&id);
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
    }

    /// Match a result to its request.
    ///
    /// Results without an id are attributed to the only outstanding
    /// request, if there is exactly one.
    pub(crate) fn resolve(&mut self, result: ExecutionResult) -> ExecutionOutcome {
        let id = match result.id.as_deref().map(Uuid::parse_str) {
            Some(Ok(id)) => self.ids.remove(&id).then_some(id),
            Some(Err(e)) => {
                tracing::debug!("Unparseable execution id: {e}");
                None
            }
            None if self.ids.len() == 1 => self.ids.drain().next(),
            None => None,
        };
        if id.is_none() {
            tracing::debug!(outstanding = self.ids.len(), "Uncorrelated execution result");
        }
        ExecutionOutcome {
            id,
            success: result.success,
            result: result.result,
        }
    }
}

/// Handle for running code on the remote side.
///
/// Cheap to clone. Requests always go to the session's current link.
#[derive(Clone)]
pub struct RemoteExecutionChannel {
    shared: Arc<Shared>,
}

impl RemoteExecutionChannel {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Send `code` for remote execution.
    ///
    /// The result arrives later as [`ConsoleEvent::ExecutionFinished`].
    ///
    /// # Errors
    /// Returns error without sending anything if the session is not
    /// connected. The refusal is also published once as
    /// [`ConsoleEvent::ExecutionRejected`].
    pub fn execute_remote_code(&self, code: impl Into<String>) -> Result<ExecutionId, ExecuteError> {
        if !self.shared.state.borrow().is_connected() {
            return Err(self.reject(ExecuteError::NotConnected));
        }
        let Some(outbound) = self.shared.outbound() else {
            return Err(self.reject(ExecuteError::NotConnected));
        };

        let id = Uuid::new_v4();
        if outbound
            .send(LinkCommand::Execute {
                id,
                code: code.into(),
            })
            .is_err()
        {
            return Err(self.reject(ExecuteError::LinkClosed));
        }
        tracing::debug!(%id, "Queued remote execution");
        Ok(id)
    }

    /// Send `code` and wait for its correlated result.
    ///
    /// # Errors
    /// Returns error if the request could not be sent, or the link went
    /// down before the result arrived.
    pub async fn execute_and_wait(
        &self,
        code: impl Into<String>,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let mut events = self.shared.events.subscribe();
        let mut state = self.shared.state.subscribe();
        let id = self.execute_remote_code(code)?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ConsoleEvent::ExecutionFinished(outcome)) if outcome.id == Some(id) => {
                        return Ok(outcome);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {skipped} console events while waiting for {id}");
                    }
                    Err(RecvError::Closed) => return Err(ExecuteError::LinkClosed),
                },
                _ = state.wait_for(|s| !s.is_connected()) => {
                    return Err(ExecuteError::LinkClosed);
                }
            }
        }
    }

    /// Stream of execution results from now on.
    pub fn results(&self) -> impl Stream<Item = ExecutionOutcome> + Send + 'static {
        BroadcastStream::new(self.shared.events.subscribe()).filter_map(|event| async move {
            match event {
                Ok(ConsoleEvent::ExecutionFinished(outcome)) => Some(outcome),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Execution result stream lagged: {e}");
                    None
                }
            }
        })
    }

    fn reject(&self, error: ExecuteError) -> ExecuteError {
        tracing::error!("Cannot execute remote code: {error}");
        self.shared.publish(ConsoleEvent::ExecutionRejected(error.clone()));
        error
    }
}
