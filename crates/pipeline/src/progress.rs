//! Client-side view of a statement's progress.
//!
//! Updates arrive from two places: the best-effort push channel and periodic
//! polling of the store. [`ProgressTracker`] folds both into one state that
//! only ever moves forward, and [`StatusPoller`] drives it until the statement
//! is terminal or a deadline passes.

use kesef_core::{Statement, StatementId, StatementStatus};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::notify::StatusUpdate;
use crate::traits::StatementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ProgressStatus {
    /// Completed and failed share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            ProgressStatus::Uploading => 0,
            ProgressStatus::Processing => 1,
            ProgressStatus::Completed | ProgressStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl From<StatementStatus> for ProgressStatus {
    fn from(status: StatementStatus) -> Self {
        match status {
            StatementStatus::Processing => ProgressStatus::Processing,
            StatementStatus::Completed => ProgressStatus::Completed,
            StatementStatus::Failed => ProgressStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    UploadStarted,
    FileStored,
    StatementRegistered,
    ProcessingInvoked,
    Finished,
}

impl Milestone {
    pub fn percent(self) -> u8 {
        match self {
            Milestone::UploadStarted => 0,
            Milestone::FileStored => 30,
            Milestone::StatementRegistered => 50,
            Milestone::ProcessingInvoked => 70,
            Milestone::Finished => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub percent: u8,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn milestone(milestone: Milestone) -> Self {
        let status = match milestone {
            Milestone::UploadStarted | Milestone::FileStored => ProgressStatus::Uploading,
            Milestone::StatementRegistered | Milestone::ProcessingInvoked => ProgressStatus::Processing,
            Milestone::Finished => ProgressStatus::Completed,
        };
        Self {
            status,
            percent: milestone.percent(),
            message: None,
        }
    }

    fn from_status(status: StatementStatus, message: Option<String>) -> Self {
        let status = ProgressStatus::from(status);
        let percent = if status.is_terminal() {
            Milestone::Finished.percent()
        } else {
            Milestone::ProcessingInvoked.percent()
        };
        Self {
            status,
            percent,
            message,
        }
    }
}

impl From<&Statement> for ProgressUpdate {
    fn from(statement: &Statement) -> Self {
        Self::from_status(statement.status, statement.error_message.clone())
    }
}

impl From<StatusUpdate> for ProgressUpdate {
    fn from(update: StatusUpdate) -> Self {
        Self::from_status(update.status, update.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub status: ProgressStatus,
    pub percent: u8,
    /// Set only for a terminal failure.
    pub error: Option<String>,
}

/// Reducer over progress updates from any source.
///
/// A lower-ranked status never overwrites a higher one, percent never
/// decreases, and a terminal state is frozen.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: ProgressState {
                status: ProgressStatus::Uploading,
                percent: 0,
                error: None,
            },
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    /// Returns whether the state changed.
    pub fn apply(&mut self, update: ProgressUpdate) -> bool {
        if self.is_terminal() || update.status.rank() < self.state.status.rank() {
            return false;
        }
        let before = self.state.clone();
        self.state.status = update.status;
        self.state.percent = self.state.percent.max(update.percent.min(100));
        if update.status == ProgressStatus::Failed {
            self.state.error = update.message;
        }
        if self.state.status.is_terminal() {
            self.state.percent = 100;
        }
        self.state != before
    }
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Statement {0} not found")]
    NotFound(StatementId),
    #[error("Statement {statement_id} still not finished after {}s", .waited.as_secs())]
    Stuck {
        statement_id: StatementId,
        waited: Duration,
    },
}

/// Waits for a statement to reach a terminal status. Polling is always on;
/// the push channel only makes the answer arrive sooner.
pub struct StatusPoller<'a, S> {
    store: &'a S,
    interval: Duration,
    deadline: Duration,
    push: Option<broadcast::Receiver<StatusUpdate>>,
}

impl<'a, S: StatementStore> StatusPoller<'a, S> {
    pub fn new(store: &'a S, interval: Duration, deadline: Duration) -> Self {
        Self {
            store,
            interval,
            deadline,
            push: None,
        }
    }

    pub fn with_push(mut self, receiver: broadcast::Receiver<StatusUpdate>) -> Self {
        self.push = Some(receiver);
        self
    }

    pub async fn wait_for_terminal(
        &mut self,
        statement_id: StatementId,
        tracker: &mut ProgressTracker,
    ) -> Result<ProgressState, ProgressError> {
        let waited = self.deadline;
        let deadline = Instant::now() + waited;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let store = self.store;
        let push = &mut self.push;

        while !tracker.is_terminal() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(%statement_id, "gave up waiting for statement");
                    return Err(ProgressError::Stuck {
                        statement_id,
                        waited,
                    });
                }
                _ = ticker.tick() => {
                    match store.get_statement(statement_id).await {
                        Ok(Some(statement)) => {
                            tracker.apply(ProgressUpdate::from(&statement));
                        }
                        Ok(None) => return Err(ProgressError::NotFound(statement_id)),
                        Err(e) => tracing::warn!(%statement_id, error = %e, "status poll failed"),
                    }
                }
                update = next_push(push) => {
                    if let Some(update) = update.filter(|u| u.statement_id == statement_id) {
                        tracker.apply(ProgressUpdate::from(update));
                    }
                }
            }
        }

        Ok(tracker.state().clone())
    }
}

/// Next pushed update; never resolves when there is no channel. A closed
/// channel is dropped so polling carries on alone.
async fn next_push(push: &mut Option<broadcast::Receiver<StatusUpdate>>) -> Option<StatusUpdate> {
    let Some(receiver) = push.as_mut() else {
        return std::future::pending().await;
    };
    match receiver.recv().await {
        Ok(update) => Some(update),
        Err(broadcast::error::RecvError::Lagged(missed)) => {
            tracing::debug!(missed, "status push lagged");
            None
        }
        Err(broadcast::error::RecvError::Closed) => {
            *push = None;
            None
        }
    }
}
