//! In-memory registry of task lifecycle state
//!
//! A task id lives in exactly one of pending, running, or finished. The
//! heartbeat stream adds tasks, the scheduler claims runnable ones and commits
//! outcomes, and the reporter drains finished ones. Two [`Notify`] signals
//! wake the blocking readers: one when a task becomes pending, one when a
//! task finishes.

use std::collections::HashMap;
use tokio::sync::{Mutex, Notify};

use crate::types::{CompletedTask, Task, TaskId, TaskOutcome};

/// Where a task currently sits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Received, not yet claimed by the scheduler
    Pending,
    /// Claimed by the scheduler
    Running,
    /// Outcome stored, awaiting report
    Finished,
}

/// Result of [`TaskStore::retriable_failure`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Task dropped locally and awaits redelivery; `attempt` is the failure count so far
    AwaitRedelivery {
        /// Number of retriable failures recorded for the task
        attempt: u32,
    },
    /// Retry ceiling exceeded; a `Failed` outcome was committed
    GaveUp,
}

/// Result of [`TaskStore::report_failed`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFailure {
    /// Outcome flipped to `Failed`; the report will be attempted once more
    MarkedFailed,
    /// Outcome was already `Failed`; the task was dropped
    Evicted,
    /// No finished record for the id
    Unknown,
}

#[derive(Default)]
struct StoreState {
    pending: HashMap<TaskId, Task>,
    running: HashMap<TaskId, Task>,
    finished: HashMap<TaskId, CompletedTask>,
    retries: HashMap<TaskId, u32>,
}

impl StoreState {
    fn knows(&self, id: &TaskId) -> bool {
        self.pending.contains_key(id) || self.running.contains_key(id) || self.finished.contains_key(id)
    }
}

/// Single source of truth for task existence and state
pub struct TaskStore {
    state: Mutex<StoreState>,
    task_added: Notify,
    task_finished: Notify,
    max_task_retries: u32,
}

impl TaskStore {
    /// Create an empty store
    ///
    /// `max_task_retries` is the number of retriable failures tolerated; the
    /// failure after that commits a terminal `Failed` outcome.
    pub fn new(max_task_retries: u32) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            task_added: Notify::new(),
            task_finished: Notify::new(),
            max_task_retries,
        }
    }

    /// Insert unknown tasks as pending
    ///
    /// Ids already pending, running, or finished are ignored so coordinator
    /// redelivery never resets state. Returns the ids that were inserted.
    pub async fn add_tasks(&self, tasks: impl IntoIterator<Item = Task>) -> Vec<TaskId> {
        let mut added = Vec::new();
        {
            let mut state = self.state.lock().await;
            for task in tasks {
                if state.knows(&task.id) {
                    tracing::debug!(task_id = %task.id, "Ignoring duplicate task delivery");
                    continue;
                }
                added.push(task.id.clone());
                state.pending.insert(task.id.clone(), task);
            }
        }

        if !added.is_empty() {
            self.task_added.notify_waiters();
        }
        added
    }

    /// Claim every pending task
    ///
    /// Waits until at least one task is pending, then moves all pending tasks
    /// to running and returns them. Never returns an empty map.
    pub async fn get_runnable_tasks(&self) -> HashMap<TaskId, Task> {
        loop {
            let notified = self.task_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if !state.pending.is_empty() {
                    let claimed: HashMap<TaskId, Task> = state.pending.drain().collect();
                    for (id, task) in &claimed {
                        state.running.insert(id.clone(), task.clone());
                    }
                    return claimed;
                }
            }

            notified.await;
        }
    }

    /// Store a terminal outcome
    ///
    /// Clears the retry counter and removes the id from running. Last write
    /// wins if called twice for the same id.
    pub async fn complete(&self, completed: CompletedTask) {
        {
            let mut state = self.state.lock().await;
            Self::complete_locked(&mut state, completed);
        }
        self.task_finished.notify_waiters();
    }

    fn complete_locked(state: &mut StoreState, completed: CompletedTask) {
        let id = completed.task_id.clone();
        state.retries.remove(&id);
        state.running.remove(&id);
        state.pending.remove(&id);
        state.finished.insert(id, completed);
    }

    /// Record a transient failure
    ///
    /// The task leaves running. Past the retry ceiling a `Failed` outcome is
    /// committed; otherwise the task is left untracked so a redelivery from
    /// the coordinator re-adds it as pending.
    pub async fn retriable_failure(&self, id: &TaskId) -> RetryDecision {
        let decision = {
            let mut state = self.state.lock().await;
            state.running.remove(id);

            let count = state.retries.entry(id.clone()).or_insert(0);
            *count += 1;
            let attempt = *count;

            if attempt > self.max_task_retries {
                tracing::warn!(
                    task_id = %id,
                    attempts = attempt,
                    "Task exceeded retry limit, failing permanently"
                );
                Self::complete_locked(&mut state, CompletedTask::failed(id.clone()));
                RetryDecision::GaveUp
            } else {
                tracing::debug!(task_id = %id, attempt, "Task awaiting redelivery");
                RetryDecision::AwaitRedelivery { attempt }
            }
        };

        match decision {
            RetryDecision::GaveUp => self.task_finished.notify_waiters(),
            RetryDecision::AwaitRedelivery { .. } => self.task_added.notify_waiters(),
        }
        decision
    }

    /// Drop a task after its report was accepted
    pub async fn mark_reported(&self, id: &TaskId) {
        let mut state = self.state.lock().await;
        if state.finished.remove(id).is_none() {
            tracing::warn!(task_id = %id, "mark_reported called for a task with no stored outcome");
        }
        state.retries.remove(id);
    }

    /// Handle a report rejected by ingestion
    ///
    /// A successful outcome is downgraded to `Failed` (outputs dropped) so the
    /// next drain reports the failure; an already `Failed` outcome is evicted.
    pub async fn report_failed(&self, id: &TaskId) -> ReportFailure {
        let mut state = self.state.lock().await;
        let Some(completed) = state.finished.get_mut(id) else {
            tracing::warn!(task_id = %id, "report_failed called for a task with no stored outcome");
            return ReportFailure::Unknown;
        };

        if completed.outcome == TaskOutcome::Failed {
            state.finished.remove(id);
            state.retries.remove(id);
            ReportFailure::Evicted
        } else {
            *completed = CompletedTask::failed(id.clone());
            ReportFailure::MarkedFailed
        }
    }

    /// Pending plus running tasks
    pub async fn num_pending_tasks(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.running.len()
    }

    /// Snapshot of every finished task
    ///
    /// Waits until at least one task has finished. Records stay in the store
    /// until [`mark_reported`](Self::mark_reported) or
    /// [`report_failed`](Self::report_failed) removes them.
    pub async fn task_outcomes(&self) -> Vec<CompletedTask> {
        loop {
            let notified = self.task_finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                if !state.finished.is_empty() {
                    return state.finished.values().cloned().collect();
                }
            }

            notified.await;
        }
    }

    /// Current state of a task, if tracked
    pub async fn task_state(&self, id: &TaskId) -> Option<TaskState> {
        let state = self.state.lock().await;
        if state.pending.contains_key(id) {
            Some(TaskState::Pending)
        } else if state.running.contains_key(id) {
            Some(TaskState::Running)
        } else if state.finished.contains_key(id) {
            Some(TaskState::Finished)
        } else {
            None
        }
    }

    /// Retriable failures recorded for a task since its last completion
    pub async fn retry_count(&self, id: &TaskId) -> u32 {
        self.state.lock().await.retries.get(id).copied().unwrap_or(0)
    }
}
