//! The `MonitorTask` contract and the `run_once` driver. Each
//! registered task exposes `trigger(now_ms) -> {run: bool}` and
//! `run_task() -> log_string`. `run_once()` snapshots the task list, asks
//! each whose trigger fires to run, and records an audit MonitorEvent per
//! execution (errors included). Tasks update their own
//! `last_run_msecs_since_epoch`.

use async_trait::async_trait;
use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_storage::provider::StorageProvider;
use wallet_toolbox_storage::StorageError;

/// Translates a storage-layer error into the wallet error kind every task
/// returns; tasks sit above the storage boundary just like the signer and
/// the façade do.
pub(crate) fn storage_err(e: StorageError) -> WalletError {
    WalletError::runtime(format!("storage error: {e}"))
}

/// Whether a task's trigger fired this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub run: bool,
}

/// One task's outcome, recorded as a MonitorEvent.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_name: &'static str,
    pub log: String,
    pub error: Option<String>,
}

/// A unit of periodic work the monitor drives. `trigger` is pure and cheap
/// (no I/O); `run_task` does the actual work and returns a human-readable
/// summary for the audit log.
#[async_trait]
pub trait MonitorTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this task should run at `now_msecs_since_epoch`, given its
    /// own `last_run_msecs_since_epoch` bookkeeping.
    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger;

    /// Runs the task's work, returning a summary for the audit log. Must
    /// update the task's own `last_run_msecs_since_epoch` on success so the
    /// next `trigger` call reflects it.
    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String>;
}

/// Drives a fixed list of tasks. `run_once` is itself non-reentrant: callers
/// serialize ticks.
pub struct Monitor {
    tasks: Vec<Box<dyn MonitorTask>>,
}

impl Monitor {
    pub fn new(tasks: Vec<Box<dyn MonitorTask>>) -> Self {
        Self { tasks }
    }

    /// Snapshots the task list, runs every task whose trigger fires, and
    /// records one MonitorEvent per execution — including failures, which do
    /// not halt the loop.
    pub async fn run_once(
        &self,
        storage: &dyn StorageProvider,
        now_msecs_since_epoch: i64,
    ) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        for task in &self.tasks {
            let trigger = task.trigger(now_msecs_since_epoch);
            if !trigger.run {
                continue;
            }
            match task.run_task(now_msecs_since_epoch).await {
                Ok(log) => {
                    let _ = storage.insert_monitor_event(task.name(), "run", Some(&log)).await;
                    outcomes.push(TaskOutcome {
                        task_name: task.name(),
                        log,
                        error: None,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    let _ = storage.insert_monitor_event(task.name(), "error1", Some(&message)).await;
                    tracing::warn!(task = task.name(), error = %message, "monitor task failed");
                    outcomes.push(TaskOutcome {
                        task_name: task.name(),
                        log: String::new(),
                        error: Some(message),
                    });
                }
            }
        }
        outcomes
    }
}
