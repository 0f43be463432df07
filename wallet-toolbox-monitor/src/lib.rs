//! The Monitor: a foreground-cooperative task runner that
//! drives transaction broadcast, proof acquisition, and periodic bookkeeping
//! against Storage and Chain Services.

pub mod defaults;
pub mod retry_queue;
pub mod task;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

pub use defaults::{default_monitor, default_tasks};
pub use retry_queue::{ReorgRetryEntry, ReorgRetryQueue};
pub use task::{Monitor, MonitorTask, TaskOutcome, Trigger};
pub use tasks::{
    CheckForProofsTask, CheckNoSendsTask, ClockTask, FailAbandonedTask, MonitorCallHistoryTask, NewHeaderTask,
    PurgeTask, ReorgTask, ReviewStatusTask, SendWaitingTask, SyncWhenIdleTask, UnFailTask,
};
