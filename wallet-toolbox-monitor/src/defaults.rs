//! Assembles the default task roster into a single
//! [`Monitor`].

use std::sync::{Arc, Mutex};

use chrono::Duration;
use wallet_toolbox_services::ServiceProvider;
use wallet_toolbox_storage::provider::StorageProvider;

use crate::retry_queue::ReorgRetryQueue;
use crate::task::{Monitor, MonitorTask};
use crate::tasks::{
    CheckForProofsTask, CheckNoSendsTask, ClockTask, FailAbandonedTask, MonitorCallHistoryTask, NewHeaderTask,
    PurgeTask, ReorgTask, ReviewStatusTask, SendWaitingTask, SyncWhenIdleTask, UnFailTask,
};

/// 30 days for settled transactions, 14 for abandoned ones, matching the
/// upstream defaults this task roster was generalized from.
const DEFAULT_COMPLETED_PURGE_AGE_DAYS: i64 = 30;
const DEFAULT_FAILED_PURGE_AGE_DAYS: i64 = 14;

/// Builds every default task wired against `storage` and `services`, sharing
/// `reorg_queue` between [`ReorgTask`] (which fills it) and whatever consumer
/// drains it for re-verification.
pub fn default_tasks(
    storage: Arc<dyn StorageProvider>,
    services: Arc<dyn ServiceProvider>,
    reorg_queue: Arc<Mutex<ReorgRetryQueue>>,
) -> Vec<Box<dyn MonitorTask>> {
    vec![
        Box::new(ClockTask::default()),
        Box::new(SendWaitingTask::new(storage.clone(), services.clone())),
        Box::new(CheckForProofsTask::new(storage.clone(), services.clone())),
        Box::new(CheckNoSendsTask::new(storage.clone())),
        Box::new(FailAbandonedTask::new(storage.clone())),
        Box::new(ReviewStatusTask::new(storage.clone())),
        Box::new(UnFailTask::new(storage.clone())),
        Box::new(PurgeTask::new(
            storage,
            Duration::days(DEFAULT_COMPLETED_PURGE_AGE_DAYS),
            Duration::days(DEFAULT_FAILED_PURGE_AGE_DAYS),
        )),
        Box::new(MonitorCallHistoryTask::default()),
        Box::new(SyncWhenIdleTask::new(services.clone())),
        Box::new(NewHeaderTask::new(services.clone())),
        Box::new(ReorgTask::new(services, reorg_queue)),
    ]
}

/// Convenience wrapper around [`default_tasks`] for the common case of
/// running the full default roster.
pub fn default_monitor(
    storage: Arc<dyn StorageProvider>,
    services: Arc<dyn ServiceProvider>,
    reorg_queue: Arc<Mutex<ReorgRetryQueue>>,
) -> Monitor {
    Monitor::new(default_tasks(storage, services, reorg_queue))
}
