//! **Clock**: a heartbeat task with no side effects
//! beyond recording that the monitor loop is alive.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use wallet_toolbox_common::error::WalletResult;

use crate::task::{MonitorTask, Trigger};

const INTERVAL_MS: i64 = 60_000;

pub struct ClockTask {
    last_run_msecs_since_epoch: AtomicI64,
}

impl Default for ClockTask {
    fn default() -> Self {
        Self {
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for ClockTask {
    fn name(&self) -> &'static str {
        "Clock"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        Ok(format!("heartbeat at {now_msecs_since_epoch}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_once_per_minute() {
        let task = ClockTask::default();
        assert!(task.trigger(0).run);
        task.run_task(0).await.unwrap();
        assert!(!task.trigger(30_000).run);
        assert!(task.trigger(60_000).run);
    }
}
