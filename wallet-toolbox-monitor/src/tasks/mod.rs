//! The default task roster.

mod check_for_proofs;
mod clock;
mod housekeeping;
mod lifecycle;
mod send_waiting;

pub use check_for_proofs::CheckForProofsTask;
pub use clock::ClockTask;
pub use housekeeping::{MonitorCallHistoryTask, NewHeaderTask, ReorgTask, SyncWhenIdleTask};
pub use lifecycle::{CheckNoSendsTask, FailAbandonedTask, PurgeTask, ReviewStatusTask, UnFailTask};
pub use send_waiting::SendWaitingTask;
