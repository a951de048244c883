//! Periodic sweeps and the delayed SOS dispatch.

pub mod jobs;
pub mod scheduler;

pub use jobs::{
    cleanup, dispatch_sos, recover_stale_sos, sweep_missed_check_ins, sweep_reminders,
    CleanupSummary, MissedCheckInSummary, ReminderSummary, SosDispatchSummary,
};
pub use scheduler::{next_aligned, run, run_with_retry, schedule_sos_dispatch};
