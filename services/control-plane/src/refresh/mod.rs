//! Scheduled refresh of the pool's image set.
//!
//! Once a day the pool is synced to the master, then its local images are
//! pruned to the youngest build of every category and refilled with the
//! youngest builds the registry offers.

mod job;
mod schedule;
mod worker;

pub use job::{RefreshError, RefreshJob, RefreshReport};
pub use schedule::DailySchedule;
pub use worker::RefreshWorker;
