// watersync: keeps each branch's top-200 water-usage customers and their
// monthly readings in a local analytical store, synced from the upstream
// billing database on a yearly (cohort) and monthly (details) schedule.

pub mod branches;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod sync;
pub mod templates;
pub mod upstream;

pub use calendar::YearMonth;
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
