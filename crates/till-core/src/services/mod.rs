//! Services shared by every till front end.

mod app;
mod database;
mod integrity;
mod till;

pub use app::TillApp;
pub use database::DatabaseService;
pub use integrity::{check_integrity, IntegrityReport, LogIssue};
pub use till::TillService;

#[cfg(test)]
mod tests;
