mod admin;
mod crawl;
mod deletion;
mod hashing;
pub mod models;
pub(crate) mod queries;
mod recovery;
mod sqlite;

pub use admin::{ScheduleFilter, SCHEDULE_ORDER_COLUMNS};
pub use sqlite::Database;
