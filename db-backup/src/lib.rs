//! Database backup runner
//!
//! Dumps a set of databases in parallel, compresses each dump, and packs the
//! successful ones into a single timestamped archive.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod notify;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, RunContext};
pub use executor::report::{RunOutcome, RunReport};
pub use executor::Coordinator;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
