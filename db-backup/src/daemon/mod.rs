//! Process-level concerns: the single-instance lock and signal handling.

pub mod lock;
pub mod shutdown;
