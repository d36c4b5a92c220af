pub mod application;
pub mod cli;
pub mod domain;
pub mod storage;
pub mod telemetry;

pub use application::{Caller, LedgerService, WriteMode};
pub use domain::*;
pub use storage::{LedgerStore, MemoryStore, SqliteStore};
