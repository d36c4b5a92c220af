// Application layer - the ledger engine and its error model.
// Request layers (CLI, HTTP, ...) authenticate the caller, build a `Caller`
// and call into `LedgerService`.

pub mod error;
pub mod fault;
pub mod identity;
pub mod service;

pub use error::*;
pub use fault::*;
pub use identity::*;
pub use service::*;
