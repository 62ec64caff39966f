//! File-backed collaborators.
//!
//! These back the command-line binary and local runs: cost data is read
//! from a directory of JSON files, reports go to an outbox directory, and
//! the ledger is a single JSON document replaced atomically on each write.

mod file_ledger;
mod file_source;
mod outbox;

pub use file_ledger::JsonFileLedgerStore;
pub use file_source::FileCostSource;
pub use outbox::{OutboxDelivery, OutboxMessage};
