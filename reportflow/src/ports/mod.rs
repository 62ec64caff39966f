//! Collaborator ports.
//!
//! The job talks to three remote collaborators: the cost data source, the
//! delivery channel, and the durable ledger. Each is an async trait with a
//! closed error enum, so implementations can be swapped without touching
//! the pipeline.

mod delivery;
mod ledger;
mod source;

pub use delivery::{DeliveryReference, ReportDelivery};
pub use ledger::{InMemoryLedgerStore, LedgerEntry, LedgerStatus, LedgerStore, PutOutcome};
#[cfg(test)]
pub use ledger::MockLedgerStore;
pub use source::CostSource;
