//! Cooperative cancellation for job runs.
//!
//! This module provides:
//! - CancellationToken for explicit operator or host cancellation
//! - CancelScope, which combines a token with an invocation deadline

mod scope;
mod token;

pub use scope::{CancelReason, CancelScope};
pub use token::CancellationToken;
