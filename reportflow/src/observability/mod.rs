//! Observability utilities.

mod logging;
mod outcome;
mod timer;

pub use logging::{build_env_filter, init_tracing};
pub use outcome::{OutcomeReporter, OUTCOME_EVENT_TYPE};
pub use timer::SpanTimer;
