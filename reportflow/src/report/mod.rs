//! The cost report: what the data source returns and how it is rendered.

mod compose;
mod model;

pub use compose::{compose, ComposedReport, MIN_LISTED_AMOUNT, TOP_SERVICES};
pub use model::{CostData, ServiceCost};
