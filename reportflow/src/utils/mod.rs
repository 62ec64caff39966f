//! Clock and timestamp helpers.

pub mod timestamps;

pub use timestamps::{Clock, FixedClock, SystemClock, Timestamp};
