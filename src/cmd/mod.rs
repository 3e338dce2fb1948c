//! Command-line entry points.

pub mod calendar;
pub mod clean;
pub mod extract;
pub mod generate;
pub mod normalize;
pub mod schema;
