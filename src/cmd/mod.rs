//! Command-line entry points.

pub mod run;
pub mod status;
