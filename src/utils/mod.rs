//! Utility functions.

mod parser;

pub use parser::{format_duration, parse_duration};
