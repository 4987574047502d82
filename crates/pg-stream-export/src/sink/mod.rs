//! Output sinks.

mod file;

pub use file::{FileSink, INCOMPLETE_SUFFIX};
