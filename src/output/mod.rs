//! Output formatting module
//!
//! Renders run events and summaries and writes them out.

mod formatter;
mod sink;

pub use formatter::Formatter;
pub use sink::OutputSink;
