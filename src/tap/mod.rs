//! Test Anything Protocol support
//!
//! Line-oriented parsing of diagnostic test output.

mod parser;

pub use parser::{TapEvent, TapParser};
