//! PRISM client library.
//!
//! Holds everything the binary needs apart from argument parsing, so
//! the sinks and config stay unit-testable.

pub mod config;
pub mod sinks;
