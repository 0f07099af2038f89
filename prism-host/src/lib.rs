//! PRISM host service library.
//!
//! Split from the binary so the config, pattern source, and service
//! loop are unit-testable.

pub mod config;
pub mod pattern;
pub mod service;
