//! Cucumber step definitions for interface tests.

pub mod correlation;
