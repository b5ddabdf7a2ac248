//! Shared test utilities for async-agentx integration tests.

// Allow dead code since not all test files use all utilities
#![allow(dead_code)]

mod fixtures;
mod master;

pub use fixtures::*;
pub use master::*;
