//! Shared test utilities for longform integration tests.
//!
//! - `ScriptedCompletion`: a completion backend that answers per operation
//! - `TestHarness`: a service over a temporary SQLite store

pub mod harness;
pub mod scripted;

pub use harness::TestHarness;
pub use scripted::{filler, ScriptedCompletion};
