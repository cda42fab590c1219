//! Core library for the phase execution engine: dispatches a plan's
//! groups of tasks to worker instances, verifies and consolidates their
//! results, and carries a finished group through synthesis review and
//! revision rounds.

pub mod config;
pub mod consolidate;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod git;
pub mod instance;
pub mod observer;
pub mod plan;
pub mod revision;
pub mod sentinel;
pub mod state;
pub mod synthesis;
pub mod tracker;
pub mod verify;

pub use error::{EngineError, Result};
