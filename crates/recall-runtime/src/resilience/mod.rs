//! Resilience for recall-runtime.
//!
//! This module provides:
//! - The failure budget that stops a run early
//! - Token usage accounting

mod budget;

pub use budget::{FailureBudget, LlmUsage};
