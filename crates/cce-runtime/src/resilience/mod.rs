//! Resilience patterns for cce-runtime.
//!
//! This module provides retry with exponential backoff. Every backend call
//! gets its own attempt counter; nothing is shared across calls.

mod retry;

pub use retry::RetryPolicy;
