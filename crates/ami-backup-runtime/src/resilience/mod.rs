//! Resilience patterns for ami-backup-runtime.
//!
//! This module provides:
//! - Bounded retry with backoff for idempotent provider calls (tagging)

mod retry;

pub use retry::RetryPolicy;
