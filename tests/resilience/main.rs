//! Resilience Integration Tests
//!
//! Retry policy timing and classification, circuit breaker state machine,
//! guarded calls and configuration loading.

#[path = "../common/mod.rs"]
mod common;

mod breaker;
mod config;
mod guarded;
mod retry;
