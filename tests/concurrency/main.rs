//! Concurrency Integration Tests
//!
//! Lost-update freedom, atomic transfers, lock ordering and deadlock recovery
//! through the public ledger API.

#[path = "../common/mod.rs"]
mod common;

mod deadlock;
mod optimistic;
mod pessimistic;
