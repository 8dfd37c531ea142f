#![deny(missing_docs)]
//! Launchpad agents core library.
//!
//! Shared building blocks for the chat skills: gating, intent rules, caching,
//! upstream clients, storage and the skills themselves.

/// Skill contract and shared services.
pub mod agent;
/// TTL cache with size-pressure eviction.
pub mod cache;
/// On-chain treasury client.
pub mod chain;
/// Time source abstraction.
pub mod clock;
/// Configuration management.
pub mod config;
/// Rate, quota and tier gating.
pub mod gate;
/// Request and error counters.
pub mod health;
/// Keyword intent classification.
pub mod intent;
/// Outbound message formatting.
pub mod reply;
/// Domain skills.
pub mod skills;
/// Key-value storage (memory, R2/S3).
pub mod storage;
/// External API clients.
pub mod upstream;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;
