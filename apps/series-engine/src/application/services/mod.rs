//! Application Services
//!
//! Services that orchestrate the domain core:
//!
//! - `engine`: the per-process series registry: ingestion, storage,
//!   publication, and the consumer read API
//! - `subscriptions`: ref-counted feed subscriptions with TTL teardown
//! - `resume`: cursor-based resumable stream sessions

pub mod engine;
pub mod resume;
pub mod subscriptions;
