//! HTTP client library for A1111 / SD.Next `sdapi` servers.
//!
//! Provides the REST wrapper, typed response parsing into core Result Sets
//! and Progress Snapshots, and readiness probing with backoff.

pub mod api;
pub mod messages;
pub mod readiness;
