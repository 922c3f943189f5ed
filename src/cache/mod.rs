//! Caching primitives.
//!
//! - `ttl_cache` — bounded LRU with per-entry expiration and single-flight loads
//! - `refresh` — token freshness classification and jittered early refresh
//! - `remote` — fixed-TTL wrapper for remote resources
//! - `token` — minted access token

pub mod refresh;
pub mod remote;
pub mod token;
pub mod ttl_cache;
