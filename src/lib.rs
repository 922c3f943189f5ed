//! # Token Cache Library
//!
//! Serves OAuth2 access tokens from a process-wide cache in front of an
//! expensive token-minting authority. At most one mint per scope set is in
//! flight at any time, and tokens are refreshed at random inside a window
//! before expiry so that holders do not all refresh at once.
//!
//! Modules:
//! - `cache` — single-flight TTL cache, refresh policy, fixed-TTL remote cache
//! - `sources` — scope keys, token sources, metadata / certificates / signing
//! - `provider` — service provider wiring caches and collaborators together
//! - `config` — YAML settings and validation
//! - `resilience` — transient error tagging and retry

pub mod cache;
pub mod config;
pub mod helpers;
pub mod observability;
pub mod provider;
pub mod resilience;
pub mod sources;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::cache::token::Token;
pub use crate::config::settings::CacheSettings;
pub use crate::provider::ServiceProvider;
pub use crate::sources::scopes::ScopeKey;
pub use crate::sources::token_source::TokenSource;
