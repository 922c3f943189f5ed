//! Token sources and the remote collaborators behind the caches.

use std::future::Future;

use anyhow::Result;

use crate::cache::token::Token;

pub mod certificates;
pub mod http;
pub mod metadata;
pub mod scopes;
pub mod sign;
pub mod token_source;

/// Mints a fresh access token for a normalized scope set.
///
/// Implementations may perform network I/O and fail; transient failures
/// should be tagged with [`crate::resilience::transient::transient`].
pub trait MintToken: Send + Sync {
    fn mint(&self, scopes: &[String]) -> impl Future<Output = Result<Token>> + Send;
}
