//! Error tagging shared by the caches and their remote collaborators.
//!
//! Failures that may succeed when retried unchanged (connectivity problems,
//! unsuccessful responses, interrupted bodies) are wrapped in [`Transient`].
//! Anything else, such as a body that does not decode, is permanent. A single failed load can be handed to many waiters
//! through [`SharedError`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Error};
use http::StatusCode;

#[derive(Debug)]
pub struct Transient(Error);

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for Transient {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Tag `err` as retryable.
pub fn transient(err: impl Into<Error>) -> Error {
    Error::new(Transient(err.into()))
}

/// One failure observed by every caller that waited on the same load.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<Error>);

impl SharedError {
    pub fn inner(&self) -> &Error {
        &self.0
    }
}

impl From<Error> for SharedError {
    fn from(err: Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Error for an unsuccessful HTTP status. Any such status is transient.
pub fn status_error(status: StatusCode, url: &str) -> Error {
    transient(anyhow!("received HTTP {} from {}", status, url))
}

/// True when any link of the chain was tagged with [`transient`].
pub fn is_transient(err: &Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<Transient>()
            || cause
                .downcast_ref::<SharedError>()
                .is_some_and(|shared| is_transient(shared.inner()))
    })
}
