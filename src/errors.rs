//! Error types for the resource pool

use std::time::Duration;
use thiserror::Error;

/// Errors returned when acquiring a resource.
///
/// `E` is the error type of the pool's constructor; a failed construction is
/// handed back untouched inside [`PoolError::Construct`].
#[derive(Error, Debug)]
pub enum PoolError<E> {
    #[error("failed to construct resource: {0}")]
    Construct(#[source] E),

    #[error("timeout while trying to fulfil request after {0:?}, resource unavailable")]
    ResourceUnavailable(Duration),

    #[error("pool has been shut down")]
    Closed,
}

impl<E> PoolError<E> {
    /// Whether the error is a wait timeout on a saturated pool
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PoolError::ResourceUnavailable(_))
    }

    /// Recover the constructor's error, if that is what failed
    pub fn into_construct_error(self) -> Option<E> {
        match self {
            PoolError::Construct(err) => Some(err),
            _ => None,
        }
    }
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;
