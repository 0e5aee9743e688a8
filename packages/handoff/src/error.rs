use thiserror::Error as ThisError;

use crate::Failure;

/// Errors recognized by the handoff core.
///
/// The two contract violations ([`CallbackAlreadySet`][Self::CallbackAlreadySet]
/// and [`ResultAlreadySet`][Self::ResultAlreadySet]) are never returned: the
/// offending call panics with the variant's message, since they indicate a bug
/// in the calling code rather than a runtime condition. The remaining variants
/// travel to the consumer inside [`Outcome::Failure`][crate::Outcome::Failure],
/// except [`NotReady`][Self::NotReady] which is returned from premature
/// queries.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The result was queried before the producer supplied one.
    #[error("result is not ready")]
    NotReady,

    /// The producer handle was dropped without ever supplying a result.
    #[error("producer detached without supplying a result")]
    BrokenPromise,

    /// A continuation has already been registered on this core.
    #[error("a continuation has already been registered")]
    CallbackAlreadySet,

    /// A result has already been supplied to this core.
    #[error("a result has already been supplied")]
    ResultAlreadySet,

    /// The bound executor rejected the dispatched continuation.
    #[error("executor rejected the dispatched continuation: {0}")]
    SubmissionFailed(#[source] Failure),
}
