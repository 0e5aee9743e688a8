use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::Error;

/// A type-erased, cheaply clonable failure.
///
/// This is the unit in which errors travel between the two sides of a handoff:
/// the producer completes with one, the consumer raises one as an interrupt,
/// and the interrupt channel may hand the same failure to a handler that is
/// installed later. Cloning shares the underlying error.
#[derive(Clone, Debug)]
pub struct Failure {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl Failure {
    /// Wraps any error in a `Failure`.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Returns a reference to the wrapped error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        let mut source: Option<&(dyn StdError + 'static)> = Some(&*self.inner);

        while let Some(error) = source {
            if let Some(typed) = error.downcast_ref::<E>() {
                return Some(typed);
            }

            source = error.source();
        }

        None
    }

    /// Returns whether the wrapped error (or anything in its source chain)
    /// is of type `E`.
    #[must_use]
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.downcast_ref::<E>().is_some()
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

/// The unit of delivery between producer and consumer: either the produced
/// value or a failure.
///
/// Every registered continuation receives exactly one `Outcome<T>`, whether
/// the producer supplied a value, supplied an error, or detached without
/// supplying anything (in which case the core synthesizes
/// [`Error::BrokenPromise`]).
#[derive(Debug)]
pub enum Outcome<T> {
    /// The producer delivered a value.
    Value(T),

    /// The producer delivered a failure, or the core synthesized one.
    Failure(Failure),
}

impl<T> Outcome<T> {
    /// Returns whether this outcome carries a value.
    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Returns whether this outcome carries a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns a reference to the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns a reference to the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Value(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    /// Unpacks the outcome into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`Failure`] if this outcome is not a value.
    pub fn into_value(self) -> Result<T, Failure> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Failure(failure) => Err(failure),
        }
    }
}

impl<T> From<T> for Outcome<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}
