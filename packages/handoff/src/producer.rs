use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::core::Core;
use crate::core_ref::CoreRef;
use crate::{Failure, Outcome};

/// The producing side of a handoff: supplies exactly one outcome.
///
/// Dropping the producer without completing it delivers a broken-promise
/// failure to the consumer side instead of leaving it waiting forever.
///
/// The producer may move freely between threads, but must not be used from
/// several threads at once (it is deliberately not `Sync`).
pub struct Producer<T>
where
    T: Send + 'static,
{
    core: CoreRef<T>,

    // We are not compatible with concurrent producer use from multiple threads.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> Producer<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(core: CoreRef<T>) -> Self {
        Self {
            core,
            _not_sync: PhantomData,
        }
    }

    /// Supplies the outcome, delivering it to the consumer's continuation if
    /// one is registered (and the core is active).
    ///
    /// # Panics
    ///
    /// Panics if a result has already been supplied.
    pub fn complete(&self, outcome: Outcome<T>) {
        self.core.set_result(outcome);
    }

    /// Supplies a value. Shorthand for [`complete`][Self::complete] with
    /// [`Outcome::Value`].
    ///
    /// # Panics
    ///
    /// Panics if a result has already been supplied.
    pub fn complete_value(&self, value: T) {
        self.complete(Outcome::Value(value));
    }

    /// Supplies a failure. Shorthand for [`complete`][Self::complete] with
    /// [`Outcome::Failure`].
    ///
    /// # Panics
    ///
    /// Panics if a result has already been supplied.
    pub fn complete_error<E>(&self, error: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.complete(Outcome::Failure(Failure::new(error)));
    }

    /// Whether an outcome has been supplied.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.core.has_result()
    }

    /// Installs a handler for interrupts raised by the consumer side.
    ///
    /// If an interrupt was already raised, the handler runs immediately on
    /// the calling thread; otherwise it runs on the thread of the `raise`
    /// that arrives first. Once an outcome has been supplied, interrupts are
    /// dropped and the handler never runs. Either way it runs at most once.
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: FnOnce(Failure) + Send + 'static,
    {
        self.core.set_interrupt_handler(Box::new(handler));
    }
}

impl<T> Drop for Producer<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        Core::detach_producer(self.core.ptr());
    }
}

impl<T> fmt::Debug for Producer<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}
