use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::Core;
use crate::core_ref::CoreRef;
use crate::{Error, Executor, Failure, Outcome};

/// The consuming side of a handoff: registers exactly one continuation.
///
/// The continuation runs exactly once, receiving the producer's outcome (or
/// a synthesized broken promise), on whichever thread completes the
/// rendezvous - or on the bound executor if one was set beforehand.
///
/// Dropping the consumer re-activates the core, so an outcome the consumer
/// side abandoned still reaches a registered continuation; with no
/// continuation registered, the outcome is silently dropped.
///
/// The consumer may move freely between threads, but must not be used from
/// several threads at once (it is deliberately not `Sync`).
pub struct Consumer<T>
where
    T: Send + 'static,
{
    core: CoreRef<T>,

    // We are not compatible with concurrent consumer use from multiple threads.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> Consumer<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(core: CoreRef<T>) -> Self {
        Self {
            core,
            _not_sync: PhantomData,
        }
    }

    /// Registers the continuation that will receive the outcome.
    ///
    /// The calling thread's ambient [`RequestContext`][crate::RequestContext]
    /// is captured now and restored around the continuation's invocation,
    /// wherever that ends up running.
    ///
    /// Failures of the continuation itself (panics) are not caught: they
    /// unwind into whichever caller triggered the delivery.
    ///
    /// # Panics
    ///
    /// Panics if a continuation has already been registered.
    pub fn set_callback<F>(&self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.core.set_callback(f);
    }

    /// Binds the executor the continuation will be dispatched onto, at the
    /// given priority.
    ///
    /// Executors reporting a single priority class receive plain
    /// submissions; the priority is passed through otherwise.
    ///
    /// Binding is snapshotted at dispatch time: a `set_executor` racing with
    /// the completion may lose, in which case the continuation is dispatched
    /// on the previously bound executor.
    pub fn set_executor(&self, executor: Arc<dyn Executor>, priority: i8) {
        self.core.set_executor(Some(executor), priority);
    }

    /// The currently bound executor, if any.
    #[must_use]
    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.core.executor()
    }

    /// Raises an advisory interrupt towards the producer side.
    ///
    /// At most one interrupt is ever delivered per handoff; later raises and
    /// raises after an outcome exists are no-ops. The producer may observe
    /// it via its interrupt handler, or ignore it entirely.
    pub fn raise<E>(&self, error: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.core.raise(Failure::new(error));
    }

    /// Suppresses delivery: a completed rendezvous stays parked until
    /// [`activate`][Self::activate].
    pub fn deactivate(&self) {
        self.core.deactivate();
    }

    /// Re-enables delivery, performing it immediately if the rendezvous
    /// already completed while suppressed.
    pub fn activate(&self) {
        self.core.activate();
    }

    /// Whether delivery is currently enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Whether the producer side has supplied an outcome.
    #[must_use]
    pub fn has_result(&self) -> bool {
        self.core.has_result()
    }

    /// Alias for [`has_result`][Self::has_result].
    #[must_use]
    pub fn ready(&self) -> bool {
        self.core.ready()
    }

    /// Mutable access to the stored outcome, without consuming it.
    ///
    /// Only available before a continuation is registered: after that, the
    /// outcome belongs to the continuation.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if no outcome is stored, or if a continuation
    /// already owns it.
    pub fn result_mut(&mut self) -> Result<&mut Outcome<T>, Error> {
        // SAFETY: `&mut self` on a non-Sync handle serializes all
        // consumer-side calls for the duration of the borrow, which is the
        // exclusivity the core asks for.
        unsafe { self.core.result_mut() }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Core<T> {
        &self.core
    }
}

impl<T> Drop for Consumer<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        Core::detach_consumer(self.core.ptr());
    }
}

impl<T> fmt::Debug for Consumer<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("ready", &self.ready())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{ManualExecutor, completed, pair};

    assert_impl_all!(Consumer<u32>: Send);
    assert_not_impl_any!(Consumer<u32>: Sync);

    #[test]
    fn result_mut_before_completion_is_not_ready() {
        let (_producer, mut consumer) = pair::<u32>();

        assert!(matches!(consumer.result_mut(), Err(Error::NotReady)));
    }

    #[test]
    fn result_mut_inspects_and_mutates_in_place() {
        let (producer, mut consumer) = pair::<u32>();

        producer.complete_value(41);

        {
            let outcome = consumer.result_mut().expect("result is stored");
            *outcome = Outcome::Value(42);
        }

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);

        consumer.set_callback(move |outcome| {
            delivered_clone.store(outcome.into_value().unwrap() as usize, Ordering::Relaxed);
        });

        assert_eq!(delivered.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn result_mut_after_registration_is_refused() {
        let (producer, mut consumer) = pair::<u32>();

        consumer.set_callback(|_| {});
        producer.complete_value(1);

        // Delivered and consumed; nothing left to inspect.
        assert!(matches!(consumer.result_mut(), Err(Error::NotReady)));
    }

    #[test]
    fn has_result_is_monotonic() {
        let (producer, consumer) = pair::<u32>();

        assert!(!consumer.has_result());
        assert!(!consumer.ready());

        producer.complete_value(1);

        assert!(consumer.has_result());
        drop(producer);
        assert!(consumer.has_result());

        consumer.set_callback(|_| {});
        assert!(consumer.has_result());
    }

    #[test]
    fn dropping_consumer_without_callback_drops_the_outcome() {
        let (producer, consumer) = pair::<u32>();

        producer.complete_value(42);
        drop(consumer);

        // Nothing to observe - the outcome is gone. The producer side can
        // still be dropped cleanly afterwards.
        drop(producer);
    }

    #[test]
    fn dropping_a_deactivated_consumer_forces_delivery() {
        let (producer, consumer) = pair::<u32>();

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);

        consumer.set_callback(move |outcome| {
            delivered_clone.store(outcome.into_value().unwrap() as usize, Ordering::Relaxed);
        });
        consumer.deactivate();

        producer.complete_value(6);
        assert_eq!(delivered.load(Ordering::Relaxed), 0);

        // The destructor activates, which fires the parked delivery.
        drop(consumer);
        assert_eq!(delivered.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn executor_getter_reflects_binding() {
        let (_producer, consumer) = pair::<u32>();

        assert!(consumer.executor().is_none());

        let executor = Arc::new(ManualExecutor::new());
        consumer.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0);

        assert!(consumer.executor().is_some());
    }

    #[test]
    fn completed_consumer_is_ready_immediately() {
        let consumer = completed::<u32>(Outcome::Value(5));

        assert!(consumer.ready());

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);

        consumer.set_callback(move |outcome| {
            delivered_clone.store(outcome.into_value().unwrap() as usize, Ordering::Relaxed);
        });

        assert_eq!(delivered.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn completed_consumer_can_be_dropped_untouched() {
        let consumer = completed::<u32>(Outcome::Value(5));
        drop(consumer);
    }
}
