//! Delivers a result from a producer to a consumer-registered continuation,
//! at most once.
//!
//! A handoff is the rendezvous between two independent threads: the producer
//! side supplies exactly one [`Outcome<T>`] and the consumer side registers
//! exactly one continuation. Whichever arrives second completes the
//! rendezvous, and the continuation then runs exactly once - immediately on
//! the completing thread, or on a bound [`Executor`] at a chosen priority.
//!
//! Unlike a channel, the consumer side never blocks or polls: delivery is
//! push-based. On top of the rendezvous, a handoff carries:
//!
//! - an advisory interrupt channel from consumer to producer
//!   ([`Consumer::raise`] / [`Producer::set_interrupt_handler`]),
//! - an ambient [`RequestContext`] captured when the continuation is
//!   registered and restored around its invocation,
//! - an activation flag letting the consumer side park a completed
//!   rendezvous ([`Consumer::deactivate`] / [`Consumer::activate`]),
//! - broken-promise detection: a producer dropped without completing
//!   delivers [`Error::BrokenPromise`] instead of silence.
//!
//! # Example
//!
//! ```rust
//! use handoff::pair;
//!
//! let (producer, consumer) = pair::<String>();
//!
//! consumer.set_callback(|outcome| {
//!     assert_eq!(outcome.into_value().unwrap(), "hello");
//! });
//!
//! producer.complete_value("hello".to_string());
//! ```
//!
//! # Example: dispatching on an executor
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use handoff::{Executor, ManualExecutor, pair};
//!
//! let executor = Arc::new(ManualExecutor::new());
//! let (producer, consumer) = pair::<u32>();
//!
//! consumer.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0);
//! consumer.set_callback(|outcome| {
//!     assert_eq!(outcome.into_value().unwrap(), 42);
//! });
//!
//! producer.complete_value(42);
//!
//! // Delivery happens when the executor drains, not before.
//! assert_eq!(executor.run_all(), 1);
//! ```

mod collect;
mod consumer;
mod continuation;
mod core;
mod core_ref;
mod error;
mod executor;
mod micro_lock;
mod outcome;
mod producer;
mod request_context;
mod state;
#[cfg(test)]
mod test_utils;

pub use collect::*;
pub use consumer::*;
pub use error::*;
pub use executor::*;
pub use outcome::*;
pub use producer::*;
pub use request_context::*;

use crate::core_ref::CoreRef;

/// Creates a connected producer/consumer pair around a fresh handoff.
///
/// The shared state lives on the heap and is destroyed when both handles
/// (and any in-flight executor dispatch) are gone.
#[must_use]
pub fn pair<T>() -> (Producer<T>, Consumer<T>)
where
    T: Send + 'static,
{
    let (producer_core, consumer_core) = CoreRef::new_pair();

    (
        Producer::new(producer_core),
        Consumer::new(consumer_core),
    )
}

/// Creates a consumer whose outcome is already present.
///
/// There is no producer side: the handoff is born resolved, and a
/// continuation registered on it runs immediately.
#[must_use]
pub fn completed<T>(outcome: Outcome<T>) -> Consumer<T>
where
    T: Send + 'static,
{
    Consumer::new(CoreRef::new_resolved(outcome))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::test_utils::with_watchdog;

    #[test]
    fn readme_flow() {
        let (producer, consumer) = pair::<String>();

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);

        consumer.set_callback(move |outcome| {
            assert_eq!(outcome.into_value().unwrap(), "hello");
            delivered_clone.fetch_add(1, Ordering::Relaxed);
        });

        producer.complete_value("hello".to_string());

        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregistered_consumer_never_observes_anything() {
        let (producer, consumer) = pair::<u32>();

        producer.complete_value(1);

        // No continuation was registered; dropping the consumer silently
        // discards the outcome. Nothing to assert beyond "this is clean".
        drop(consumer);
        drop(producer);
    }

    #[test]
    fn both_drop_orders_are_clean_without_traffic() {
        let (producer, consumer) = pair::<u32>();
        drop(producer);
        drop(consumer);

        let (producer, consumer) = pair::<u32>();
        drop(consumer);
        drop(producer);
    }

    #[test]
    fn handles_migrate_between_threads() {
        with_watchdog(|| {
            let (producer, consumer) = pair::<u32>();

            let delivered = Arc::new(AtomicUsize::new(0));
            let delivered_clone = Arc::clone(&delivered);

            let consumer_thread = thread::spawn(move || {
                consumer.set_callback(move |outcome| {
                    assert_eq!(outcome.into_value().unwrap(), 9);
                    delivered_clone.fetch_add(1, Ordering::Relaxed);
                });
            });

            let producer_thread = thread::spawn(move || {
                producer.complete_value(9);
            });

            consumer_thread.join().unwrap();
            producer_thread.join().unwrap();

            assert_eq!(delivered.load(Ordering::Relaxed), 1);
        });
    }
}
