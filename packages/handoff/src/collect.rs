//! Aggregation of several handoffs into one.
//!
//! Two families, generated per tuple arity:
//!
//! - `collect_allN`: always delivers the full tuple of outcomes, one per
//!   input, once every input has completed.
//! - `collectN` (fail-fast): delivers either the tuple of unwrapped values,
//!   or the first failure observed - whichever happens first, exactly once.
//!
//! Both work the same way: a shared context holds one write-once slot per
//! input plus the producer of the aggregate handoff, and every input's
//! continuation owns one clone of the context and one slot index. When the
//! last clone drops - that is, when the last continuation has run - the
//! context's drop delivers through the producer. The fail-fast variant
//! short-circuits out of that protocol with a single atomic swap guarding
//! first-failure against final-success delivery.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Consumer, Error, Failure, Outcome, Producer, pair};

/// A write-once slot, written by exactly one input's continuation and read
/// by the delivering drop of the shared context.
struct SlotCell<V> {
    value: UnsafeCell<Option<V>>,
}

impl<V> SlotCell<V> {
    fn new() -> Self {
        Self {
            value: UnsafeCell::new(None),
        }
    }

    /// Installs the slot's value.
    ///
    /// # Safety
    ///
    /// May be called at most once per slot, and only by the continuation
    /// that owns the slot's index.
    unsafe fn install(&self, value: V) {
        // SAFETY: Single writer per the caller's guarantee. The only reader
        // is the context's drop, which cannot run before every
        // continuation's context clone is gone; the Arc refcount orders
        // those drops after this write.
        unsafe {
            *self.value.get() = Some(value);
        }
    }

    fn take(&mut self) -> Option<V> {
        self.value.get_mut().take()
    }
}

// SAFETY: Access is single-writer (one continuation) then single-reader (the
// context's drop), with the Arc refcount providing the ordering in between.
unsafe impl<V: Send> Sync for SlotCell<V> {}

macro_rules! collect_variants {
    (
        $collect_all_fn:ident, $collect_fn:ident, $all_ctx:ident, $fast_ctx:ident,
        $(($T:ident, $v:ident, $idx:tt)),+
    ) => {
        struct $all_ctx<$($T),+>
        where
            $($T: Send + 'static,)+
        {
            slots: ($(SlotCell<Outcome<$T>>,)+),
            producer: Option<Producer<($(Outcome<$T>,)+)>>,
        }

        // SAFETY: Every field access happens either from the single
        // continuation that owns it (the slots, single-writer) or from the
        // drop that runs once the last Arc clone is gone (the producer,
        // single-reader-at-a-time); the Arc refcount provides the ordering
        // between them, exactly as for `SlotCell` above.
        unsafe impl<$($T),+> Sync for $all_ctx<$($T),+> where $($T: Send + 'static,)+ {}

        impl<$($T),+> Drop for $all_ctx<$($T),+>
        where
            $($T: Send + 'static,)+
        {
            fn drop(&mut self) {
                let producer = self
                    .producer
                    .take()
                    .expect("aggregate delivery happens exactly once, at context drop");

                // A missing slot means an input core vanished without ever
                // delivering; surface it like any vanished producer.
                let results = ($(
                    self.slots.$idx.take().unwrap_or_else(|| {
                        Outcome::Failure(Failure::from(Error::BrokenPromise))
                    }),
                )+);

                producer.complete(Outcome::Value(results));
            }
        }

        /// Aggregates the given handoffs into one that delivers the full
        /// tuple of their outcomes, in input order, once every input has
        /// completed.
        pub fn $collect_all_fn<$($T),+>(
            consumers: ($(Consumer<$T>,)+),
        ) -> Consumer<($(Outcome<$T>,)+)>
        where
            $($T: Send + 'static,)+
        {
            let (producer, aggregate) = pair();

            let context = Arc::new($all_ctx {
                slots: ($(SlotCell::<Outcome<$T>>::new(),)+),
                producer: Some(producer),
            });

            $(
                {
                    let context = Arc::clone(&context);
                    let consumer = consumers.$idx;

                    consumer.set_callback(move |outcome| {
                        // SAFETY: This continuation is the sole writer of
                        // its slot and runs at most once.
                        unsafe {
                            context.slots.$idx.install(outcome);
                        }
                    });
                }
            )+

            aggregate
        }

        struct $fast_ctx<$($T),+>
        where
            $($T: Send + 'static,)+
        {
            slots: ($(SlotCell<$T>,)+),

            /// Guards first-failure delivery against final-success delivery:
            /// whoever wins the swap delivers, everyone else backs off.
            failed: AtomicBool,

            producer: Producer<($($T,)+)>,
        }

        // SAFETY: Same argument as for `$all_ctx` above - single-writer
        // slots plus a producer only ever touched by whichever drop wins the
        // `failed` swap, with the Arc refcount (and the swap itself)
        // ordering the accesses.
        unsafe impl<$($T),+> Sync for $fast_ctx<$($T),+> where $($T: Send + 'static,)+ {}

        impl<$($T),+> Drop for $fast_ctx<$($T),+>
        where
            $($T: Send + 'static,)+
        {
            fn drop(&mut self) {
                if self.failed.swap(true, Ordering::AcqRel) {
                    // A failure already delivered the aggregate.
                    return;
                }

                $(
                    let Some($v) = self.slots.$idx.take() else {
                        self.producer.complete(Outcome::Failure(Failure::from(
                            Error::BrokenPromise,
                        )));
                        return;
                    };
                )+

                self.producer.complete(Outcome::Value(($($v,)+)));
            }
        }

        /// Aggregates the given handoffs into one that delivers the tuple of
        /// their values, in input order - or the first failure observed,
        /// delivered immediately without waiting for the remaining inputs.
        pub fn $collect_fn<$($T),+>(
            consumers: ($(Consumer<$T>,)+),
        ) -> Consumer<($($T,)+)>
        where
            $($T: Send + 'static,)+
        {
            let (producer, aggregate) = pair();

            let context = Arc::new($fast_ctx {
                slots: ($(SlotCell::<$T>::new(),)+),
                failed: AtomicBool::new(false),
                producer,
            });

            $(
                {
                    let context = Arc::clone(&context);
                    let consumer = consumers.$idx;

                    consumer.set_callback(move |outcome| match outcome {
                        Outcome::Value(value) => {
                            // Skip the write if a failure already delivered;
                            // either way the slot has a single writer.
                            if !context.failed.load(Ordering::Acquire) {
                                // SAFETY: This continuation is the sole
                                // writer of its slot and runs at most once.
                                unsafe {
                                    context.slots.$idx.install(value);
                                }
                            }
                        }
                        Outcome::Failure(failure) => {
                            if !context.failed.swap(true, Ordering::AcqRel) {
                                context.producer.complete(Outcome::Failure(failure));
                            }
                        }
                    });
                }
            )+

            aggregate
        }
    };
}

collect_variants!(
    collect_all2, collect2, CollectAll2, Collect2,
    (A, a, 0), (B, b, 1)
);

collect_variants!(
    collect_all3, collect3, CollectAll3, Collect3,
    (A, a, 0), (B, b, 1), (C, c, 2)
);

collect_variants!(
    collect_all4, collect4, CollectAll4, Collect4,
    (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3)
);
