use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicU8, Ordering};

use tracing::trace;

use crate::continuation::Continuation;
use crate::core_ref::DispatchGuard;
use crate::micro_lock::MicroLock;
use crate::state::{
    STATE_ARMED, STATE_DONE, STATE_ONLY_CALLBACK, STATE_ONLY_RESULT, STATE_START,
};
use crate::{Error, Executor, Failure, Job, Outcome, RequestContext};

/// A handler for an interrupt raised by the consumer side.
pub(crate) type InterruptHandler = Box<dyn FnOnce(Failure) + Send>;

/// The executor the continuation will be dispatched onto, if any, and the
/// priority to dispatch it at.
#[derive(Default)]
struct ExecutorBinding {
    executor: Option<Arc<dyn Executor>>,

    /// Meaningless until an executor is bound.
    priority: i8,
}

/// The interrupt side channel: an advisory failure travelling from the
/// consumer side to the producer side.
#[derive(Default)]
struct InterruptChannel {
    /// Set by the first `raise`; stays set so later raises are no-ops.
    pending: Option<Failure>,

    /// Consumed by whichever of `raise` / `set_interrupt_handler` arrives
    /// second.
    handler: Option<InterruptHandler>,
}

/// The shared rendezvous object between a producer and a consumer.
///
/// Exactly one heap instance exists per producer/consumer pair. The producer
/// side supplies exactly one result, the consumer side registers exactly one
/// continuation, and whichever of the two arrives second arms the core; the
/// continuation then runs exactly once, on the `Armed -> Done` edge.
///
/// Each side's own operations are assumed single-threaded (the handles are
/// deliberately not `Sync`), but the two sides run on independent threads.
/// Queries, activation, and the side channels may be called from any thread.
pub(crate) struct Core<T>
where
    T: Send + 'static,
{
    /// The logical state of the core; see constants in `state.rs`.
    state: AtomicU8,

    /// Number of live holders: producer handle + consumer handle + at most
    /// one transient executor job. The core destroys itself when this
    /// reaches zero.
    attached: AtomicU8,

    /// When false, arrival at `Armed` does not progress to `Done`; a later
    /// `activate` retries. The consumer side uses this to suppress dispatch
    /// temporarily.
    active: AtomicBool,

    /// The produced outcome. Present from the `OnlyResult`/`Armed`
    /// transition onwards, until dispatch moves it into the continuation.
    ///
    /// We use `UnsafeCell` because we are a synchronization primitive and
    /// do our own synchronization of reads/writes: the slot has a single
    /// writer (the producer side, before it publishes the state) and a
    /// single reader (the dispatch that wins the `Armed -> Done` edge).
    result: UnsafeCell<Option<Outcome<T>>>,

    /// The registered continuation. Present from the
    /// `OnlyCallback`/`Armed` transition onwards, until dispatch consumes
    /// it. Same single-writer/single-reader protocol as `result`.
    callback: UnsafeCell<Option<Continuation<T>>>,

    /// The ambient request context captured when the continuation was
    /// registered, restored around its invocation. Present iff the
    /// continuation is.
    context: UnsafeCell<Option<Arc<RequestContext>>>,

    /// Where to dispatch the continuation. Snapshotted at dispatch time.
    executor: MicroLock<ExecutorBinding>,

    /// Advisory interrupt channel from consumer to producer.
    interrupt: MicroLock<InterruptChannel>,
}

impl<T> Core<T>
where
    T: Send + 'static,
{
    /// A fresh core: nothing has arrived yet, both handles attached.
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_START),
            attached: AtomicU8::new(2),
            active: AtomicBool::new(true),
            result: UnsafeCell::new(None),
            callback: UnsafeCell::new(None),
            context: UnsafeCell::new(None),
            executor: MicroLock::new(ExecutorBinding::default()),
            interrupt: MicroLock::new(InterruptChannel::default()),
        }
    }

    /// A core born with its result already present. Only a consumer handle
    /// ever exists for it, so it starts with a single attachment and no
    /// producer will come along to break any promise.
    pub(crate) fn with_result(outcome: Outcome<T>) -> Self {
        Self {
            state: AtomicU8::new(STATE_ONLY_RESULT),
            attached: AtomicU8::new(1),
            active: AtomicBool::new(true),
            result: UnsafeCell::new(Some(outcome)),
            callback: UnsafeCell::new(None),
            context: UnsafeCell::new(None),
            executor: MicroLock::new(ExecutorBinding::default()),
            interrupt: MicroLock::new(InterruptChannel::default()),
        }
    }

    /// Installs the produced outcome and advances the state machine,
    /// dispatching the continuation if this call armed the core.
    ///
    /// Call only from the producer side.
    ///
    /// # Panics
    ///
    /// Panics if a result has already been supplied.
    pub(crate) fn set_result(&self, outcome: Outcome<T>) {
        let mut current = self.state.load(Ordering::Acquire);

        // A result-bearing state can only have been produced by an earlier
        // producer-side call, so this is a caller bug, not a race.
        assert!(
            !matches!(
                current,
                STATE_ONLY_RESULT | STATE_ARMED | STATE_DONE
            ),
            "{}",
            Error::ResultAlreadySet
        );

        // SAFETY: Only the producer side writes this slot, exactly once
        // (checked above), and no other thread reads it until a state
        // published by the release exchanges below says it is present.
        unsafe {
            *self.result.get() = Some(outcome);
        }

        loop {
            match current {
                STATE_START => {
                    // Release publishes the result write; Acquire on failure
                    // because the consumer may have just published its
                    // continuation, which the retry goes on to observe.
                    match self.state.compare_exchange(
                        STATE_START,
                        STATE_ONLY_RESULT,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(observed) => current = observed,
                    }
                }
                STATE_ONLY_CALLBACK => {
                    // AcqRel: release the result write and acquire the
                    // consumer's continuation write, because we may go on to
                    // consume the continuation in `maybe_callback`.
                    match self.state.compare_exchange(
                        STATE_ONLY_CALLBACK,
                        STATE_ARMED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.maybe_callback();
                            return;
                        }
                        Err(observed) => current = observed,
                    }
                }
                state => {
                    unreachable!("unreachable core state on set_result: {state}");
                }
            }
        }
    }

    /// Captures the ambient request context, installs the continuation, and
    /// advances the state machine, dispatching if this call armed the core.
    ///
    /// Call only from the consumer side.
    ///
    /// # Panics
    ///
    /// Panics if a continuation has already been registered.
    pub(crate) fn set_callback<F>(&self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut current = self.state.load(Ordering::Acquire);

        // A continuation-bearing state can only have been produced by an
        // earlier consumer-side call, so this is a caller bug, not a race.
        assert!(
            !matches!(
                current,
                STATE_ONLY_CALLBACK | STATE_ARMED | STATE_DONE
            ),
            "{}",
            Error::CallbackAlreadySet
        );

        // SAFETY: Only the consumer side writes these slots, exactly once
        // (checked above), and no other thread reads them until a state
        // published by the release exchanges below says they are present.
        unsafe {
            *self.context.get() = RequestContext::save();
            *self.callback.get() = Some(Continuation::new(f));
        }

        loop {
            match current {
                STATE_START => {
                    // Release publishes the slot writes; Acquire on failure
                    // because the producer may have just published its
                    // result, which the retry goes on to observe.
                    match self.state.compare_exchange(
                        STATE_START,
                        STATE_ONLY_CALLBACK,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(observed) => current = observed,
                    }
                }
                STATE_ONLY_RESULT => {
                    // AcqRel: release the slot writes and acquire the
                    // producer's result write, because we may go on to move
                    // the result into the continuation.
                    match self.state.compare_exchange(
                        STATE_ONLY_RESULT,
                        STATE_ARMED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.maybe_callback();
                            return;
                        }
                        Err(observed) => current = observed,
                    }
                }
                state => {
                    unreachable!("unreachable core state on set_callback: {state}");
                }
            }
        }
    }

    /// Performs the `Armed -> Done` transition and dispatches, if the core is
    /// armed and active. The compare-exchange guarantees that at most one of
    /// the racing callers (result ingress, continuation ingress, `activate`)
    /// performs the dispatch.
    pub(crate) fn maybe_callback(&self) {
        if self.state.load(Ordering::Acquire) != STATE_ARMED {
            return;
        }

        if !self.active.load(Ordering::Acquire) {
            return;
        }

        // AcqRel: acquire both sides' slot writes (we are about to consume
        // all three slots) and release them onward to whoever observes Done.
        // A loser of this exchange observed Done and has nothing left to do.
        if self
            .state
            .compare_exchange(STATE_ARMED, STATE_DONE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.do_callback();
        }
    }

    /// Delivers the outcome to the continuation, inline or via the bound
    /// executor.
    ///
    /// Only the winner of the `Armed -> Done` exchange calls this, exactly
    /// once, which is what makes the slot consumption below exclusive.
    fn do_callback(&self) {
        // The snapshot and the submission below are deliberately not atomic
        // with respect to a concurrent `set_executor`; see the note on
        // `Consumer::set_executor`. Holding the lock across `submit` would
        // pin a spinlock under user code of unbounded duration.
        let (executor, priority) = {
            let binding = self.executor.lock();
            (binding.executor.clone(), binding.priority)
        };

        let Some(executor) = executor else {
            // SAFETY: We won the Done exchange, which grants the exclusive,
            // one-time right to consume the slots.
            let (continuation, context, outcome) = unsafe { self.take_slots() };

            let _ambient = RequestContext::enter(context);
            continuation.invoke(outcome);
            return;
        };

        // The job holds a transient attachment so the core outlives the
        // queue. It is released when the job is dropped - after running, or
        // unrun if the executor rejects it.
        let guard = DispatchGuard::new(self);

        let job: Job = Box::new(move || {
            let core = guard.core();

            // SAFETY: The Done winner handed its slot-consumption right to
            // this job and touches no slot itself on the successful
            // submission path.
            let (continuation, context, outcome) = unsafe { core.take_slots() };

            let _ambient = RequestContext::enter(context);
            continuation.invoke(outcome);
        });

        let submitted = if executor.priority_classes() == 1 {
            executor.submit(job)
        } else {
            executor.submit_with_priority(job, priority)
        };

        if let Err(cause) = submitted {
            trace!("executor rejected the continuation job; delivering inline");

            // The rejected job was dropped unrun, returning its transient
            // attachment, and never exercised the consumption right. The
            // outcome delivered becomes the rejection itself.

            // SAFETY: Still the Done winner's exclusive slot access; the
            // original result is replaced before anything reads it.
            unsafe {
                *self.result.get() =
                    Some(Outcome::Failure(Failure::from(Error::SubmissionFailed(cause))));
            }

            // SAFETY: As above - the consumption right is still unexercised.
            let (continuation, context, outcome) = unsafe { self.take_slots() };

            let _ambient = RequestContext::enter(context);
            continuation.invoke(outcome);
        }
    }

    /// Moves the continuation, captured context, and outcome out of the core.
    ///
    /// # Safety
    ///
    /// The caller must hold the one-time slot-consumption right: it must be
    /// the winner of the `Armed -> Done` exchange, or the job that winner
    /// submitted.
    unsafe fn take_slots(&self) -> (Continuation<T>, Option<Arc<RequestContext>>, Outcome<T>) {
        // SAFETY: Exclusive access per the caller's guarantee; `Armed`
        // required both slots to be present and nothing has consumed them.
        let continuation = unsafe { &mut *self.callback.get() }
            .take()
            .expect("core dispatched without a registered continuation");

        // SAFETY: As above.
        let context = unsafe { &mut *self.context.get() }.take();

        // SAFETY: As above.
        let outcome = unsafe { &mut *self.result.get() }
            .take()
            .expect("core dispatched without a stored result");

        (continuation, context, outcome)
    }

    /// Suppresses dispatch: arrival at `Armed` will not progress to `Done`
    /// until a later `activate`.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Re-enables dispatch and performs it if the core is already armed.
    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::Release);
        self.maybe_callback();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a result has been supplied. Monotonic: once true, stays true
    /// for the rest of the core's life.
    pub(crate) fn has_result(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            STATE_ONLY_RESULT | STATE_ARMED | STATE_DONE
        )
    }

    pub(crate) fn ready(&self) -> bool {
        self.has_result()
    }

    /// Mutable access to the stored result, without moving it out.
    ///
    /// Only available while no continuation is registered (`OnlyResult`):
    /// once one is, the result belongs to it and a dispatch may be consuming
    /// the slot concurrently.
    ///
    /// # Safety
    ///
    /// The caller must guarantee consumer-side exclusivity: no other
    /// consumer-side call may run while the returned borrow is live.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if no result is currently stored for inspection.
    pub(crate) unsafe fn result_mut(&self) -> Result<&mut Outcome<T>, Error> {
        if self.state.load(Ordering::Acquire) != STATE_ONLY_RESULT {
            return Err(Error::NotReady);
        }

        // SAFETY: In `OnlyResult` no continuation is registered, so no
        // dispatch can consume the slot; registering one is a consumer-side
        // call, which the caller guarantees is not running concurrently.
        let slot = unsafe { &mut *self.result.get() };

        slot.as_mut().ok_or(Error::NotReady)
    }

    /// Binds (or replaces) the executor the continuation will dispatch onto.
    pub(crate) fn set_executor(&self, executor: Option<Arc<dyn Executor>>, priority: i8) {
        let mut binding = self.executor.lock();
        binding.executor = executor;
        binding.priority = priority;
    }

    pub(crate) fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.executor.lock().executor.clone()
    }

    /// Requests an interrupt: advisory, single-shot, dropped once a result
    /// exists. Invokes the producer's handler if one is already installed.
    ///
    /// Call only from the consumer side.
    pub(crate) fn raise(&self, failure: Failure) {
        let handler = {
            let mut channel = self.interrupt.lock();

            if channel.pending.is_some() || self.has_result() {
                return;
            }

            channel.pending = Some(failure.clone());
            channel.handler.take()
        };

        // The lock is released before running user code; who invokes was
        // already decided under the lock, so the handler still runs at most
        // once.
        if let Some(handler) = handler {
            trace!("delivering interrupt to the installed handler");
            handler(failure);
        }
    }

    /// Installs the producer's interrupt handler, or invokes it immediately
    /// if an interrupt already landed. Dropped once a result exists.
    ///
    /// Call only from the producer side.
    pub(crate) fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut channel = self.interrupt.lock();

        if self.has_result() {
            return;
        }

        if let Some(pending) = channel.pending.clone() {
            drop(channel);

            trace!("interrupt already pending; delivering to the new handler");
            handler(pending);
        } else {
            channel.handler = Some(handler);
        }
    }

    /// Adds a transient attachment (an executor job keeping the core alive).
    pub(crate) fn attach_one(&self) {
        assert_ne!(
            0,
            self.attached.fetch_add(1, Ordering::Acquire),
            "attachment resurrection - the core was already destroyed"
        );
    }

    /// Releases one attachment; the last one out destroys the core.
    pub(crate) fn detach_one(core: NonNull<Self>) {
        // SAFETY: The caller owns an attachment, so the core is still alive.
        let previous = unsafe { core.as_ref() }
            .attached
            .fetch_sub(1, Ordering::Release);

        debug_assert!(
            (1..=3).contains(&previous),
            "attachment count out of range on detach: {previous}"
        );

        if previous == 1 {
            // All other holders' writes must be visible before the
            // destructor runs.
            atomic::fence(Ordering::Acquire);

            // SAFETY: We observed the count reach zero, so we are the last
            // holder and nothing can reach the core after this point. It was
            // allocated via `Box` in `CoreRef`.
            drop(unsafe { Box::from_raw(core.as_ptr()) });
        }
    }

    /// Consumer-handle destruction: force dispatch of anything the consumer
    /// abandoned, then release the consumer attachment.
    #[cfg_attr(test, mutants::skip)] // Destruction protocol - mutation causes leaks or UB under Miri.
    pub(crate) fn detach_consumer(core: NonNull<Self>) {
        // SAFETY: The caller owns the consumer attachment, so the core is
        // still alive; the borrow ends before the detach below.
        unsafe { core.as_ref() }.activate();

        Self::detach_one(core);
    }

    /// Producer-handle destruction: if no result was ever supplied, deliver a
    /// broken promise, then release the producer attachment.
    #[cfg_attr(test, mutants::skip)] // Destruction protocol - mutation causes leaks or UB under Miri.
    pub(crate) fn detach_producer(core: NonNull<Self>) {
        // SAFETY: The caller owns the producer attachment, so the core is
        // still alive; the borrow ends before the detach below.
        let this = unsafe { core.as_ref() };

        if !this.has_result() {
            trace!("producer detached without a result; delivering a broken promise");
            this.set_result(Outcome::Failure(Failure::from(Error::BrokenPromise)));
        }

        Self::detach_one(core);
    }

    #[cfg(test)]
    pub(crate) fn state_snapshot(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn attachments(&self) -> u8 {
        self.attached.load(Ordering::Acquire)
    }
}

// SAFETY: We are a synchronization primitive, so we do our own
// synchronization: the slots follow the single-writer/single-reader protocol
// published through the state word, and the side channels are lock-guarded.
unsafe impl<T> Sync for Core<T> where T: Send + 'static {}
