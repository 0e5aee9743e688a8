use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::Outcome;
use crate::core::Core;

/// A handle endpoint's reference to the core it shares with its counterpart.
///
/// The core lives on the heap and destroys itself when its attachment count
/// reaches zero; each `CoreRef` stands for one of those attachments, and the
/// endpoint that owns it must release the attachment from its own `Drop`
/// (via the `Core::detach_*` family) - `CoreRef` itself is just the pointer.
pub(crate) struct CoreRef<T>
where
    T: Send + 'static,
{
    core: NonNull<Core<T>>,
}

impl<T> CoreRef<T>
where
    T: Send + 'static,
{
    /// Heap-allocates a fresh core and returns the producer-side and
    /// consumer-side references to it, matching its initial attachment
    /// count of two.
    #[must_use]
    pub(crate) fn new_pair() -> (Self, Self) {
        let core = NonNull::from(Box::leak(Box::new(Core::new())));

        (Self { core }, Self { core })
    }

    /// Heap-allocates a core that already carries its result. Only a
    /// consumer-side reference exists, matching the single attachment.
    #[must_use]
    pub(crate) fn new_resolved(outcome: Outcome<T>) -> Self {
        let core = NonNull::from(Box::leak(Box::new(Core::with_result(outcome))));

        Self { core }
    }

    pub(crate) fn ptr(&self) -> NonNull<Core<T>> {
        self.core
    }
}

impl<T> Deref for CoreRef<T>
where
    T: Send + 'static,
{
    type Target = Core<T>;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The owning endpoint holds an attachment until its Drop
        // releases it, and this reference does not outlive the endpoint.
        unsafe { self.core.as_ref() }
    }
}

// SAFETY: The core is Sync (it does its own synchronization), so the pointer
// may move to another thread with its endpoint.
unsafe impl<T> Send for CoreRef<T> where T: Send + 'static {}

impl<T> fmt::Debug for CoreRef<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRef").field("core", &self.core).finish()
    }
}

/// Keeps the core alive across an executor dispatch.
///
/// Holds the transient third attachment: taken when the dispatch job is
/// created, released when the job is dropped - which happens after the job
/// has run, or without it ever running if the executor rejected it. Either
/// way the attachment is rescinded exactly once.
pub(crate) struct DispatchGuard<T>
where
    T: Send + 'static,
{
    core: NonNull<Core<T>>,
}

impl<T> DispatchGuard<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(core: &Core<T>) -> Self {
        core.attach_one();

        Self {
            core: NonNull::from(core),
        }
    }

    pub(crate) fn core(&self) -> &Core<T> {
        // SAFETY: We hold an attachment, so the core is alive for as long as
        // this guard is.
        unsafe { self.core.as_ref() }
    }
}

impl<T> Drop for DispatchGuard<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        Core::detach_one(self.core);
    }
}

// SAFETY: The guard is an attachment to a Sync core; the job that owns it may
// run on any executor thread.
unsafe impl<T> Send for DispatchGuard<T> where T: Send + 'static {}
