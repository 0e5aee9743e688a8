//! Type-erased storage for the registered continuation.
//!
//! Most continuations are small closures (a couple of captured pointers), so
//! the core stores them in place when they fit into a fixed buffer of eight
//! machine words, avoiding a heap allocation on the hot path. Larger or
//! over-aligned closures fall back to a box. Either way the continuation is
//! consumed by invocation: the inline variant reads the closure out of the
//! buffer by value, which also destroys it in place.

use std::mem::{ManuallyDrop, MaybeUninit, align_of, size_of};
use std::ptr;

use crate::Outcome;

/// Number of machine words of in-place continuation storage.
pub(crate) const INLINE_WORDS: usize = 8;

const INLINE_BYTES: usize = INLINE_WORDS * size_of::<usize>();

/// A continuation of signature `Outcome<T> -> ()`, stored inline when small
/// enough and boxed otherwise.
pub(crate) enum Continuation<T> {
    Inline(InlineContinuation<T>),
    Boxed(Box<dyn FnOnce(Outcome<T>) + Send>),
}

impl<T> Continuation<T>
where
    T: Send + 'static,
{
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        if size_of::<F>() <= INLINE_BYTES && align_of::<F>() <= align_of::<usize>() {
            Self::Inline(InlineContinuation::new(f))
        } else {
            Self::Boxed(Box::new(f))
        }
    }

    /// Invokes the continuation, consuming it.
    pub(crate) fn invoke(self, outcome: Outcome<T>) {
        match self {
            Self::Inline(inline) => inline.invoke(outcome),
            Self::Boxed(f) => f(outcome),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// A closure stored in place, erased down to its invoke and drop entry points.
pub(crate) struct InlineContinuation<T> {
    /// Holds the bytes of the stored closure. Only the leading
    /// `size_of::<F>()` bytes are initialized; presence is tracked by the
    /// enclosing `Continuation` being alive at all.
    storage: [MaybeUninit<usize>; INLINE_WORDS],

    /// Reads the closure out of the storage and invokes it. The storage is
    /// uninitialized afterwards.
    invoke_erased: unsafe fn(*mut u8, Outcome<T>),

    /// Drops the closure in the storage without invoking it.
    drop_erased: unsafe fn(*mut u8),
}

impl<T> InlineContinuation<T>
where
    T: Send + 'static,
{
    fn new<F>(f: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        debug_assert!(size_of::<F>() <= INLINE_BYTES);
        debug_assert!(align_of::<F>() <= align_of::<usize>());

        let mut storage = [MaybeUninit::uninit(); INLINE_WORDS];

        // SAFETY: The buffer is large enough and at least as aligned as `F`
        // (checked above), and we have exclusive access to it.
        unsafe {
            ptr::write(storage.as_mut_ptr().cast::<F>(), f);
        }

        Self {
            storage,
            invoke_erased: invoke_erased::<T, F>,
            drop_erased: drop_erased::<F>,
        }
    }

    fn invoke(self, outcome: Outcome<T>) {
        // Invocation consumes the stored closure, so the Drop impl (which
        // would destroy it a second time) must be suppressed.
        let mut this = ManuallyDrop::new(self);

        // SAFETY: The storage holds a live closure of the type the erased fn
        // expects - both were set together in `new` and nothing has consumed
        // the closure yet (consumption takes `self` by value).
        unsafe {
            (this.invoke_erased)(this.storage.as_mut_ptr().cast(), outcome);
        }
    }
}

impl<T> Drop for InlineContinuation<T> {
    fn drop(&mut self) {
        // SAFETY: Drop only runs when `invoke` has not (it forgets `self`),
        // so the storage still holds the live closure the erased fn expects.
        unsafe {
            (self.drop_erased)(self.storage.as_mut_ptr().cast());
        }
    }
}

// SAFETY: The storage only ever holds a closure that was `Send` at
// construction time (enforced by the bound on `new`), and the fn pointers
// carry no state.
unsafe impl<T> Send for InlineContinuation<T> {}

unsafe fn invoke_erased<T, F>(storage: *mut u8, outcome: Outcome<T>)
where
    F: FnOnce(Outcome<T>),
{
    // SAFETY: The caller guarantees the storage holds a live `F`. Reading it
    // out by value transfers ownership, so the storage is dead afterwards.
    let f = unsafe { ptr::read(storage.cast::<F>()) };
    f(outcome);
}

unsafe fn drop_erased<F>(storage: *mut u8) {
    // SAFETY: The caller guarantees the storage holds a live `F` that nothing
    // else will access again.
    unsafe {
        ptr::drop_in_place(storage.cast::<F>());
    }
}
