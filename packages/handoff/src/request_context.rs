//! Ambient request context, propagated across the dispatch boundary.
//!
//! A request context is an immutable handle to a mutable bag of values
//! (tracing metadata, request identifiers) that follows a logical request
//! across threads. The current context lives in a thread-local slot; the core
//! snapshots it when a continuation is registered and restores the snapshot
//! around the continuation's invocation, on whichever thread that ends up
//! happening.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

thread_local! {
    static AMBIENT: RefCell<Option<Arc<RequestContext>>> = const { RefCell::new(None) };
}

/// A bag of request-scoped values with snapshot / restore semantics.
#[derive(Default)]
pub struct RequestContext {
    values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RequestContext {
    /// Creates a fresh, empty context.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores a value under `key` in this context, replacing any previous
    /// value under the same key.
    pub fn insert(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.values.write().insert(key.into(), value);
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.read().get(key).map(Arc::clone)
    }

    /// Snapshots the calling thread's current ambient context.
    #[must_use]
    pub fn save() -> Option<Arc<Self>> {
        AMBIENT.with_borrow(|ambient| ambient.clone())
    }

    /// Installs `context` as the calling thread's ambient context and returns
    /// the previously installed one.
    pub fn set(context: Option<Arc<Self>>) -> Option<Arc<Self>> {
        AMBIENT.with_borrow_mut(|ambient| std::mem::replace(ambient, context))
    }

    /// Installs `context` for the duration of the returned guard, restoring
    /// the previous ambient context when the guard drops.
    pub(crate) fn enter(context: Option<Arc<Self>>) -> ContextGuard {
        ContextGuard {
            previous: Self::set(context),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("keys", &self.values.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Restores the previous ambient context on drop.
pub(crate) struct ContextGuard {
    previous: Option<Arc<RequestContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        RequestContext::set(self.previous.take());
    }
}
