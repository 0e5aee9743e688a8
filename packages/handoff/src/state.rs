//! Core state machine constants. Every core starts in the `Start` state with
//! both the producer and consumer handles attached (the factory never creates
//! a core without both, except for the pre-resolved constructor which starts
//! in `OnlyResult` with just the consumer).
//!
//! The following states exist:
//!
//! ```text
//!               set_callback                 set_result
//!    Start ─────────────────▶ OnlyCallback ──────────▶ Armed
//!      │                                                 │
//!      │ set_result                 set_callback         │ maybe_callback
//!      ▼                                                 ▼ (when active)
//!   OnlyResult ─────────────────▶ Armed ─────────────▶ Done
//! ```
//!
//! The producer side drives the `set_result` edges, the consumer side drives
//! the `set_callback` edges, and whichever of the two reaches `Armed` attempts
//! the final transition. The continuation runs exactly on the `Armed -> Done`
//! edge, and that edge is taken by at most one thread (it is a compare-exchange
//! and `Done` is terminal).
//!
//! Each ingress writes its payload slot *before* publishing the new state, and
//! publishes with release semantics; every observer loads with acquire
//! semantics. The two arming edges additionally acquire, because the winner of
//! the arming race goes on to consume the slot written by the other side.

pub(crate) const STATE_START: u8 = 0;
pub(crate) const STATE_ONLY_RESULT: u8 = 1;
pub(crate) const STATE_ONLY_CALLBACK: u8 = 2;
pub(crate) const STATE_ARMED: u8 = 3;
pub(crate) const STATE_DONE: u8 = 4;
