//! Tracking Context
//!
//! The tracking context records which effect is currently running. This is
//! what makes dependency tracking automatic: when an observed slot is read,
//! the interception layer can ask for the current effect and register it as
//! a reader of that slot.
//!
//! # Implementation
//!
//! Each thread holds a single "current effect" slot. Entering a run saves the
//! previous occupant and installs the new effect; leaving restores it. The
//! save/restore is done by a guard whose `Drop` runs on every exit path, so a
//! panicking computation can never leave a stale current effect behind.
//!
//! Nested runs (an effect whose computation runs another effect) therefore
//! observe correct stack discipline without an explicit stack structure.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use super::effect::AnyEffect;

thread_local! {
    static CURRENT_EFFECT: RefCell<Option<Weak<dyn AnyEffect>>> = RefCell::new(None);
}

/// Guard that restores the previous current effect when dropped.
///
/// Holding the previous occupant in the guard (rather than in a side stack)
/// keeps the invariant local: whoever replaced the slot restores it.
pub(crate) struct TrackingGuard {
    prev: Option<Weak<dyn AnyEffect>>,
}

impl TrackingGuard {
    /// Install `effect` as the current effect, saving the previous one.
    pub(crate) fn enter(effect: Weak<dyn AnyEffect>) -> Self {
        let prev = CURRENT_EFFECT.with(|slot| slot.borrow_mut().replace(effect));
        Self { prev }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        CURRENT_EFFECT.with(|slot| {
            *slot.borrow_mut() = self.prev.take();
        });
    }
}

/// Get the effect currently being tracked on this thread, if any.
///
/// Returns `None` outside of any effect run, or when the current effect has
/// already been dropped elsewhere.
pub fn current_effect() -> Option<Arc<dyn AnyEffect>> {
    CURRENT_EFFECT.with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
}

/// Check whether an effect run is in progress on this thread.
pub fn is_tracking() -> bool {
    CURRENT_EFFECT.with(|slot| slot.borrow().is_some())
}
