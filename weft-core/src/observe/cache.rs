//! Wrapper Identity Cache
//!
//! Maps each plain [`Object`] to its one [`Tracked`] wrapper, keyed by the
//! object's storage identity. The cache holds weak references so it never
//! keeps a wrapper alive by itself; a wrapper's drop removes its own entry.
//!
//! The guarantee this module provides is referential stability: wrapping the
//! same object twice yields the same wrapper, no matter how many handles to
//! the object exist or where the wraps happen.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::tracked::{Tracked, TrackedInner};
use super::value::{Object, Value};

static WRAPPERS: OnceLock<DashMap<usize, Weak<TrackedInner>>> = OnceLock::new();

fn wrappers() -> &'static DashMap<usize, Weak<TrackedInner>> {
    WRAPPERS.get_or_init(DashMap::new)
}

pub(crate) fn lookup(raw: &Object) -> Option<Tracked> {
    let inner = wrappers().get(&raw.identity())?.upgrade()?;
    Some(Tracked::from_inner(inner))
}

/// Get the cached wrapper for `raw`, or install the one `create` builds.
///
/// Lookup and insertion happen under one entry lock, so concurrent wraps of
/// the same object agree on a single wrapper.
pub(crate) fn intern(
    raw: &Object,
    create: impl FnOnce() -> Arc<TrackedInner>,
) -> Arc<TrackedInner> {
    match wrappers().entry(raw.identity()) {
        Entry::Occupied(mut occupied) => {
            if let Some(existing) = occupied.get().upgrade() {
                return existing;
            }
            // The previous wrapper is mid-drop; replace its dead entry.
            let inner = create();
            occupied.insert(Arc::downgrade(&inner));
            inner
        }
        Entry::Vacant(vacant) => {
            let inner = create();
            vacant.insert(Arc::downgrade(&inner));
            inner
        }
    }
}

/// Called from the wrapper's drop. Only removes the entry when it is still
/// dead: a racing re-wrap may already have installed a fresh wrapper under
/// the same identity, and that one must survive.
pub(crate) fn evict(identity: usize) {
    let removed = wrappers().remove_if(&identity, |_, weak| weak.strong_count() == 0);
    if removed.is_some() {
        tracing::trace!(object = identity, "wrapper evicted");
    }
}

/// Wrap a value for observation.
///
/// Objects become [`Tracked`] wrappers; already-tracked values and scalars
/// pass through unchanged. Wrapping is idempotent and identity-stable:
/// `wrap(x) == wrap(x)` for the same underlying object.
pub fn wrap(value: Value) -> Value {
    match value {
        Value::Object(raw) => Value::Tracked(Tracked::attach(raw)),
        other => other,
    }
}

/// Ensure a value stored into tracked state is itself observable.
///
/// Same conversion as [`wrap`]; named for the store path, where it runs on
/// every written value.
pub fn to_tracked(value: Value) -> Value {
    wrap(value)
}

/// Whether `value` is a tracked wrapper.
pub fn is_tracked(value: &Value) -> bool {
    matches!(value, Value::Tracked(_))
}
