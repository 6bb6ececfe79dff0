//! Tracked Wrapper
//!
//! A [`Tracked`] wraps a plain [`Object`] and observes every read and write
//! that goes through it. This is the interception layer the engine is driven
//! by:
//!
//! - `get(key)` registers the current effect (if any) in the key's
//!   dependency set before returning the value.
//! - `set(key, value)` stores the value (wrapping nested objects so their
//!   reads are also tracked) and triggers the key's dependency set.
//!
//! Dependency sets are created lazily, one per key, on the first tracked
//! read. Each set's cleanup callback removes the key's entry once no effect
//! watches it anymore, so an unwatched slot costs nothing.
//!
//! Construction goes through the identity cache (see
//! [`wrap`](super::cache::wrap)): a given object has at most one wrapper.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::cache;
use super::value::{Object, Value, ValueError};
use crate::reactive::context;
use crate::reactive::dep::{track_effect, trigger_effects, Dep};

pub(crate) struct TrackedInner {
    raw: Object,

    /// One dependency set per observed key, created lazily.
    deps: RwLock<HashMap<String, Arc<Dep>>>,

    /// Used by each set's cleanup callback to delete its own entry.
    weak_self: Weak<TrackedInner>,
}

impl TrackedInner {
    fn dep_for(&self, key: &str) -> Arc<Dep> {
        if let Some(dep) = self.deps.read().get(key) {
            return dep.clone();
        }

        let mut deps = self.deps.write();
        deps.entry(key.to_owned())
            .or_insert_with(|| {
                let target = self.weak_self.clone();
                let key = key.to_owned();
                Arc::new(Dep::new(move || {
                    // Last watcher left: drop the slot's bookkeeping.
                    if let Some(inner) = target.upgrade() {
                        inner.deps.write().remove(&key);
                    }
                }))
            })
            .clone()
    }
}

impl Drop for TrackedInner {
    fn drop(&mut self) {
        cache::evict(self.raw.identity());
    }
}

/// A tracked view over an [`Object`].
///
/// Cloning shares the wrapper; all clones observe through the same
/// dependency sets. Equality is wrapper identity, so the referential
/// stability of [`wrap`](super::cache::wrap) is directly observable:
/// `wrap(x) == wrap(x)`.
pub struct Tracked {
    inner: Arc<TrackedInner>,
}

impl Tracked {
    /// Wrap `raw`, reusing the cached wrapper when one exists.
    pub(crate) fn attach(raw: Object) -> Self {
        let inner = cache::intern(&raw, || {
            tracing::debug!(object = raw.identity(), "object wrapped");
            Arc::new_cyclic(|weak| TrackedInner {
                raw: raw.clone(),
                deps: RwLock::new(HashMap::new()),
                weak_self: weak.clone(),
            })
        });

        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<TrackedInner>) -> Self {
        Self { inner }
    }

    /// The underlying plain object. Reads through it are not tracked.
    pub fn raw(&self) -> &Object {
        &self.inner.raw
    }

    /// Read a slot, registering the current effect as a reader.
    ///
    /// Outside of any effect run this is just a read.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(effect) = context::current_effect() {
            let dep = self.inner.dep_for(key);
            track_effect(&effect, &dep);
        }

        self.inner.raw.get(key)
    }

    /// Like [`get`](Self::get), but a missing key is an error.
    pub fn try_get(&self, key: &str) -> Result<Value, ValueError> {
        self.get(key)
            .ok_or_else(|| ValueError::MissingKey(key.to_owned()))
    }

    /// Write a slot, notifying every effect that read it.
    ///
    /// Object-shaped values are wrapped on the way in, so nested reads are
    /// also tracked. Returns whether the stored value actually changed; a
    /// write of an equal value does not trigger.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = cache::to_tracked(value.into());

        let previous = self.inner.raw.insert(key.clone(), value.clone());
        if previous.as_ref() == Some(&value) {
            return false;
        }

        tracing::trace!(object = self.inner.raw.identity(), key = %key, "slot written");

        let dep = self.inner.deps.read().get(&key).cloned();
        if let Some(dep) = dep {
            trigger_effects(&dep);
        }

        true
    }

    /// Number of effects currently watching `key`.
    pub fn watcher_count(&self, key: &str) -> usize {
        self.inner
            .deps
            .read()
            .get(key)
            .map(|dep| dep.len())
            .unwrap_or(0)
    }

    /// Whether `key` has live per-slot bookkeeping (any watcher ever
    /// registered and not yet cleaned up).
    pub fn is_observed(&self, key: &str) -> bool {
        self.inner.deps.read().contains_key(key)
    }

    /// Snapshot of the keys in insertion order. Untracked.
    pub fn keys(&self) -> Vec<String> {
        self.inner.raw.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.raw.is_empty()
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("len", &self.inner.raw.len())
            .field("observed_keys", &self.inner.deps.read().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
