//! Dependency Sets
//!
//! A [`Dep`] is the set of effects currently depending on one observable
//! slot (one property, one index, one cell). It is owned by whoever owns the
//! slot (the interception layer creates one lazily per slot), but its
//! membership is only ever manipulated through [`track_effect`] and
//! [`trigger_effects`].
//!
//! # Registration protocol
//!
//! Each entry carries the run-counter stamp at which its effect last
//! registered. Tracking the same slot twice in one run is a no-op (the stamp
//! matches). Across runs, the effect walks its ordered dependency list with a
//! cursor: when reads occur in the same order as the previous run, every
//! registration is a compare-and-advance that mutates no set at all. Only
//! positions whose slot changed pay for an eviction.
//!
//! # Trigger protocol
//!
//! A write collects the registered effects under the lock, releases it, and
//! only then promotes dirty levels and invokes schedulers. This keeps user
//! code (schedulers, re-runs) from ever executing under a `Dep` lock.
//! Effects that are mid-run are marked stale but never scheduled; that is
//! the reentrancy guard.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::effect::{AnyEffect, EffectId};

struct DepEntry {
    /// Run counter of the effect at its last registration.
    stamp: u64,
    effect: Weak<dyn AnyEffect>,
}

/// The set of effects depending on a single observable slot.
pub struct Dep {
    entries: RwLock<IndexMap<EffectId, DepEntry>>,

    /// Invoked whenever a removal leaves the set empty, letting the slot's
    /// owner drop its bookkeeping for an unwatched slot.
    on_empty: Box<dyn Fn() + Send + Sync>,
}

impl Dep {
    /// Create an empty dependency set with the given cleanup callback.
    pub fn new(on_empty: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            on_empty: Box::new(on_empty),
        }
    }

    /// Number of effects currently registered.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no effect is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deregister an effect, firing the cleanup callback if the set empties.
    pub(crate) fn remove(&self, id: EffectId) {
        let emptied = {
            let mut entries = self.entries.write();
            let removed = entries.swap_remove(&id).is_some();
            removed && entries.is_empty()
        };

        if emptied {
            (self.on_empty)();
        }
    }

    /// Deregister an effect only if its stamp predates `track_id`.
    ///
    /// Reconciliation calls this for sets displaced from their old cursor
    /// positions. A matching stamp means the effect re-read this slot during
    /// the current run (in some other position), so the registration must
    /// survive.
    pub(crate) fn remove_if_stale(&self, id: EffectId, track_id: u64) {
        let emptied = {
            let mut entries = self.entries.write();
            let stale = matches!(entries.get(&id), Some(entry) if entry.stamp != track_id);
            if stale {
                entries.swap_remove(&id);
                entries.is_empty()
            } else {
                false
            }
        };

        if emptied {
            (self.on_empty)();
        }
    }

    #[cfg(test)]
    pub(crate) fn stamp_of(&self, id: EffectId) -> Option<u64> {
        self.entries.read().get(&id).map(|entry| entry.stamp)
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep").field("len", &self.len()).finish()
    }
}

/// Register `effect` as a reader of the slot guarded by `dep`.
///
/// Called by the interception layer during a read, with the current effect.
/// Idempotent within one run: re-reading the same slot costs one stamp
/// comparison. Across runs, a slot read in the same position as last run is
/// a compare-and-advance; a position mismatch evicts the effect from the
/// set previously held there.
pub fn track_effect(effect: &Arc<dyn AnyEffect>, dep: &Arc<Dep>) {
    let track_id = effect.track_id();

    {
        let mut entries = dep.entries.write();
        match entries.get_mut(&effect.id()) {
            Some(entry) if entry.stamp == track_id => return,
            Some(entry) => entry.stamp = track_id,
            None => {
                entries.insert(
                    effect.id(),
                    DepEntry {
                        stamp: track_id,
                        effect: Arc::downgrade(effect),
                    },
                );
            }
        }
    }

    if let Some(evicted) = effect.record_dep(dep.clone()) {
        tracing::trace!(effect = ?effect.id(), "dependency slot evicted");
        evicted.remove_if_stale(effect.id(), track_id);
    }
}

/// Notify every effect registered in `dep` that the slot changed.
///
/// Called by the interception layer on a write. Iteration order across
/// distinct effects is unspecified. Each registered effect has its dirty
/// level promoted to fully dirty; effects not currently running get their
/// scheduler invoked (an effect without a scheduler is merely marked stale).
/// Entries whose effect has been dropped are pruned.
pub fn trigger_effects(dep: &Dep) {
    let (targets, emptied) = {
        let mut entries = dep.entries.write();
        let had_entries = !entries.is_empty();
        entries.retain(|_, entry| entry.effect.strong_count() > 0);
        let targets: Vec<Arc<dyn AnyEffect>> = entries
            .values()
            .filter_map(|entry| entry.effect.upgrade())
            .collect();
        (targets, had_entries && entries.is_empty())
    };

    if emptied {
        (dep.on_empty)();
    }

    tracing::trace!(watchers = targets.len(), "trigger");

    for effect in targets {
        effect.promote_dirty();

        if effect.is_running() {
            // Reentrancy guard: an effect must never schedule itself from
            // inside its own run.
            tracing::trace!(effect = ?effect.id(), "skipped: effect is running");
            continue;
        }

        effect.schedule();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context;
    use crate::reactive::effect::{effect, effect_with, Effect, EffectOptions};
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    fn plain_dep() -> Arc<Dep> {
        Arc::new(Dep::new(|| {}))
    }

    /// Read the given dep the way an interception layer would: a no-op
    /// when there is no current effect.
    fn read(dep: &Arc<Dep>) {
        if let Some(current) = context::current_effect() {
            track_effect(&current, dep);
        }
    }

    #[test]
    fn track_registers_membership_once_per_run() {
        let handle = Effect::new(|| ());
        let any = handle.as_any_effect();
        let dep = plain_dep();

        track_effect(&any, &dep);
        assert_eq!(dep.len(), 1);
        assert_eq!(handle.dependency_count(), 1);

        // Same run, same stamp: nothing changes
        track_effect(&any, &dep);
        assert_eq!(dep.len(), 1);
        assert_eq!(handle.dependency_count(), 1);
    }

    #[test]
    fn steady_state_rerun_keeps_membership() {
        let dep_a = plain_dep();
        let dep_b = plain_dep();

        let handle = effect({
            let dep_a = dep_a.clone();
            let dep_b = dep_b.clone();
            move || {
                read(&dep_a);
                read(&dep_b);
            }
        });

        assert_eq!(dep_a.len(), 1);
        assert_eq!(dep_b.len(), 1);
        assert_eq!(handle.dependency_count(), 2);

        let stamp_before = dep_a.stamp_of(handle.id()).unwrap();

        handle.run();

        // Membership unchanged, only the stamps advanced
        assert_eq!(dep_a.len(), 1);
        assert_eq!(dep_b.len(), 1);
        assert_eq!(handle.dependency_count(), 2);
        assert!(dep_a.stamp_of(handle.id()).unwrap() > stamp_before);
    }

    #[test]
    fn unread_dependency_is_shed_and_cleanup_fires() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let dep_a = plain_dep();
        let dep_b = {
            let cleaned = cleaned.clone();
            Arc::new(Dep::new(move || {
                cleaned.store(true, Ordering::SeqCst);
            }))
        };

        let read_b = Arc::new(AtomicBool::new(true));

        let handle = effect({
            let dep_a = dep_a.clone();
            let dep_b = dep_b.clone();
            let read_b = read_b.clone();
            move || {
                read(&dep_a);
                if read_b.load(Ordering::SeqCst) {
                    read(&dep_b);
                }
            }
        });

        assert_eq!(dep_b.len(), 1);
        assert_eq!(handle.dependency_count(), 2);

        // Second run no longer reads b
        read_b.store(false, Ordering::SeqCst);
        handle.run();

        assert_eq!(dep_b.len(), 0);
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(handle.dependency_count(), 1);
        assert_eq!(dep_a.len(), 1);
    }

    #[test]
    fn changed_read_order_evicts_only_mismatched_slots() {
        let dep_a = plain_dep();
        let dep_b = plain_dep();
        let swapped = Arc::new(AtomicBool::new(false));

        let handle = effect({
            let dep_a = dep_a.clone();
            let dep_b = dep_b.clone();
            let swapped = swapped.clone();
            move || {
                if swapped.load(Ordering::SeqCst) {
                    read(&dep_b);
                } else {
                    read(&dep_a);
                    read(&dep_b);
                }
            }
        });

        assert_eq!(handle.dependency_count(), 2);

        // Now only b is read, landing in a's old slot position
        swapped.store(true, Ordering::SeqCst);
        handle.run();

        assert_eq!(handle.dependency_count(), 1);
        assert_eq!(dep_a.len(), 0);
        assert_eq!(dep_b.len(), 1);
    }

    #[test]
    fn trigger_promotes_dirty_and_invokes_scheduler() {
        let dep = plain_dep();
        let scheduled = Arc::new(AtomicI32::new(0));

        let handle = effect_with(
            {
                let dep = dep.clone();
                move || read(&dep)
            },
            EffectOptions {
                scheduler: Some({
                    let scheduled = scheduled.clone();
                    Arc::new(move || {
                        scheduled.fetch_add(1, Ordering::SeqCst);
                    })
                }),
                lazy: false,
            },
        );

        assert!(!handle.is_dirty());

        trigger_effects(&dep);
        assert!(handle.is_dirty());
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);

        // Already dirty: triggers keep invoking the scheduler
        trigger_effects(&dep);
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn trigger_without_scheduler_only_marks_stale() {
        let dep = plain_dep();

        let handle = Effect::new({
            let dep = dep.clone();
            move || read(&dep)
        });
        handle.run();
        assert!(!handle.is_dirty());

        trigger_effects(&dep);

        assert!(handle.is_dirty());
        // A later direct run observes and clears the staleness
        handle.run();
        assert!(!handle.is_dirty());
    }

    #[test]
    fn trigger_skips_effect_during_its_own_run() {
        let dep = plain_dep();
        let scheduled = Arc::new(AtomicI32::new(0));

        let handle = effect_with(
            {
                let dep = dep.clone();
                move || {
                    read(&dep);
                    // Write to the slot we just read
                    trigger_effects(&dep);
                }
            },
            EffectOptions {
                scheduler: Some({
                    let scheduled = scheduled.clone();
                    Arc::new(move || {
                        scheduled.fetch_add(1, Ordering::SeqCst);
                    })
                }),
                lazy: false,
            },
        );

        // The in-run trigger must not have scheduled the effect
        assert_eq!(scheduled.load(Ordering::SeqCst), 0);
        // It did mark it stale on the way out of promote
        assert!(handle.is_dirty());

        // An independent write after the run does schedule
        trigger_effects(&dep);
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_effect_is_removed_from_sets() {
        let dep = plain_dep();

        let handle = effect({
            let dep = dep.clone();
            move || read(&dep)
        });
        assert_eq!(dep.len(), 1);

        drop(handle);
        assert_eq!(dep.len(), 0);
    }

    #[test]
    fn stop_drops_all_edges_and_fires_cleanup() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let dep = {
            let cleaned = cleaned.clone();
            Arc::new(Dep::new(move || {
                cleaned.store(true, Ordering::SeqCst);
            }))
        };

        let handle = effect({
            let dep = dep.clone();
            move || read(&dep)
        });
        assert_eq!(dep.len(), 1);

        handle.stop();

        assert_eq!(dep.len(), 0);
        assert!(cleaned.load(Ordering::SeqCst));

        // A stopped run installs no current effect, so nothing re-registers
        handle.run();
        assert_eq!(dep.len(), 0);
    }
}
