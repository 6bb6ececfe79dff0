//! Effect Implementation
//!
//! An effect is a re-runnable computation that remembers which observed slots
//! it read during its last run, and gets marked stale (and optionally
//! scheduled) when any of them changes.
//!
//! # How a run works
//!
//! 1. The dirty level drops to `Clean` (re-running satisfies the current
//!    staleness request, even before the new dependencies are known).
//!
//! 2. The effect becomes the thread's current effect; the previous occupant
//!    is saved and restored on exit.
//!
//! 3. The dependency cursor resets to zero and the track id is bumped, so
//!    every registration stamp from the previous run reads as stale.
//!
//! 4. The computation runs. Every tracked read lands in
//!    [`track_effect`](super::dep::track_effect), which fills the dependency
//!    list back in from position zero.
//!
//! 5. On the way out (success or panic) the running depth is decremented,
//!    dependency sets beyond the final cursor are forgotten (dynamic
//!    dependency shedding), and the previous current effect is restored. All
//!    of this happens in `Drop` impls, so a panicking computation cannot
//!    leave the engine inconsistent.
//!
//! # Recursion guard
//!
//! A computation that writes a slot it also reads would otherwise schedule
//! itself mid-run. The running-depth counter prevents that: triggers skip
//! scheduling any effect whose depth is nonzero.
//!
//! # Stopping
//!
//! `stop()` permanently deactivates the effect and drops every dependency
//! edge. A stopped effect still executes its computation when run directly,
//! but bypasses tracking entirely. Dropping the last handle behaves the same
//! way for registration purposes.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::TrackingGuard;
use super::dep::Dep;

/// Unique identifier for an effect.
///
/// Dependency sets key their membership by this id, so equality and hashing
/// are identity semantics regardless of how the effect is otherwise shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Staleness level of an effect, ordered from fresh to definitely stale.
///
/// The engine core only ever assigns `Clean` and `Dirty`. `MaybeDirty` exists
/// for a derived-value layer on top: triggering promotes any level below
/// `Dirty`, and that comparison contract must hold for any level added in
/// between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyLevel {
    /// The last computed result is still valid.
    Clean,

    /// A transitive input may have changed; not used by the core engine.
    MaybeDirty,

    /// An input definitely changed since the last run.
    Dirty,
}

/// Type-erased view of an effect, as stored inside dependency sets.
///
/// Dependency sets are heterogeneous: effects computing different value types
/// all register through this trait. The tracking and trigger protocols only
/// need the bookkeeping surface, never the computed value.
pub trait AnyEffect: Send + Sync {
    /// The effect's unique id.
    fn id(&self) -> EffectId;

    /// The run counter, bumped at the start of every tracked run.
    ///
    /// A dependency set stamps each registration with this value; a stamp
    /// that matches the current counter means "already tracked this run".
    fn track_id(&self) -> u64;

    /// Whether the effect is currently executing (running depth > 0).
    fn is_running(&self) -> bool;

    /// Current staleness level.
    fn dirty_level(&self) -> DirtyLevel;

    /// Raise the staleness level to `Dirty` if it is currently below it.
    fn promote_dirty(&self);

    /// Invoke the scheduler callback, if one is configured.
    fn schedule(&self);

    /// Place `dep` at the effect's dependency cursor and advance it.
    ///
    /// Returns the dependency set that previously occupied that slot when it
    /// differs from `dep`; the caller must deregister the effect from it.
    /// Part of the tracking protocol; not intended for general use.
    fn record_dep(&self, dep: Arc<Dep>) -> Option<Arc<Dep>>;
}

/// Ordered dependency slots plus the cursor marking how many are valid in
/// the current run.
struct DepList {
    slots: SmallVec<[Arc<Dep>; 4]>,
    cursor: usize,
}

struct EffectInner<T> {
    id: EffectId,

    /// The user computation.
    compute: Arc<dyn Fn() -> T + Send + Sync>,

    /// Invoked by triggers when the effect goes stale while not running.
    /// `None` means triggers only mark the effect stale.
    scheduler: Option<Arc<dyn Fn() + Send + Sync>>,

    /// False once stopped; a stopped effect never tracks again.
    active: AtomicBool,

    /// Reentrancy guard: nonzero while the computation is on the call stack.
    running: AtomicU32,

    /// Run counter; see [`AnyEffect::track_id`].
    track_id: AtomicU64,

    level: RwLock<DirtyLevel>,

    deps: Mutex<DepList>,

    /// Weak self-reference, used to install this effect as the thread's
    /// current effect and to build the default scheduler.
    weak_self: Weak<EffectInner<T>>,
}

impl<T: 'static> EffectInner<T> {
    fn run(&self) -> T {
        *self.level.write() = DirtyLevel::Clean;

        if !self.active.load(Ordering::SeqCst) {
            // Stopped: execute without any tracking.
            return (self.compute)();
        }

        tracing::trace!(effect = ?self.id, "run");

        let weak: Weak<dyn AnyEffect> = self.weak_self.clone();
        let _tracking = TrackingGuard::enter(weak);

        self.pre_clean();

        // Drops before `_tracking`: depth decrement and dependency
        // reconciliation happen while this effect is still current.
        let _running = RunGuard::new(self);

        (self.compute)()
    }
}

impl<T> EffectInner<T> {
    /// Reset the cursor and invalidate all prior registration stamps.
    fn pre_clean(&self) {
        self.deps.lock().cursor = 0;
        self.track_id.fetch_add(1, Ordering::SeqCst);
    }

    /// Forget every dependency set beyond the cursor.
    ///
    /// Anything past the cursor was not re-read this run; the effect is
    /// removed from each such set, firing the set's cleanup if it empties.
    fn post_clean(&self) {
        let dropped: SmallVec<[Arc<Dep>; 4]> = {
            let mut deps = self.deps.lock();
            let cursor = deps.cursor;
            if deps.slots.len() <= cursor {
                return;
            }
            deps.slots.drain(cursor..).collect()
        };

        tracing::trace!(effect = ?self.id, shed = dropped.len(), "dependencies shed");

        // Stamp-guarded: a set displaced to another cursor position during
        // this run keeps its registration.
        let track_id = self.track_id.load(Ordering::SeqCst);
        for dep in dropped {
            dep.remove_if_stale(self.id, track_id);
        }
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(effect = ?self.id, "stop");
            self.pre_clean();
            self.post_clean();
        }
    }
}

impl<T> Drop for EffectInner<T> {
    fn drop(&mut self) {
        // Same cleanup as stop(): a dropped effect must not linger in any
        // dependency set.
        let slots = std::mem::take(&mut self.deps.get_mut().slots);
        for dep in slots {
            dep.remove(self.id);
        }
    }
}

impl<T: 'static> AnyEffect for EffectInner<T> {
    fn id(&self) -> EffectId {
        self.id
    }

    fn track_id(&self) -> u64 {
        self.track_id.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    fn dirty_level(&self) -> DirtyLevel {
        *self.level.read()
    }

    fn promote_dirty(&self) {
        let mut level = self.level.write();
        if *level < DirtyLevel::Dirty {
            *level = DirtyLevel::Dirty;
        }
    }

    fn schedule(&self) {
        if let Some(scheduler) = &self.scheduler {
            (scheduler)();
        }
    }

    fn record_dep(&self, dep: Arc<Dep>) -> Option<Arc<Dep>> {
        let mut deps = self.deps.lock();
        let cursor = deps.cursor;

        let evicted = if cursor < deps.slots.len() {
            let slot = &mut deps.slots[cursor];
            if Arc::ptr_eq(slot, &dep) {
                // Steady state: same slot read in the same order as last
                // run. Advance without touching any set.
                None
            } else {
                Some(std::mem::replace(slot, dep))
            }
        } else {
            deps.slots.push(dep);
            None
        };

        deps.cursor = cursor + 1;
        evicted
    }
}

/// Decrements the running depth and reconciles dependencies when dropped,
/// so both happen even when the computation panics.
struct RunGuard<'a, T> {
    inner: &'a EffectInner<T>,
}

impl<'a, T> RunGuard<'a, T> {
    fn new(inner: &'a EffectInner<T>) -> Self {
        inner.running.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl<T> Drop for RunGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.post_clean();
    }
}

/// Handle to a reactive effect computing values of type `T`.
///
/// Cloning shares the underlying effect. Dropping the last handle removes
/// the effect from every dependency set it is registered in.
///
/// # Example
///
/// ```rust,ignore
/// let state = wrap(Object::new().with("n", 1).into()).into_tracked()?;
///
/// let doubled = effect({
///     let state = state.clone();
///     move || state.try_get("n").unwrap().as_int().unwrap() * 2
/// });
///
/// state.set("n", 21); // effect re-runs via its default scheduler
/// assert_eq!(doubled.run(), 42);
/// ```
pub struct Effect<T> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create an effect with no scheduler and no initial run.
    ///
    /// Triggers will mark it stale but never re-run it; a later direct
    /// `run()` (or a `dirty` read) observes the staleness.
    pub fn new(compute: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::build(Arc::new(compute), |_| None)
    }

    /// Create an effect with an explicit scheduler and no initial run.
    pub fn with_scheduler(
        compute: impl Fn() -> T + Send + Sync + 'static,
        scheduler: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self::build(Arc::new(compute), move |_| Some(scheduler))
    }

    fn with_default_scheduler(compute: Arc<dyn Fn() -> T + Send + Sync>) -> Self {
        Self::build(compute, |weak: &Weak<EffectInner<T>>| {
            let weak = weak.clone();
            Some(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let _ = inner.run();
                }
            }))
        })
    }

    fn build(
        compute: Arc<dyn Fn() -> T + Send + Sync>,
        make_scheduler: impl FnOnce(&Weak<EffectInner<T>>) -> Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| EffectInner {
            id: EffectId::new(),
            compute,
            scheduler: make_scheduler(weak),
            active: AtomicBool::new(true),
            running: AtomicU32::new(0),
            track_id: AtomicU64::new(0),
            level: RwLock::new(DirtyLevel::Dirty),
            deps: Mutex::new(DepList {
                slots: SmallVec::new(),
                cursor: 0,
            }),
            weak_self: weak.clone(),
        });
        Self { inner }
    }

    /// Run the computation, re-registering dependencies as they are read.
    ///
    /// Returns the computation's result. Panics from the computation
    /// propagate, with all engine bookkeeping still performed on the way out.
    /// A stopped effect executes the computation without any tracking.
    pub fn run(&self) -> T {
        self.inner.run()
    }

    /// Permanently deactivate the effect and drop all dependency edges.
    ///
    /// Idempotent. Does not interrupt an in-progress run.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the effect is stale (its last result may be invalid).
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty_level() == DirtyLevel::Dirty
    }

    /// Force the staleness flag.
    ///
    /// `true` raises the level to fully dirty; `false` resets it to clean.
    /// Exists so a derived-value layer can invalidate without a full run.
    pub fn set_dirty(&self, dirty: bool) {
        *self.inner.level.write() = if dirty {
            DirtyLevel::Dirty
        } else {
            DirtyLevel::Clean
        };
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// The effect's unique id.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Number of dependency sets the effect is currently registered in.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().slots.len()
    }

    /// Type-erased view of this effect, as dependency sets store it.
    ///
    /// Useful for driving [`track_effect`](super::dep::track_effect) from an
    /// external interception layer.
    pub fn as_any_effect(&self) -> Arc<dyn AnyEffect> {
        self.inner.clone()
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .field("level", &*self.inner.level.read())
            .field("deps", &self.inner.deps.lock().slots.len())
            .finish()
    }
}

/// Configuration for [`effect_with`].
///
/// Enumerates exactly the supported overrides; there is no way to inject
/// arbitrary state into an effect.
#[derive(Default)]
pub struct EffectOptions {
    /// Replaces the default re-run-on-trigger behavior.
    pub scheduler: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Skip the initial run.
    pub lazy: bool,
}

/// Register a new effect and run it immediately.
///
/// The default scheduler re-runs the effect whenever one of its dependencies
/// changes. The returned handle re-invokes `run()` and exposes the effect for
/// introspection (`is_dirty`, `stop`).
pub fn effect<T: 'static>(compute: impl Fn() -> T + Send + Sync + 'static) -> Effect<T> {
    effect_with(compute, EffectOptions::default())
}

/// Register a new effect with explicit [`EffectOptions`].
pub fn effect_with<T: 'static>(
    compute: impl Fn() -> T + Send + Sync + 'static,
    options: EffectOptions,
) -> Effect<T> {
    let compute: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(compute);
    let handle = match options.scheduler {
        Some(scheduler) => Effect::build(compute, move |_| Some(scheduler)),
        None => Effect::with_default_scheduler(compute),
    };

    if !options.lazy {
        handle.run();
    }

    handle
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_effect_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let handle = effect_with(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        handle.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_returns_computation_result() {
        let handle = effect(|| 2 + 2);
        assert_eq!(handle.run(), 4);
    }

    #[test]
    fn run_resets_dirty_level() {
        let handle = Effect::new(|| ());

        // Never run yet
        assert!(handle.is_dirty());

        handle.run();
        assert!(!handle.is_dirty());
    }

    #[test]
    fn set_dirty_forces_level() {
        let handle = effect(|| ());
        assert!(!handle.is_dirty());

        handle.set_dirty(true);
        assert!(handle.is_dirty());

        handle.set_dirty(false);
        assert!(!handle.is_dirty());
    }

    #[test]
    fn effect_is_current_while_running() {
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = observed.clone();

        let handle = effect(move || {
            observed_clone.store(context::is_tracking(), Ordering::SeqCst);
        });

        assert!(observed.load(Ordering::SeqCst));
        assert!(!context::is_tracking());
        drop(handle);
    }

    #[test]
    fn stopped_effect_still_computes_but_does_not_track() {
        let tracked_during_run = Arc::new(AtomicBool::new(true));
        let tracked_clone = tracked_during_run.clone();

        let handle = effect(move || {
            tracked_clone.store(context::is_tracking(), Ordering::SeqCst);
            7
        });
        assert!(tracked_during_run.load(Ordering::SeqCst));

        handle.stop();
        assert!(!handle.is_active());

        // Still executes and returns, but with tracking bypassed
        assert_eq!(handle.run(), 7);
        assert!(!tracked_during_run.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = effect(|| ());
        handle.stop();
        handle.stop();
        assert!(!handle.is_active());
    }

    #[test]
    fn nested_runs_restore_outer_effect() {
        let inner = Effect::new(|| {
            assert!(context::is_tracking());
        });

        let inner_clone = inner.clone();
        let outer = effect(move || {
            let before = context::current_effect().map(|e| e.id());
            inner_clone.run();
            let after = context::current_effect().map(|e| e.id());
            assert_eq!(before, after);
        });

        drop(outer);
    }

    #[test]
    fn panic_in_computation_leaves_engine_consistent() {
        let should_panic = Arc::new(AtomicBool::new(false));
        let should_panic_clone = should_panic.clone();

        let handle = effect(move || {
            if should_panic_clone.load(Ordering::SeqCst) {
                panic!("computation failed");
            }
        });

        should_panic.store(true, Ordering::SeqCst);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.run()));
        assert!(result.is_err());

        // Bookkeeping ran on the unwind path
        assert!(!context::is_tracking());
        assert!(!handle.inner.is_running());

        // The effect is still usable
        should_panic.store(false, Ordering::SeqCst);
        handle.run();
        assert!(!handle.is_dirty());
    }
}
