//! Reactive Engine
//!
//! This module implements the dependency-tracking and invalidation engine:
//! effects, dependency sets, and the thread-local tracking context that ties
//! them together.
//!
//! # Concepts
//!
//! ## Effects
//!
//! An [`Effect`] is a re-runnable computation. While it runs it is the
//! thread's "current effect", and every tracked read registers it as a
//! reader of the slot being read. When any of those slots later changes, the
//! effect is marked stale and its scheduler is invoked.
//!
//! ## Dependency Sets
//!
//! A [`Dep`] is the per-slot set of reader effects. The registration
//! protocol keeps it exact: an effect that stops reading a slot sheds that
//! edge on its very next run, and a slot whose set empties notifies its
//! owner through a cleanup callback.
//!
//! ## Tracking Context
//!
//! The [`context`] module holds the per-thread current-effect slot with a
//! strict save/restore discipline, so nested and panicking runs stay
//! consistent.

pub mod context;
pub mod dep;
pub mod effect;

pub use context::{current_effect, is_tracking};
pub use dep::{track_effect, trigger_effects, Dep};
pub use effect::{effect, effect_with, AnyEffect, DirtyLevel, Effect, EffectId, EffectOptions};
