//! Weft Core
//!
//! This crate provides a fine-grained dependency-tracking and invalidation
//! engine. It implements:
//!
//! - Effects with automatic dependency discovery and a scheduler hook
//! - Bidirectional effect/dependency registration with per-run reconciliation
//! - Staleness propagation with a three-level dirtiness model
//! - A tracked wrapper over plain objects with identity-stable wrapping
//!
//! Dependencies are never declared: an effect's reads during a run decide
//! exactly what it watches, and every run recomputes that set from scratch
//! at slot-swap cost in the steady state.
//!
//! # Architecture
//!
//! The crate is organized into two module trees:
//!
//! - `reactive`: effects, dependency sets, and the tracking context
//! - `observe`: the value model, the tracked wrapper, and the wrapper cache
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{effect, wrap, Object, Value};
//!
//! // Wrap some state
//! let state = wrap(Value::Object(Object::new().with("count", 0)))
//!     .into_tracked()
//!     .unwrap();
//!
//! // This effect reads `count`, so it watches `count`
//! let handle = effect({
//!     let state = state.clone();
//!     move || println!("count = {:?}", state.get("count"))
//! });
//!
//! // The write reruns the effect, prints: count = Some(Int(5))
//! state.set("count", 5);
//! ```

pub mod observe;
pub mod reactive;

pub use observe::cache::{is_tracked, to_tracked, wrap};
pub use observe::tracked::Tracked;
pub use observe::value::{Object, Value, ValueError};
pub use reactive::context::{current_effect, is_tracking};
pub use reactive::dep::{track_effect, trigger_effects, Dep};
pub use reactive::effect::{
    effect, effect_with, AnyEffect, DirtyLevel, Effect, EffectId, EffectOptions,
};
