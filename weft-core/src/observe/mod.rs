//! Observed State
//!
//! The data-facing half of the crate. Plain state lives in [`Object`]s
//! holding [`Value`]s; wrapping an object with [`wrap`] produces a
//! [`Tracked`] view whose reads register the running effect and whose
//! writes notify registered effects.
//!
//! - [`value`]: the value model and the plain object container.
//! - [`tracked`]: the observing wrapper with per-key dependency sets.
//! - [`cache`]: the identity cache that makes wrapping referentially stable.

pub mod cache;
pub mod tracked;
pub mod value;

pub use cache::{is_tracked, to_tracked, wrap};
pub use tracked::Tracked;
pub use value::{Object, Value, ValueError};
