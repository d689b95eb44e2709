//! Strand – a trampoline-scheduled runtime for composable asynchronous steps
//!
//! This crate implements a continuation-passing step runtime with:
//! - An immutable, composable step abstraction and a combinator algebra
//!   (sequence, parallel join, fanout, race, loops, delays)
//! - A tuple/pair value model with flattening and structural pattern
//!   matching
//! - A hand-rolled cooperative trampoline scheduler with per-pass
//!   wall-clock budgets and depth-limited slices, so long synchronous
//!   chains never overflow the native stack
//! - Event, timer, and tick-counter adapters over caller-supplied
//!   capabilities, with deterministic in-process implementations
//!
//! There is no reliance on an async runtime: "parallel" combinators
//! interleave cooperatively on a single logical thread.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core modules implementing the composable-step model
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{Scheduler, SchedulerConfig, Step, Value};

/// Current version of the Strand runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
