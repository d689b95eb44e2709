//! Runtime core: values, steps, combinators, and the trampoline
//!
//! This module provides the composable-step runtime: the tuple/pair
//! value model, the step abstraction with its combinator algebra, the
//! event/timer/tick adapters, and the scheduler that executes step
//! trees cooperatively.

use std::path::Path;

use serde::{Deserialize, Serialize};

// Submodules
pub mod adapter;
pub mod capability;
pub mod combinator;
pub mod error;
pub mod instance;
pub mod pattern;
pub mod scheduler;
pub mod step;
pub mod value;

use error::ConfigResult;

/// Configuration for the step scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Continuations one instance may consume before yielding back to
    /// the trampoline loop
    pub depth_limit: u32,

    /// Wall-clock budget of one scheduling pass, in whole milliseconds
    pub pass_budget_ms: u64,

    /// Delay before a budget-exhausted pass resumes
    pub resume_interval_ms: u64,

    /// Budget of the pass started by run(); kept short so starting a
    /// step tree returns to the caller quickly
    pub initial_pass_budget_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            depth_limit: 50,
            pass_budget_ms: 30,
            resume_interval_ms: 10,
            initial_pass_budget_ms: 0,
        }
    }
}

impl SchedulerConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write this configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

// Re-export commonly used types
pub use capability::{Env, EventHub, EventSource, TickSource, TimerSource, VirtualClock};
pub use instance::{Controller, ProgressHandle, Status};
pub use scheduler::Scheduler;
pub use step::{Step, StepBody};
pub use value::{Event, Pair, Tuple, Value};
