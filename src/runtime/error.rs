//! Error types for the Strand runtime
//!
//! Domain errors use thiserror; each subsystem gets its own enum and a
//! `Result` alias, with conversions into the top-level `RuntimeError`.

use std::io;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Tuple construction errors
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Pattern syntax errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Pattern match errors
    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    /// Step execution errors
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Tuple/value construction errors
#[derive(Debug, Error)]
pub enum ValueError {
    /// Tuple built with fewer than two components
    #[error("unit and singleton tuples are not supported (got {0} component(s))")]
    Arity(usize),
}

/// Convenience result alias for value construction
pub type ValueResult<T> = std::result::Result<T, ValueError>;

/// Errors raised while compiling a tuple pattern
#[derive(Debug, Error)]
pub enum PatternError {
    /// Pattern text contains no components
    #[error("empty pattern")]
    Empty,

    /// Two components with no comma between them
    #[error("comma expected in pattern at offset {0}")]
    ExpectedComma(usize),

    /// More `(` than `)`
    #[error("unclosed group in pattern")]
    UnbalancedOpen,

    /// More `)` than `(`
    #[error("extra closing parenthesis in pattern at offset {0}")]
    UnbalancedClose(usize),

    /// A group (or the whole pattern) with fewer than two components
    #[error("unit and singleton patterns are not supported (got {0} component(s))")]
    Arity(usize),
}

/// Convenience result alias for pattern compilation
pub type PatternResult<T> = std::result::Result<T, PatternError>;

/// Errors raised while matching a tuple against a compiled pattern
#[derive(Debug, Error)]
pub enum MatchError {
    /// Tuple has more components than the pattern
    #[error("tuple too long: pattern expects {expected}, tuple has {found}")]
    TooLong {
        /// Arity the pattern expects
        expected: usize,
        /// Arity the tuple actually has
        found: usize,
    },

    /// Tuple has fewer components than the pattern
    #[error("tuple too short: pattern expects {expected}, tuple has {found}")]
    TooShort {
        /// Arity the pattern expects
        expected: usize,
        /// Arity the tuple actually has
        found: usize,
    },

    /// A group pattern was matched against a non-tuple component
    #[error("not a tuple: group pattern matched against {found}")]
    NotATuple {
        /// Kind of the offending value
        found: &'static str,
    },
}

/// Convenience result alias for pattern matching
pub type MatchResult<T> = std::result::Result<T, MatchError>;

/// Step execution errors: programmer errors in step-tree construction,
/// plus failures raised by lifted fallible bodies
#[derive(Debug, Error)]
pub enum StepError {
    /// A loop body yielded a value that is neither `continue` nor `done`
    #[error("loop body must yield continue or done, got {found}")]
    LoopYieldRequired {
        /// Kind of the offending value
        found: &'static str,
    },

    /// A parallel join was driven by a non-pair input
    #[error("parallel join requires a pair input, got {found}")]
    PairRequired {
        /// Kind of the offending value
        found: &'static str,
    },

    /// Value-model error inside a step body
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Match error inside a step body
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Application-specific failure from a lifted body
    #[error("step failed: {0}")]
    Failed(String),
}

/// Convenience result alias for step activation
pub type StepResult<T> = std::result::Result<T, StepError>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler has been shut down and accepts no new instances
    #[error("scheduler has been shut down")]
    ShutDown,

    /// A step error escaped into the shared scheduling pass, aborting
    /// every instance queued on this scheduler
    #[error("step error escaped the scheduling pass ({aborted} instance(s) aborted): {source}")]
    Fatal {
        /// Number of instances cancelled by the abort
        aborted: usize,
        /// The escaping step error
        #[source]
        source: StepError,
    },
}

/// Convenience result alias for scheduler operations
pub type SchedResult<T> = std::result::Result<T, SchedulerError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
