//! Error types.

use thiserror::Error;

/// Errors raised when constructing or running a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Fewer than two stations; no baseline can form.
    #[error("network needs at least two stations, got {0}")]
    EmptyNetwork(usize),

    /// Empty source catalog.
    #[error("source catalog is empty")]
    NoSources,

    /// Session of zero length.
    #[error("session end must be after session start")]
    EmptySession,
}

/// Errors raised by the multi-scheduling parameter generator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiSchedulingError {
    /// The Cartesian product exceeds the hard combination ceiling.
    #[error("parameter space has {0} combinations, limit is {1}; drop dimensions or values")]
    TooManyCombinations(usize, usize),
}
