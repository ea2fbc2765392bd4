//! Domain models for observation scheduling.
//!
//! Provides the core data types for representing a radio-telescope
//! observing session: stations with operating limits and runtime state,
//! celestial sources, baselines, pointing vectors, committed scans, and
//! the per-station-group sky-coverage accumulators.
//!
//! # Time convention
//!
//! All times are whole seconds since the session start ([`Second`]).
//! Entities inside a [`Network`] and the source list are addressed by
//! stable integer indices; the scheduling engine holds exclusive write
//! access during a run, everything else borrows read-only by index.

mod baseline;
mod network;
mod scan;
mod skycov;
mod source;
mod station;

pub use baseline::{Baseline, BaselineLimits};
pub use network::Network;
pub use scan::{PointingVector, Scan, ScanType};
pub use skycov::{Interpolation, SkyCoverage};
pub use source::{EphemerisPoint, Source, SourceLimits, SourceState, SourceVariant};
pub use station::{GeodeticPosition, Slew, SlewModel, Station, StationLimits, StationState};

/// Seconds since the session start.
pub type Second = u32;

/// Index of a station inside a [`Network`].
pub type StationIdx = usize;

/// Index of a source inside the session's source list.
pub type SourceIdx = usize;

/// Index of a baseline inside a [`Network`].
pub type BaselineIdx = usize;
