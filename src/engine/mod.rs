//! Scheduling engine.
//!
//! The committing side of the crate: subcon generation
//! ([`subcon`]), special scan blocks ([`blocks`]) and the greedy
//! look-ahead [`Scheduler`] that drives a run end to end.

pub mod blocks;
pub mod scheduler;
pub mod subcon;

pub use blocks::{
    CalibratorKind, CalibratorSetup, HighImpactScanDescriptor, HighImpactTarget,
};
pub use scheduler::{RunStatistics, Scheduler, StationEvent, StationStatus, Timestamp};
pub use subcon::{StationEndposition, Subcon, SubconRequest};

use log::warn;

use crate::models::Scan;

/// Common contract of the scheduling backends: run once, then expose the
/// committed schedule.
pub trait ScanScheduler {
    /// Runs the full scheduling pipeline.
    fn start(&mut self);

    /// The committed schedule, sorted by scan start.
    fn scans(&self) -> &[Scan];
}

impl ScanScheduler for Scheduler {
    fn start(&mut self) {
        Scheduler::start(self)
    }

    fn scans(&self) -> &[Scan] {
        Scheduler::scans(self)
    }
}

/// Placeholder for the mixed-integer optimization backend.
///
/// The exact backend is out of scope; this stub satisfies the backend
/// contract and produces an empty schedule.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptScheduler {
    scans: Vec<Scan>,
}

impl GlobalOptScheduler {
    /// Creates the stub backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanScheduler for GlobalOptScheduler {
    fn start(&mut self) {
        warn!("mixed-integer scheduling backend is not implemented; schedule left empty");
    }

    fn scans(&self) -> &[Scan] {
        &self.scans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_opt_stub_is_empty() {
        let mut backend = GlobalOptScheduler::new();
        backend.start();
        assert!(backend.scans().is_empty());
    }
}
