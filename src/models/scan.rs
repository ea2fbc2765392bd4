//! Scan and pointing-vector models.
//!
//! A [`PointingVector`] is a pure value produced by the geometry oracle.
//! A [`Scan`] is a committed observation: one source, one aligned start,
//! per-station start pointings and individual end times. Once appended to
//! the schedule a scan is immutable, with two sanctioned exceptions:
//! fillin insertions between existing scans and the idle-time folding
//! pass, neither of which reorders the schedule.

use serde::{Deserialize, Serialize};

use super::{Second, SourceIdx, StationIdx};

/// A pointing of one station towards one source at one time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointingVector {
    /// Station index.
    pub station: StationIdx,
    /// Source index.
    pub source: SourceIdx,
    /// Time of validity (s since session start).
    pub time: Second,
    /// Azimuth (rad, from north, eastwards).
    pub azimuth: f64,
    /// Elevation (rad).
    pub elevation: f64,
}

/// How a scan was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    /// Ordinary scan from the main selection loop.
    Standard,
    /// Member of a simultaneous subnetting pair.
    Subnetting,
    /// Short scan squeezed into otherwise idle station time.
    Fillin,
    /// Scan from a calibrator block.
    Calibrator,
    /// Scan matching a high-impact descriptor.
    HighImpact,
    /// Scan chosen to diversify parallactic-angle coverage.
    ParallacticAngle,
    /// Scan chosen to maximize parallactic-angle differences.
    DiffParallacticAngle,
}

/// A committed observation by one or more stations of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Observed source.
    pub source: SourceIdx,
    /// Selection origin.
    pub scan_type: ScanType,
    /// Per-station start pointings; `pointings[k].time` is station `k`'s
    /// start time (aligned at selection, may move in the folding pass).
    pub pointings: Vec<PointingVector>,
    /// Per-station end times, parallel to `pointings`.
    pub end_times: Vec<Second>,
    /// Score the scan carried when it was selected.
    pub score: f64,
}

impl Scan {
    /// Builds a scan; `pointings` and `end_times` must be parallel.
    pub fn new(
        source: SourceIdx,
        scan_type: ScanType,
        pointings: Vec<PointingVector>,
        end_times: Vec<Second>,
        score: f64,
    ) -> Self {
        debug_assert_eq!(pointings.len(), end_times.len());
        Self {
            source,
            scan_type,
            pointings,
            end_times,
            score,
        }
    }

    /// Earliest per-station start time.
    pub fn start(&self) -> Second {
        self.pointings.iter().map(|p| p.time).min().unwrap_or(0)
    }

    /// Latest per-station end time.
    pub fn end(&self) -> Second {
        self.end_times.iter().copied().max().unwrap_or(0)
    }

    /// Number of participating stations.
    pub fn n_stations(&self) -> usize {
        self.pointings.len()
    }

    /// Number of observations (baselines) this scan produces.
    pub fn n_baselines(&self) -> usize {
        let n = self.pointings.len();
        n * (n - 1) / 2
    }

    /// Participating station indices.
    pub fn station_ids(&self) -> impl Iterator<Item = StationIdx> + '_ {
        self.pointings.iter().map(|p| p.station)
    }

    /// Whether `station` participates.
    pub fn contains_station(&self, station: StationIdx) -> bool {
        self.pointings.iter().any(|p| p.station == station)
    }

    /// Whether two scans have no station in common.
    pub fn disjoint_with(&self, other: &Scan) -> bool {
        !self
            .pointings
            .iter()
            .any(|p| other.contains_station(p.station))
    }

    /// Position of `station` inside the pointing list.
    pub fn position_of(&self, station: StationIdx) -> Option<usize> {
        self.pointings.iter().position(|p| p.station == station)
    }

    /// `(start, end)` interval of `station` in this scan.
    pub fn interval_for(&self, station: StationIdx) -> Option<(Second, Second)> {
        self.position_of(station)
            .map(|k| (self.pointings[k].time, self.end_times[k]))
    }

    /// On-source duration of the `k`-th participating station (s).
    pub fn duration_at(&self, k: usize) -> Second {
        self.end_times[k].saturating_sub(self.pointings[k].time)
    }

    /// Mean on-source duration over participating stations (s).
    pub fn mean_duration(&self) -> f64 {
        if self.pointings.is_empty() {
            return 0.0;
        }
        let total: u64 = (0..self.pointings.len())
            .map(|k| self.duration_at(k) as u64)
            .sum();
        total as f64 / self.pointings.len() as f64
    }
}
