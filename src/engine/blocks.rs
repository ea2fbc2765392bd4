//! Special scan blocks.
//!
//! Configuration for the two scan injections the main loop supports:
//! periodic calibrator blocks (plain elevation calibration or the two
//! parallactic-angle variants) and the high-impact pre-pass that pins
//! priority scans down before ordinary selection fills the gaps.

use serde::{Deserialize, Serialize};

use crate::models::{Scan, ScanType, Second, SourceIdx};

/// What a calibrator block optimizes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibratorKind {
    /// Cover low and high elevations per station.
    Elevation,
    /// Diversify each station's parallactic-angle history.
    ParallacticAngle,
    /// Maximize parallactic-angle spread across stations within a scan.
    DiffParallacticAngle,
}

impl CalibratorKind {
    /// Scan type the block's scans carry.
    pub fn scan_type(self) -> ScanType {
        match self {
            CalibratorKind::Elevation => ScanType::Calibrator,
            CalibratorKind::ParallacticAngle => ScanType::ParallacticAngle,
            CalibratorKind::DiffParallacticAngle => ScanType::DiffParallacticAngle,
        }
    }
}

/// Periodic calibrator block configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratorSetup {
    /// Time between block starts (s).
    pub interval: Second,
    /// Hard cap on scans per block.
    pub max_scans_per_block: u32,
    /// Calibrator source pool; candidates come only from this set.
    pub sources: Vec<SourceIdx>,
    /// Elevation at or below which the low-elevation target counts (rad).
    pub target_low_elevation: f64,
    /// Elevation at or above which the high-elevation target counts (rad).
    pub target_high_elevation: f64,
    /// Block flavor.
    pub kind: CalibratorKind,
}

impl CalibratorSetup {
    /// A block of `kind` every `interval` seconds over `sources`.
    pub fn new(interval: Second, sources: Vec<SourceIdx>, kind: CalibratorKind) -> Self {
        Self {
            interval,
            max_scans_per_block: 4,
            sources,
            target_low_elevation: 25.0_f64.to_radians(),
            target_high_elevation: 55.0_f64.to_radians(),
            kind,
        }
    }

    /// Sets the per-block scan cap.
    pub fn with_max_scans(mut self, n: u32) -> Self {
        self.max_scans_per_block = n;
        self
    }

    /// Sets the elevation targets of an [`CalibratorKind::Elevation`] block.
    pub fn with_elevation_targets(mut self, low: f64, high: f64) -> Self {
        self.target_low_elevation = low;
        self.target_high_elevation = high;
        self
    }
}

/// Tracks whether an elevation block has met its targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibratorProgress {
    low_covered: bool,
    high_covered: bool,
}

impl CalibratorProgress {
    /// Folds one committed calibrator scan into the progress state.
    pub fn update(&mut self, setup: &CalibratorSetup, scan: &Scan) {
        for pv in &scan.pointings {
            if pv.elevation <= setup.target_low_elevation {
                self.low_covered = true;
            }
            if pv.elevation >= setup.target_high_elevation {
                self.high_covered = true;
            }
        }
    }

    /// Whether both elevation targets have been observed.
    pub fn satisfied(&self) -> bool {
        self.low_covered && self.high_covered
    }
}

/// One high-impact target: a source that must be caught inside an
/// azimuth/elevation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighImpactTarget {
    /// Target source.
    pub source: SourceIdx,
    /// Minimum elevation of every participating station (rad).
    pub min_elevation: f64,
    /// Maximum elevation of every participating station (rad).
    pub max_elevation: f64,
    /// Azimuth window, `None` for any azimuth. When `min > max` the
    /// window wraps through north.
    pub azimuth_window: Option<(f64, f64)>,
}

impl HighImpactTarget {
    /// Target without angular restrictions.
    pub fn new(source: SourceIdx) -> Self {
        Self {
            source,
            min_elevation: 0.0,
            max_elevation: std::f64::consts::FRAC_PI_2,
            azimuth_window: None,
        }
    }

    /// Restricts the elevation window.
    pub fn with_elevation(mut self, min: f64, max: f64) -> Self {
        self.min_elevation = min;
        self.max_elevation = max;
        self
    }

    /// Restricts the azimuth window.
    pub fn with_azimuth(mut self, min: f64, max: f64) -> Self {
        self.azimuth_window = Some((min, max));
        self
    }

    /// Whether every pointing of `scan` lies inside the window.
    pub fn admits(&self, scan: &Scan) -> bool {
        scan.pointings.iter().all(|pv| {
            if pv.elevation < self.min_elevation || pv.elevation > self.max_elevation {
                return false;
            }
            match self.azimuth_window {
                None => true,
                Some((lo, hi)) => {
                    let az = pv.azimuth.rem_euclid(std::f64::consts::TAU);
                    if lo <= hi {
                        az >= lo && az <= hi
                    } else {
                        az >= lo || az <= hi
                    }
                }
            }
        })
    }
}

/// Priority scans pinned down before ordinary selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighImpactScanDescriptor {
    /// Spacing of the pre-pass decision grid (s).
    pub interval: Second,
    /// Minimum time between two committed high-impact scans (s).
    pub min_time_between_scans: Second,
    /// Targets considered at every grid point.
    pub targets: Vec<HighImpactTarget>,
}

impl HighImpactScanDescriptor {
    /// Descriptor with the given decision grid and targets.
    pub fn new(interval: Second, min_time_between_scans: Second, targets: Vec<HighImpactTarget>) -> Self {
        Self {
            interval,
            min_time_between_scans,
            targets,
        }
    }

    /// All target source indices.
    pub fn source_pool(&self) -> Vec<SourceIdx> {
        self.targets.iter().map(|t| t.source).collect()
    }

    /// Target entry for a source.
    pub fn target_for(&self, source: SourceIdx) -> Option<&HighImpactTarget> {
        self.targets.iter().find(|t| t.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PointingVector, Scan, ScanType};

    fn scan_with_elevations(els_deg: &[f64]) -> Scan {
        let pointings = els_deg
            .iter()
            .enumerate()
            .map(|(k, el)| PointingVector {
                station: k,
                source: 0,
                time: 0,
                azimuth: 1.0,
                elevation: el.to_radians(),
            })
            .collect::<Vec<_>>();
        let n = pointings.len();
        Scan::new(0, ScanType::Calibrator, pointings, vec![60; n], 1.0)
    }

    #[test]
    fn test_elevation_progress() {
        let setup = CalibratorSetup::new(3600, vec![0], CalibratorKind::Elevation)
            .with_elevation_targets(25.0_f64.to_radians(), 55.0_f64.to_radians());
        let mut progress = CalibratorProgress::default();
        progress.update(&setup, &scan_with_elevations(&[40.0, 35.0]));
        assert!(!progress.satisfied());
        progress.update(&setup, &scan_with_elevations(&[20.0, 60.0]));
        assert!(progress.satisfied());
    }

    #[test]
    fn test_high_impact_window() {
        let target = HighImpactTarget::new(0)
            .with_elevation(30.0_f64.to_radians(), 80.0_f64.to_radians());
        assert!(target.admits(&scan_with_elevations(&[45.0, 60.0])));
        assert!(!target.admits(&scan_with_elevations(&[45.0, 20.0])));
    }

    #[test]
    fn test_azimuth_window_wraps_north() {
        let target = HighImpactTarget::new(0)
            .with_azimuth(300.0_f64.to_radians(), 60.0_f64.to_radians());
        let mut scan = scan_with_elevations(&[45.0]);
        scan.pointings[0].azimuth = 20.0_f64.to_radians();
        assert!(target.admits(&scan));
        scan.pointings[0].azimuth = 180.0_f64.to_radians();
        assert!(!target.admits(&scan));
    }
}
