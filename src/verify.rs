//! Independent schedule verification.
//!
//! Recomputes every scheduling invariant from the committed [`Scan`]
//! records alone, without trusting any engine state: per-station overlap
//! including recomputed slews, duration windows, elevation limits,
//! minimum station counts, source repeat intervals and scan caps.
//! Verification is diagnostic; it reports, it never panics.

use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde::Serialize;

use crate::geometry::GeometryOracle;
use crate::models::{Network, PointingVector, Scan, ScanType, Second, Source};

/// What a verification error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationErrorKind {
    /// Two scans of one station overlap, or the slew between them does
    /// not fit the gap.
    StationOverlap,
    /// A per-station duration violates a station or source window.
    DurationOutOfRange,
    /// A pointing is below the combined minimum elevation, or the source
    /// is not visible at all at the scan start.
    BelowMinElevation,
    /// Fewer stations than the source requires.
    TooFewStations,
    /// Two scans of one source are closer than its repeat interval.
    RepeatIntervalViolated,
    /// A station or source exceeds its scan cap.
    ScanCapExceeded,
    /// A scan extends past the session end.
    SessionOverrun,
}

/// One violated invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationError {
    /// Invariant class.
    pub kind: VerificationErrorKind,
    /// Human-readable description with the offending entities and times.
    pub message: String,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Aggregate counters recomputed from the schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleStatistics {
    /// Total scans.
    pub n_scans: usize,
    /// Total observations (baselines).
    pub n_observations: usize,
    /// Scans per type.
    pub scans_by_type: HashMap<ScanType, usize>,
    /// Scans per station.
    pub station_n_scans: Vec<u32>,
    /// On-source time per station (s).
    pub station_observed_time: Vec<Second>,
    /// Scans per source.
    pub source_n_scans: Vec<u32>,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    /// Every violated invariant.
    pub errors: Vec<VerificationError>,
    /// Recomputed schedule counters.
    pub stats: ScheduleStatistics,
}

impl VerificationReport {
    /// Whether no invariant was violated.
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(
                f,
                "schedule OK: {} scans, {} observations",
                self.stats.n_scans, self.stats.n_observations
            )
        } else {
            writeln!(f, "schedule has {} violations:", self.errors.len())?;
            for error in &self.errors {
                writeln!(f, "  {error}")?;
            }
            Ok(())
        }
    }
}

/// Verifies a finished schedule against the network and source limits.
pub fn verify_schedule(
    scans: &[Scan],
    network: &Network,
    sources: &[Source],
    oracle: &dyn GeometryOracle,
    session_end: Second,
) -> VerificationReport {
    let mut checker = Checker {
        network,
        sources,
        oracle,
        session_end,
        errors: Vec::new(),
    };
    let mut ordered: Vec<&Scan> = scans.iter().collect();
    ordered.sort_by_key(|s| (s.start(), s.end()));

    checker.check_scan_local(&ordered);
    checker.check_station_chains(&ordered);
    checker.check_source_repeats(&ordered);
    checker.check_caps(&ordered);

    let stats = collect_statistics(&ordered, network, sources);
    if !checker.errors.is_empty() {
        warn!("verification found {} violations", checker.errors.len());
    }
    VerificationReport {
        errors: checker.errors,
        stats,
    }
}

struct Checker<'a> {
    network: &'a Network,
    sources: &'a [Source],
    oracle: &'a dyn GeometryOracle,
    session_end: Second,
    errors: Vec<VerificationError>,
}

impl Checker<'_> {
    fn error(&mut self, kind: VerificationErrorKind, message: String) {
        self.errors.push(VerificationError { kind, message });
    }

    /// Per-scan invariants: station count, durations, elevations,
    /// session bounds.
    fn check_scan_local(&mut self, scans: &[&Scan]) {
        for scan in scans {
            let src = &self.sources[scan.source];
            let required = (src.limits.min_number_of_stations.max(2)) as usize;
            if scan.n_stations() < required {
                self.error(
                    VerificationErrorKind::TooFewStations,
                    format!(
                        "scan of {} at {} s has {} stations, needs {}",
                        src.name,
                        scan.start(),
                        scan.n_stations(),
                        required
                    ),
                );
            }
            if scan.end() > self.session_end {
                self.error(
                    VerificationErrorKind::SessionOverrun,
                    format!(
                        "scan of {} ends at {} s, past the session end {} s",
                        src.name,
                        scan.end(),
                        self.session_end
                    ),
                );
            }
            for (k, pv) in scan.pointings.iter().enumerate() {
                let station = self.network.station(pv.station);
                let duration = scan.duration_at(k);
                let min = station.limits.min_scan.max(src.limits.min_scan);
                let max = station.limits.max_scan.min(src.limits.max_scan);
                if duration < min || duration > max {
                    self.error(
                        VerificationErrorKind::DurationOutOfRange,
                        format!(
                            "{} observes {} for {} s at {} s, window is {}..{} s",
                            station.name, src.name, duration, pv.time, min, max
                        ),
                    );
                }
                let limit = station.limits.min_elevation.max(src.limits.min_elevation);
                match self.oracle.compute_pointing(station, src, pv.time) {
                    Some((_, el)) if el >= limit - 1e-9 => {}
                    Some((_, el)) => self.error(
                        VerificationErrorKind::BelowMinElevation,
                        format!(
                            "{} points at {} at {:.1} deg, limit {:.1} deg, at {} s",
                            station.name,
                            src.name,
                            el.to_degrees(),
                            limit.to_degrees(),
                            pv.time
                        ),
                    ),
                    None => self.error(
                        VerificationErrorKind::BelowMinElevation,
                        format!(
                            "{} cannot see {} at {} s",
                            station.name, src.name, pv.time
                        ),
                    ),
                }
                // The source must still be admissible when the station
                // stops observing it.
                let end = scan.end_times[k];
                match self.oracle.compute_pointing(station, src, end) {
                    Some((_, el)) if el >= limit - 1e-9 => {}
                    _ => self.error(
                        VerificationErrorKind::BelowMinElevation,
                        format!(
                            "{} loses {} below the elevation limit before its scan end at {} s",
                            station.name, src.name, end
                        ),
                    ),
                }
            }
        }
    }

    /// Per-station timelines: no overlap, and the recomputed slew
    /// between consecutive scans fits the gap.
    fn check_station_chains(&mut self, scans: &[&Scan]) {
        for id in 0..self.network.n_stations() {
            let mut previous: Option<(&Scan, usize)> = None;
            for scan in scans {
                let Some(k) = scan.position_of(id) else { continue };
                if let Some((prev, pk)) = previous {
                    let prev_end = prev.end_times[pk];
                    let end_pv = self.end_pointing(prev, pk);
                    let next_pv = scan.pointings[k];
                    let slew = self
                        .network
                        .station(id)
                        .slew
                        .between(&end_pv, &next_pv)
                        .seconds;
                    let ready = prev_end.saturating_add(slew);
                    if next_pv.time < ready {
                        self.error(
                            VerificationErrorKind::StationOverlap,
                            format!(
                                "{} finishes at {} s and needs {} s of slew, but its next scan starts at {} s",
                                self.network.station(id).name, prev_end, slew, next_pv.time
                            ),
                        );
                    }
                }
                previous = Some((scan, k));
            }
        }
    }

    /// End pointing of one station in one scan, with the same fallback
    /// the engine uses when the source sets before the scan end.
    fn end_pointing(&self, scan: &Scan, k: usize) -> PointingVector {
        let pv = scan.pointings[k];
        let end = scan.end_times[k];
        let src = &self.sources[scan.source];
        match self
            .oracle
            .compute_pointing(self.network.station(pv.station), src, end)
        {
            Some((az, el)) => PointingVector {
                time: end,
                azimuth: az,
                elevation: el,
                ..pv
            },
            None => PointingVector { time: end, ..pv },
        }
    }

    /// Start-to-start repeat intervals per source.
    ///
    /// Measured between starts so the idle-folding pass, which only
    /// stretches scans, cannot invalidate a schedule. Only ordinary
    /// scans are bound; calibrator and high-impact scans may revisit a
    /// source freely.
    fn check_source_repeats(&mut self, scans: &[&Scan]) {
        let mut last_start: HashMap<usize, Second> = HashMap::new();
        for scan in scans {
            let src = &self.sources[scan.source];
            let bound = matches!(
                scan.scan_type,
                ScanType::Standard | ScanType::Subnetting | ScanType::Fillin
            );
            if bound {
                if let Some(&prev) = last_start.get(&scan.source) {
                    if scan.start() < prev.saturating_add(src.limits.min_repeat) {
                        self.error(
                            VerificationErrorKind::RepeatIntervalViolated,
                            format!(
                                "{} repeats at {} s, {} s after its previous scan, repeat interval is {} s",
                                src.name,
                                scan.start(),
                                scan.start() - prev,
                                src.limits.min_repeat
                            ),
                        );
                    }
                }
            }
            last_start.insert(scan.source, scan.start());
        }
    }

    fn check_caps(&mut self, scans: &[&Scan]) {
        let mut per_source = vec![0u32; self.sources.len()];
        let mut per_station = vec![0u32; self.network.n_stations()];
        for scan in scans {
            per_source[scan.source] += 1;
            for id in scan.station_ids() {
                per_station[id] += 1;
            }
        }
        for (idx, &n) in per_source.iter().enumerate() {
            let cap = self.sources[idx].limits.max_number_of_scans;
            if n > cap {
                self.error(
                    VerificationErrorKind::ScanCapExceeded,
                    format!("{} has {} scans, cap is {}", self.sources[idx].name, n, cap),
                );
            }
        }
        for (id, &n) in per_station.iter().enumerate() {
            let cap = self.network.station(id).limits.max_number_of_scans;
            if n > cap {
                self.error(
                    VerificationErrorKind::ScanCapExceeded,
                    format!(
                        "{} has {} scans, cap is {}",
                        self.network.station(id).name,
                        n,
                        cap
                    ),
                );
            }
        }
    }
}

fn collect_statistics(
    scans: &[&Scan],
    network: &Network,
    sources: &[Source],
) -> ScheduleStatistics {
    let mut stats = ScheduleStatistics {
        station_n_scans: vec![0; network.n_stations()],
        station_observed_time: vec![0; network.n_stations()],
        source_n_scans: vec![0; sources.len()],
        ..ScheduleStatistics::default()
    };
    for scan in scans {
        stats.n_scans += 1;
        stats.n_observations += scan.n_baselines();
        *stats.scans_by_type.entry(scan.scan_type).or_default() += 1;
        stats.source_n_scans[scan.source] += 1;
        for (k, pv) in scan.pointings.iter().enumerate() {
            stats.station_n_scans[pv.station] += 1;
            stats.station_observed_time[pv.station] += scan.duration_at(k);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SiderealModel;
    use crate::models::{GeodeticPosition, Station};

    fn network() -> Network {
        Network::new(vec![
            Station::new(
                "AA",
                GeodeticPosition::new(45.0_f64.to_radians(), 0.0, 0.0),
            ),
            Station::new(
                "BB",
                GeodeticPosition::new(50.0_f64.to_radians(), 10.0_f64.to_radians(), 0.0),
            ),
        ])
    }

    fn sources() -> Vec<Source> {
        vec![
            Source::quasar("Q1", 0.0, 70.0_f64.to_radians(), 2.0),
            Source::quasar("Q2", 2.0, 75.0_f64.to_radians(), 2.0),
        ]
    }

    fn oracle() -> SiderealModel {
        SiderealModel::new(0.0)
    }

    /// Builds a scan with oracle-consistent pointings.
    fn scan_at(src: usize, start: Second, duration: Second) -> Scan {
        let network = network();
        let sources = sources();
        let oracle = oracle();
        let pointings: Vec<PointingVector> = (0..network.n_stations())
            .map(|id| {
                let (az, el) = oracle
                    .compute_pointing(network.station(id), &sources[src], start)
                    .expect("source visible");
                PointingVector {
                    station: id,
                    source: src,
                    time: start,
                    azimuth: az,
                    elevation: el,
                }
            })
            .collect();
        let n = pointings.len();
        Scan::new(
            src,
            ScanType::Standard,
            pointings,
            vec![start + duration; n],
            1.0,
        )
    }

    fn verify(scans: &[Scan]) -> VerificationReport {
        verify_schedule(scans, &network(), &sources(), &oracle(), 7200)
    }

    #[test]
    fn test_valid_schedule_passes() {
        let scans = vec![scan_at(0, 100, 60), scan_at(1, 400, 60)];
        let report = verify(&scans);
        assert!(report.passed(), "{report}");
        assert_eq!(report.stats.n_scans, 2);
        assert_eq!(report.stats.n_observations, 2);
        assert_eq!(report.stats.station_observed_time, vec![120, 120]);
        assert_eq!(report.stats.source_n_scans, vec![1, 1]);
    }

    #[test]
    fn test_overlap_is_reported() {
        // Second scan starts while the first is still running.
        let scans = vec![scan_at(0, 100, 300), scan_at(1, 200, 60)];
        let report = verify(&scans);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::StationOverlap));
    }

    #[test]
    fn test_missing_slew_time_is_overlap() {
        // Back-to-back scans with zero gap: no room for the slew.
        let scans = vec![scan_at(0, 100, 60), scan_at(1, 160, 60)];
        let report = verify(&scans);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::StationOverlap));
    }

    #[test]
    fn test_short_duration_is_reported() {
        // 10 s is below the 30 s station/source minimum.
        let scans = vec![scan_at(0, 100, 10)];
        let report = verify(&scans);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::DurationOutOfRange));
    }

    #[test]
    fn test_invisible_source_is_reported() {
        // Fabricated pointings at a source that never rises here.
        let mut sources = sources();
        sources.push(Source::quasar("S", 0.0, (-80.0_f64).to_radians(), 2.0));
        let pointings = (0..2)
            .map(|id| PointingVector {
                station: id,
                source: 2,
                time: 100,
                azimuth: 3.0,
                elevation: 0.5,
            })
            .collect();
        let scans = vec![Scan::new(
            2,
            ScanType::Standard,
            pointings,
            vec![160, 160],
            1.0,
        )];
        let report = verify_schedule(&scans, &network(), &sources, &oracle(), 7200);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::BelowMinElevation));
    }

    #[test]
    fn test_elevation_checked_at_scan_end() {
        // Equatorial source setting through the 5 deg limit: fine at the
        // start pointings, gone by the end of a 600 s scan.
        let network = Network::new(vec![
            Station::new(
                "AA",
                GeodeticPosition::new(45.0_f64.to_radians(), 0.0, 0.0),
            ),
            Station::new(
                "BB",
                GeodeticPosition::new(45.0_f64.to_radians(), 0.5_f64.to_radians(), 0.0),
            ),
        ]);
        let ra = 7.292_115e-5 * 100.0 - 1.43;
        let sources = vec![Source::quasar("S", ra, 0.0, 2.0)];
        let oracle = oracle();
        let pointings: Vec<PointingVector> = (0..2)
            .map(|id| {
                let (az, el) = oracle
                    .compute_pointing(network.station(id), &sources[0], 100)
                    .expect("visible at the start");
                PointingVector {
                    station: id,
                    source: 0,
                    time: 100,
                    azimuth: az,
                    elevation: el,
                }
            })
            .collect();
        let scans = vec![Scan::new(
            0,
            ScanType::Standard,
            pointings,
            vec![700, 700],
            1.0,
        )];
        let report = verify_schedule(&scans, &network, &sources, &oracle, 7200);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::BelowMinElevation));
    }

    #[test]
    fn test_single_station_scan_is_reported() {
        let mut scan = scan_at(0, 100, 60);
        scan.pointings.truncate(1);
        scan.end_times.truncate(1);
        let report = verify(&[scan]);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::TooFewStations));
    }

    #[test]
    fn test_repeat_violation_is_reported() {
        // Default repeat interval is 1800 s; 600 s apart is too close.
        let scans = vec![scan_at(0, 100, 60), scan_at(0, 700, 60)];
        let report = verify(&scans);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::RepeatIntervalViolated));
    }

    #[test]
    fn test_scan_cap_is_reported() {
        let mut sources = sources();
        sources[0].limits.max_number_of_scans = 1;
        sources[0].limits.min_repeat = 0;
        let scans = vec![scan_at(0, 100, 60), scan_at(0, 3000, 60)];
        let report = verify_schedule(&scans, &network(), &sources, &oracle(), 7200);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::ScanCapExceeded));
    }

    #[test]
    fn test_session_overrun_is_reported() {
        let scans = vec![scan_at(0, 100, 60)];
        let report = verify_schedule(&scans, &network(), &sources(), &oracle(), 150);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == VerificationErrorKind::SessionOverrun));
    }
}
