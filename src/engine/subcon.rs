//! Subcon generation and scoring.
//!
//! A subcon is the set of all feasible scan candidates at one decision
//! point: one candidate per visible source, plus subnetting pairs of
//! station-disjoint candidates. Candidates are built through a fixpoint
//! alignment (slowest station defines the common start, stations that
//! would wait too long drop out) and scored against subcon-wide
//! normalizers, so scores are only comparable within one subcon.
//!
//! # Reference
//!
//! Scan alignment and scoring follow Schartner & Böhm, PASP 131,
//! 084501 (2019).

use crate::geometry::{angular_separation, GeometryOracle};
use crate::models::{
    Network, PointingVector, Scan, ScanType, Second, Source, SourceIdx, Station, StationIdx,
};
use crate::params::Parameters;

/// Scores within this distance count as tied and fall through to the
/// deterministic tie-breakers.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Flux-to-duration constant: required duration is `ceil(C / flux_jy)`
/// seconds, before clamping to the station/source windows.
const SNR_DURATION_CONST: f64 = 120.0;

/// Per-station deadlines a candidate scan must respect.
///
/// Used by the fillin recursion (stations must reach their already
/// selected next scan in time) and by the between-scans passes (stations
/// must be done before the segment ends).
#[derive(Debug, Clone)]
pub struct StationEndposition {
    deadlines: Vec<Second>,
    required: Vec<Option<PointingVector>>,
}

impl StationEndposition {
    /// Every station must finish by `deadline`, no required pointing.
    pub fn uniform(network: &Network, deadline: Second) -> Self {
        Self {
            deadlines: vec![deadline; network.n_stations()],
            required: vec![None; network.n_stations()],
        }
    }

    /// Deadlines from already selected scans: a station participating in
    /// one of `scans` must reach the start pointing of its *first* such
    /// scan by its start time; every other station is free until
    /// `fallback_end`. Pass scans in chronological order.
    pub fn from_scans(scans: &[Scan], network: &Network, fallback_end: Second) -> Self {
        let mut ep = Self::uniform(network, fallback_end);
        for scan in scans {
            for pv in &scan.pointings {
                if ep.required[pv.station].is_none() {
                    ep.deadlines[pv.station] = pv.time;
                    ep.required[pv.station] = Some(*pv);
                }
            }
        }
        ep
    }

    /// Overwrites the entries of every station participating in `scans`.
    ///
    /// Tightens an existing endposition for the fillin recursion: chosen
    /// scans pin their stations, everyone else keeps the outer deadline.
    pub fn pin_scans(&mut self, scans: &[Scan]) {
        for scan in scans {
            for pv in &scan.pointings {
                self.deadlines[pv.station] = pv.time;
                self.required[pv.station] = Some(*pv);
            }
        }
    }

    /// Deadline of one station.
    pub fn deadline(&self, station: StationIdx) -> Second {
        self.deadlines[station]
    }

    /// Pointing the station must reach by its deadline, if any.
    pub fn required(&self, station: StationIdx) -> Option<&PointingVector> {
        self.required[station].as_ref()
    }

    /// Whether a station ending at `end` with pointing `at` can still
    /// make its deadline.
    fn reachable(&self, station: &Station, id: StationIdx, end: Second, at: &PointingVector) -> bool {
        match &self.required[id] {
            Some(target) => {
                let slew = station.slew.between(at, target);
                end.saturating_add(slew.seconds) <= self.deadlines[id]
            }
            None => end <= self.deadlines[id],
        }
    }
}

/// All feasible candidates at one decision point.
#[derive(Debug, Clone, Default)]
pub struct Subcon {
    /// Single-source candidates, scored.
    pub singles: Vec<Scan>,
    /// Subnetting pairs as indices into `singles` with a combined score.
    pub pairs: Vec<(usize, usize, f64)>,
}

impl Subcon {
    /// Total number of single candidates.
    pub fn len(&self) -> usize {
        self.singles.len()
    }

    /// Whether no candidate exists.
    pub fn is_empty(&self) -> bool {
        self.singles.is_empty()
    }

    /// Index of the best single candidate.
    ///
    /// Ties within [`SCORE_EPSILON`] break towards more stations, then
    /// towards the earlier scan end, so selection is deterministic.
    pub fn best_single(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, scan) in self.singles.iter().enumerate() {
            best = Some(match best {
                None => i,
                Some(b) => {
                    let cur = &self.singles[b];
                    if scan.score > cur.score + SCORE_EPSILON {
                        i
                    } else if scan.score < cur.score - SCORE_EPSILON {
                        b
                    } else if scan.n_stations() != cur.n_stations() {
                        if scan.n_stations() > cur.n_stations() {
                            i
                        } else {
                            b
                        }
                    } else if scan.end() < cur.end() {
                        i
                    } else {
                        b
                    }
                }
            });
        }
        best
    }

    /// Best subnetting pair, by combined score.
    ///
    /// Ties within [`SCORE_EPSILON`] break like [`Subcon::best_single`]:
    /// more combined stations first, then the earlier combined end.
    pub fn best_pair(&self) -> Option<(usize, usize, f64)> {
        let stations = |i: usize, j: usize| self.singles[i].n_stations() + self.singles[j].n_stations();
        let end = |i: usize, j: usize| self.singles[i].end().max(self.singles[j].end());
        let mut best: Option<(usize, usize, f64)> = None;
        for &(i, j, score) in &self.pairs {
            let Some((bi, bj, best_score)) = best else {
                best = Some((i, j, score));
                continue;
            };
            let better = if score > best_score + SCORE_EPSILON {
                true
            } else if score < best_score - SCORE_EPSILON {
                false
            } else if stations(i, j) != stations(bi, bj) {
                stations(i, j) > stations(bi, bj)
            } else {
                end(i, j) < end(bi, bj)
            };
            if better {
                best = Some((i, j, score));
            }
        }
        best
    }
}

/// One candidate-generation request.
pub struct SubconRequest<'a> {
    pub network: &'a Network,
    pub sources: &'a [Source],
    pub oracle: &'a dyn GeometryOracle,
    pub params: &'a Parameters,
    pub scan_type: ScanType,
    /// Deadlines the candidates must respect, if any.
    pub endposition: Option<&'a StationEndposition>,
    /// Restrict candidate sources to this set (calibrator/high-impact
    /// blocks), `None` for the full catalog.
    pub allowed_sources: Option<&'a [SourceIdx]>,
    /// Per-station parallactic angles already observed, for the
    /// angle-diversity scan types.
    pub pa_history: Option<&'a [Vec<f64>]>,
}

struct StationCand {
    station: StationIdx,
    ready: Second,
    duration: Second,
}

struct Candidate {
    scan: Scan,
    waits: Vec<Second>,
}

impl SubconRequest<'_> {
    /// Builds and scores the subcon at the current network state.
    pub fn build(&self) -> Subcon {
        let mut candidates: Vec<Candidate> = Vec::new();
        for (idx, src) in self.sources.iter().enumerate() {
            if let Some(allowed) = self.allowed_sources {
                if !allowed.contains(&idx) {
                    continue;
                }
            }
            if let Some(cand) = self.candidate_for(idx, src) {
                candidates.push(cand);
            }
        }
        self.score(&mut candidates);
        let singles: Vec<Scan> = candidates.into_iter().map(|c| c.scan).collect();
        let pairs = self.pair_up(&singles);
        Subcon { singles, pairs }
    }

    /// Builds the aligned candidate for one source, if it is feasible.
    fn candidate_for(&self, idx: SourceIdx, src: &Source) -> Option<Candidate> {
        if src.limits.weight <= 0.0
            || src.state.n_scans >= src.limits.max_number_of_scans
            || src.flux() < src.limits.min_flux
        {
            return None;
        }

        let mut cands: Vec<StationCand> = Vec::new();
        for (id, station) in self.network.stations().iter().enumerate() {
            if !station.can_observe() {
                continue;
            }
            if let Some(cand) = self.station_candidate(id, station, src) {
                cands.push(cand);
            }
        }

        // Fixpoint: the slowest station defines the aligned start.
        // Waiting lets the source drift, so every station's readiness is
        // re-derived against the pointing at that start; then stations
        // that would idle past their wait limit or miss their deadline
        // drop out, which may move the start again.
        let start = loop {
            let start = cands.iter().map(|c| c.ready).max()?;
            let mut moved = false;
            for c in &mut cands {
                let station = self.network.station(c.station);
                let Some(pv) = self.pointing(c.station, station, idx, src, start) else {
                    continue;
                };
                let ready = station
                    .state
                    .available_at
                    .saturating_add(station.slew_to(&pv).seconds);
                if ready > c.ready {
                    c.ready = ready;
                    moved = true;
                }
            }
            if moved {
                continue;
            }
            let n_before = cands.len();
            cands.retain(|c| {
                let station = self.network.station(c.station);
                if start - c.ready > station.limits.max_wait {
                    return false;
                }
                let Some(pv) = self.pointing(c.station, station, idx, src, start) else {
                    return false;
                };
                let slew = station.slew_to(&pv);
                if slew.seconds > station.limits.max_slew_time
                    || slew.distance > station.limits.max_slew_distance
                {
                    return false;
                }
                match self.endposition {
                    Some(ep) => {
                        let end = start.saturating_add(c.duration);
                        // Raw oracle position: the end pointing may sit
                        // below the elevation limit, the slew out of it
                        // is still real.
                        let end_pv = match self.oracle.compute_pointing(station, src, end) {
                            Some((az, el)) => PointingVector {
                                time: end,
                                azimuth: az,
                                elevation: el,
                                ..pv
                            },
                            None => PointingVector { time: end, ..pv },
                        };
                        ep.reachable(station, c.station, end, &end_pv)
                    }
                    None => true,
                }
            });
            if cands.len() == n_before {
                break start;
            }
        };

        // The sky can cut the scan short: trim each duration to the time
        // the source stays above the elevation limit, and drop stations
        // whose remaining window falls under the minimum scan length.
        for c in &mut cands {
            let station = self.network.station(c.station);
            let end = start.saturating_add(c.duration);
            if self.pointing(c.station, station, idx, src, end).is_none() {
                let visible = self.last_admissible(c.station, station, src, start, end);
                c.duration = visible.saturating_sub(start);
            }
        }
        cands.retain(|c| {
            let station = self.network.station(c.station);
            c.duration >= station.limits.min_scan.max(src.limits.min_scan)
        });

        let min_stations = src.limits.min_number_of_stations.max(2) as usize;
        if cands.len() < min_stations {
            return None;
        }

        if matches!(self.scan_type, ScanType::Standard | ScanType::Subnetting | ScanType::Fillin) {
            if let Some(last) = src.state.last_observed {
                if start < last.saturating_add(src.limits.min_repeat) {
                    return None;
                }
            }
        }

        if let Some(min_sun) = self.sun_limit(src) {
            if let Some(sep) = self.oracle.sun_separation(src, start) {
                if sep < min_sun {
                    return None;
                }
            }
        }

        // Every baseline must support the common observing window.
        for i in 0..cands.len() {
            for j in (i + 1)..cands.len() {
                let common = cands[i].duration.min(cands[j].duration);
                let bl = self
                    .network
                    .baseline_between(cands[i].station, cands[j].station)?;
                if common < bl.limits.min_scan || common > bl.limits.max_scan {
                    return None;
                }
            }
        }

        let mut pointings = Vec::with_capacity(cands.len());
        let mut end_times = Vec::with_capacity(cands.len());
        let mut waits = Vec::with_capacity(cands.len());
        for c in &cands {
            let station = self.network.station(c.station);
            let pv = self.pointing(c.station, station, idx, src, start)?;
            pointings.push(pv);
            end_times.push(start + c.duration);
            waits.push(start - c.ready);
        }

        Some(Candidate {
            scan: Scan::new(idx, self.scan_type, pointings, end_times, 0.0),
            waits,
        })
    }

    /// Feasibility of one station for one source at its earliest time.
    fn station_candidate(
        &self,
        id: StationIdx,
        station: &Station,
        src: &Source,
    ) -> Option<StationCand> {
        let t_avail = station.state.available_at;
        let pv = self.pointing(id, station, self.sources.len(), src, t_avail)?;
        let slew = station.slew_to(&pv);
        if slew.seconds > station.limits.max_slew_time
            || slew.distance > station.limits.max_slew_distance
        {
            return None;
        }
        let min_scan = station.limits.min_scan.max(src.limits.min_scan);
        let max_scan = station.limits.max_scan.min(src.limits.max_scan);
        if min_scan > max_scan {
            return None;
        }
        let needed = (SNR_DURATION_CONST / src.flux()).ceil() as Second;
        Some(StationCand {
            station: id,
            ready: t_avail.saturating_add(slew.seconds),
            duration: needed.clamp(min_scan, max_scan),
        })
    }

    /// Latest time in `lo..=hi` at which the pointing stays admissible,
    /// assuming it is at `lo`.
    fn last_admissible(
        &self,
        id: StationIdx,
        station: &Station,
        src: &Source,
        lo: Second,
        hi: Second,
    ) -> Second {
        let (mut lo, mut hi) = (lo, hi);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.pointing(id, station, self.sources.len(), src, mid).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Pointing of `station` at `source` at `time`, filtered by the
    /// combined elevation limit. `src_idx` may be a placeholder during
    /// the feasibility probe; the stored value is fixed at alignment.
    fn pointing(
        &self,
        id: StationIdx,
        station: &Station,
        src_idx: SourceIdx,
        src: &Source,
        time: Second,
    ) -> Option<PointingVector> {
        let (az, el) = self.oracle.compute_pointing(station, src, time)?;
        if el < station.limits.min_elevation.max(src.limits.min_elevation) {
            return None;
        }
        Some(PointingVector {
            station: id,
            source: src_idx,
            time,
            azimuth: az,
            elevation: el,
        })
    }

    fn sun_limit(&self, src: &Source) -> Option<f64> {
        (src.limits.min_sun_distance > 0.0).then_some(src.limits.min_sun_distance)
    }

    /// Scores every candidate against subcon-wide normalizers.
    fn score(&self, candidates: &mut [Candidate]) {
        let max_n_bl = candidates
            .iter()
            .map(|c| c.scan.n_baselines())
            .max()
            .unwrap_or(0) as f64;
        let durations: Vec<f64> = candidates.iter().map(|c| c.scan.mean_duration()).collect();
        let min_dur = durations.iter().copied().fold(f64::INFINITY, f64::min);
        let max_dur = durations.iter().copied().fold(0.0_f64, f64::max);
        let w = &self.params.weights;

        for (c, mean_dur) in candidates.iter_mut().zip(durations) {
            let src = &self.sources[c.scan.source];
            let n_sta = c.scan.n_stations() as f64;
            let start = c.scan.start();

            let sky = self.network.score_sky_coverage(&c.scan.pointings) / n_sta;
            let n_obs = if max_n_bl > 0.0 {
                c.scan.n_baselines() as f64 / max_n_bl * self.mean_baseline_weight(&c.scan)
            } else {
                0.0
            };
            let duration = if max_dur > min_dur {
                (max_dur - mean_dur) / (max_dur - min_dur)
            } else {
                0.0
            };
            let avg_src = 1.0 / (1.0 + src.state.n_scans as f64);
            let avg_sta = c
                .scan
                .station_ids()
                .map(|id| 1.0 / (1.0 + self.network.station(id).state.n_scans as f64))
                .sum::<f64>()
                / n_sta;
            let idle = c
                .waits
                .iter()
                .map(|&wait| (wait as f64 / self.params.idle_time_interval.max(1) as f64).min(1.0))
                .sum::<f64>()
                / n_sta;
            let low_dec = self.low_declination_term(src, start);
            let low_el = c
                .scan
                .pointings
                .iter()
                .map(|pv| ramp_down(pv.elevation, self.params.low_elevation_begin, self.params.low_elevation_full))
                .sum::<f64>()
                / n_sta;

            let mut total = w.sky_coverage * sky
                + w.number_of_observations * n_obs
                + w.duration * duration
                + w.average_sources * avg_src
                + w.average_stations * avg_sta
                + w.idle_time * idle
                + w.low_declination * low_dec
                + w.low_elevation * low_el;
            total *= src.limits.weight * self.mean_station_weight(&c.scan);

            if matches!(
                self.scan_type,
                ScanType::ParallacticAngle | ScanType::DiffParallacticAngle
            ) {
                total = self.parallactic_score(&c.scan);
            }
            c.scan.score = total;
        }
    }

    fn mean_baseline_weight(&self, scan: &Scan) -> f64 {
        let ids: Vec<StationIdx> = scan.station_ids().collect();
        let mut sum = 0.0;
        let mut n = 0usize;
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                if let Some(bl) = self.network.baseline_between(ids[i], ids[j]) {
                    sum += bl.limits.weight;
                    n += 1;
                }
            }
        }
        if n == 0 {
            1.0
        } else {
            sum / n as f64
        }
    }

    fn mean_station_weight(&self, scan: &Scan) -> f64 {
        let sum: f64 = scan
            .station_ids()
            .map(|id| self.network.station(id).limits.weight)
            .sum();
        sum / scan.n_stations() as f64
    }

    fn low_declination_term(&self, src: &Source, time: Second) -> f64 {
        match src.radec(time) {
            Some((_, dec)) => ramp_down(
                dec,
                self.params.low_declination_begin,
                self.params.low_declination_full,
            ),
            None => 0.0,
        }
    }

    /// Angle-diversity score used by the parallactic-angle scan types.
    ///
    /// [`ScanType::ParallacticAngle`] rewards angles far from anything in
    /// the per-station history; [`ScanType::DiffParallacticAngle`] rewards
    /// spread between the participating stations. Falls back to azimuth
    /// when the oracle has no parallactic-angle model.
    fn parallactic_score(&self, scan: &Scan) -> f64 {
        let src = &self.sources[scan.source];
        let angles: Vec<f64> = scan
            .pointings
            .iter()
            .map(|pv| {
                self.oracle
                    .parallactic_angle(self.network.station(pv.station), src, pv.time)
                    .unwrap_or(pv.azimuth)
            })
            .collect();
        match self.scan_type {
            ScanType::DiffParallacticAngle => {
                let mut spread = 0.0_f64;
                for i in 0..angles.len() {
                    for j in (i + 1)..angles.len() {
                        spread = spread.max(wrapped_angle(angles[i] - angles[j]));
                    }
                }
                spread / std::f64::consts::PI
            }
            _ => {
                let history = self.pa_history;
                let novelty: f64 = scan
                    .pointings
                    .iter()
                    .zip(&angles)
                    .map(|(pv, &angle)| {
                        let seen = history.map(|h| &h[pv.station][..]).unwrap_or(&[]);
                        seen.iter()
                            .map(|&past| wrapped_angle(angle - past))
                            .fold(std::f64::consts::PI, f64::min)
                    })
                    .sum();
                novelty / (angles.len() as f64 * std::f64::consts::PI)
            }
        }
    }

    /// Pairs station-disjoint candidates whose sources are far apart and
    /// which jointly keep enough of the network busy.
    fn pair_up(&self, singles: &[Scan]) -> Vec<(usize, usize, f64)> {
        let Some(cfg) = (matches!(self.scan_type, ScanType::Standard))
            .then_some(self.params.subnetting.as_ref())
            .flatten()
        else {
            return Vec::new();
        };
        let n_available = self
            .network
            .stations()
            .iter()
            .filter(|s| s.can_observe())
            .count();
        let min_joint = (cfg.min_participating_fraction * n_available as f64).ceil() as usize;

        let mut pairs = Vec::new();
        for i in 0..singles.len() {
            for j in (i + 1)..singles.len() {
                let (a, b) = (&singles[i], &singles[j]);
                if !a.disjoint_with(b) || a.n_stations() + b.n_stations() < min_joint {
                    continue;
                }
                let Some(sep) = self.source_separation(a, b) else {
                    continue;
                };
                if sep < cfg.min_source_angle {
                    continue;
                }
                pairs.push((i, j, a.score + b.score));
            }
        }
        pairs
    }

    fn source_separation(&self, a: &Scan, b: &Scan) -> Option<f64> {
        let (ra1, dec1) = self.sources[a.source].radec(a.start())?;
        let (ra2, dec2) = self.sources[b.source].radec(b.start())?;
        Some(angular_separation(ra1, dec1, ra2, dec2))
    }
}

/// Absolute angle difference wrapped into `[0, pi]`.
fn wrapped_angle(d: f64) -> f64 {
    let d = d.abs() % std::f64::consts::TAU;
    if d > std::f64::consts::PI {
        std::f64::consts::TAU - d
    } else {
        d
    }
}

/// 0 above `begin`, 1 below `full`, linear between.
fn ramp_down(value: f64, begin: f64, full: f64) -> f64 {
    if begin <= full {
        return 0.0;
    }
    if value >= begin {
        0.0
    } else if value <= full {
        1.0
    } else {
        (begin - value) / (begin - full)
    }
}
