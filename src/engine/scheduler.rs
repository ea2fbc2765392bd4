//! The scan-selection engine.
//!
//! One [`Scheduler`] owns a deep copy of the network and source catalog
//! and drives the whole run: the main greedy loop with bounded look-ahead
//! between the best single candidate and the best subnetting pair, the
//! fillin recursion into slew gaps, calibrator and high-impact blocks,
//! station availability events, and the final idle-time folding passes.
//!
//! Runs are deterministic: a scheduler built from the same inputs commits
//! the same scans in the same order.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::geometry::GeometryOracle;
use crate::models::{
    Network, PointingVector, Scan, ScanType, Second, Source, SourceIdx, StationIdx,
};
use crate::params::Parameters;

use super::blocks::{CalibratorKind, CalibratorProgress, CalibratorSetup, HighImpactScanDescriptor};
use super::subcon::{StationEndposition, Subcon, SubconRequest, SCORE_EPSILON};

/// Step used to skip ahead when no candidate exists anywhere (s).
const IDLE_STEP: Second = 60;

/// Which end of a scan the idle-folding pass moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Pull the scan start earlier.
    Start,
    /// Push the scan end later.
    End,
}

/// A change of one station's availability during the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationStatus {
    /// Station leaves the schedulable pool.
    Unavailable,
    /// Station rejoins the schedulable pool.
    Available,
    /// Station joins mid-session (late arrival); scheduled like
    /// [`StationStatus::Available`] from the event time on.
    Tagalong,
}

/// A timed availability event; processed as a hard break of the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEvent {
    /// Event time (s since session start).
    pub time: Second,
    /// Affected station.
    pub station: StationIdx,
    /// New status.
    pub status: StationStatus,
}

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Subcons built by the committing selection loops (probes excluded).
    pub n_subcons: u32,
    /// Single candidates considered.
    pub n_single_candidates: u32,
    /// Subnetting pairs considered.
    pub n_pair_candidates: u32,
    /// Committed scans per type.
    pub scans_by_type: HashMap<ScanType, u32>,
    /// Committed observations (baselines).
    pub n_observations: u32,
}

impl RunStatistics {
    fn record_subcon(&mut self, subcon: &Subcon) {
        self.n_subcons += 1;
        self.n_single_candidates += subcon.singles.len() as u32;
        self.n_pair_candidates += subcon.pairs.len() as u32;
    }

    fn record_scan(&mut self, scan: &Scan) {
        *self.scans_by_type.entry(scan.scan_type).or_default() += 1;
        self.n_observations += scan.n_baselines() as u32;
    }

    /// Total committed scans.
    pub fn n_scans(&self) -> u32 {
        self.scans_by_type.values().sum()
    }
}

/// Greedy look-ahead scan scheduler for one session.
#[derive(Clone)]
pub struct Scheduler {
    network: Network,
    sources: Vec<Source>,
    scans: Vec<Scan>,
    params: Parameters,
    oracle: Arc<dyn GeometryOracle>,
    session_end: Second,
    high_impact: Option<HighImpactScanDescriptor>,
    calibrator: Option<CalibratorSetup>,
    next_calibrator_at: Second,
    events: Vec<StationEvent>,
    next_event: usize,
    /// Per-station parallactic angles of committed PA-type scans.
    pa_history: Vec<Vec<f64>>,
    stats: RunStatistics,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("network", &self.network)
            .field("sources", &self.sources)
            .field("scans", &self.scans)
            .field("params", &self.params)
            .field("session_end", &self.session_end)
            .field("high_impact", &self.high_impact)
            .field("calibrator", &self.calibrator)
            .field("next_calibrator_at", &self.next_calibrator_at)
            .field("events", &self.events)
            .field("next_event", &self.next_event)
            .field("pa_history", &self.pa_history)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Builds a scheduler over its own copies of `network` and `sources`,
    /// with all parameter overrides applied.
    pub fn new(
        mut network: Network,
        mut sources: Vec<Source>,
        session_end: Second,
        params: Parameters,
        oracle: Arc<dyn GeometryOracle>,
    ) -> Result<Self, SchedulerError> {
        if network.n_stations() < 2 {
            return Err(SchedulerError::EmptyNetwork(network.n_stations()));
        }
        if sources.is_empty() {
            return Err(SchedulerError::NoSources);
        }
        if session_end <= params.start_offset {
            return Err(SchedulerError::EmptySession);
        }
        params.apply_to(&mut network, &mut sources);
        if let Some(d) = params.sky_coverage_influence_distance {
            for cov in network.sky_coverages_mut() {
                cov.max_influence_distance = d;
            }
        }
        if let Some(t) = params.sky_coverage_influence_time {
            for cov in network.sky_coverages_mut() {
                cov.max_influence_time = t;
            }
        }
        for id in 0..network.n_stations() {
            network.station_mut(id).state.available_at = params.start_offset;
        }
        let n = network.n_stations();
        Ok(Self {
            network,
            sources,
            scans: Vec::new(),
            params,
            oracle,
            session_end,
            high_impact: None,
            calibrator: None,
            next_calibrator_at: 0,
            events: Vec::new(),
            next_event: 0,
            pa_history: vec![Vec::new(); n],
            stats: RunStatistics::default(),
        })
    }

    /// Enables the high-impact pre-pass.
    pub fn with_high_impact(mut self, descriptor: HighImpactScanDescriptor) -> Self {
        self.high_impact = Some(descriptor);
        self
    }

    /// Enables periodic calibrator blocks.
    pub fn with_calibrator(mut self, setup: CalibratorSetup) -> Self {
        self.next_calibrator_at = self.params.start_offset.saturating_add(setup.interval);
        self.calibrator = Some(setup);
        self
    }

    /// Sets the station availability events.
    pub fn with_events(mut self, mut events: Vec<StationEvent>) -> Self {
        events.sort_by_key(|e| e.time);
        self.events = events;
        self
    }

    /// Runs the full scheduling pipeline.
    pub fn start(&mut self) {
        info!(
            "scheduling {} s session: {} stations, {} sources",
            self.session_end,
            self.network.n_stations(),
            self.sources.len()
        );
        if self.high_impact.is_some() {
            self.schedule_high_impact();
            self.scan_selection_between_scans(ScanType::Standard);
        } else {
            let ep = StationEndposition::uniform(&self.network, self.session_end);
            self.scan_selection(self.session_end, ScanType::Standard, &ep, 0);
        }
        if self.params.fillin_a_posteriori {
            self.scan_selection_between_scans(ScanType::Fillin);
        }
        if self.params.idle_to_observing_time {
            self.idle_to_scan_time(Timestamp::End);
            self.idle_to_scan_time(Timestamp::Start);
        }
        self.sort_schedule();
        info!(
            "run finished: {} scans, {} observations",
            self.scans.len(),
            self.stats.n_observations
        );
    }

    /// The committed schedule, sorted by scan start.
    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    /// The run's network copy, including final station state.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The run's source copy, including final counters.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Counters collected during the run.
    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// The main selection loop over one time window.
    ///
    /// `depth` 0 is the committing top level (events, calibrator blocks,
    /// early stop, idle skipping); deeper levels run inside a fillin or
    /// between-scans window and plainly fill it.
    fn scan_selection(
        &mut self,
        end_time: Second,
        scan_type: ScanType,
        endposition: &StationEndposition,
        depth: u32,
    ) {
        loop {
            let Some(now) = self.decision_time() else { break };
            if now >= end_time {
                break;
            }
            if depth == 0 {
                if self.check_for_new_events(now) {
                    continue;
                }
                if self.stop_condition_met(now) {
                    break;
                }
                if self.calibrator_due(now) {
                    self.calibrator_block(now);
                    continue;
                }
            }
            let subcon = self.build_subcon(scan_type, Some(endposition), None);
            self.stats.record_subcon(&subcon);
            let chosen = self.select_best(&subcon, end_time, endposition, depth);
            let Some(window_start) = chosen.iter().map(|s| s.start()).min() else {
                if self.advance_idle(now, end_time) {
                    continue;
                }
                break;
            };
            if window_start >= end_time {
                if self.advance_idle(now, end_time) {
                    continue;
                }
                break;
            }
            if self.params.fillin_during_scan_selection
                && matches!(scan_type, ScanType::Standard)
                && depth < self.params.max_number_of_iterations
            {
                let mut nested = endposition.clone();
                nested.pin_scans(&chosen);
                self.scan_selection(window_start, ScanType::Fillin, &nested, depth + 1);
            }
            for scan in chosen {
                self.commit(scan);
            }
        }
    }

    /// Earliest time at which a new scan could start, `None` once fewer
    /// than two stations can observe.
    fn decision_time(&self) -> Option<Second> {
        let times: Vec<Second> = self
            .network
            .stations()
            .iter()
            .filter(|s| s.can_observe())
            .map(|s| s.state.available_at)
            .collect();
        if times.len() < 2 {
            return None;
        }
        times.into_iter().min()
    }

    fn build_subcon(
        &self,
        scan_type: ScanType,
        endposition: Option<&StationEndposition>,
        allowed_sources: Option<&[SourceIdx]>,
    ) -> Subcon {
        SubconRequest {
            network: &self.network,
            sources: &self.sources,
            oracle: self.oracle.as_ref(),
            params: &self.params,
            scan_type,
            endposition,
            allowed_sources,
            pa_history: Some(&self.pa_history),
        }
        .build()
    }

    /// Chooses between the best single and the best subnetting pair.
    ///
    /// When both exist, each option is scored over a short look-ahead
    /// horizon on a cloned engine; otherwise the single wins by default.
    fn select_best(
        &self,
        subcon: &Subcon,
        end_time: Second,
        endposition: &StationEndposition,
        depth: u32,
    ) -> Vec<Scan> {
        let Some(best) = subcon.best_single() else {
            return Vec::new();
        };
        let single = vec![subcon.singles[best].clone()];
        let Some((a, b, _)) = subcon.best_pair() else {
            return single;
        };
        let mut pair = vec![subcon.singles[a].clone(), subcon.singles[b].clone()];
        for scan in &mut pair {
            scan.scan_type = ScanType::Subnetting;
        }
        let single_score = self.branch_score(&single, end_time, endposition, depth);
        let pair_score = self.branch_score(&pair, end_time, endposition, depth);
        // On a tie the pair wins: it keeps more of the network busy for
        // the same accumulated score.
        if pair_score + SCORE_EPSILON >= single_score {
            pair
        } else {
            single
        }
    }

    /// Score of committing `scans` now: their own scores plus either a
    /// bounded greedy continuation or, when no look-ahead runs, the
    /// fillin opportunity they open up. The two are alternatives; the
    /// continuation would count the same future scans a second time.
    fn branch_score(
        &self,
        scans: &[Scan],
        end_time: Second,
        endposition: &StationEndposition,
        depth: u32,
    ) -> f64 {
        let mut total: f64 = scans.iter().map(|s| s.score).sum();
        if depth > 0 || self.params.max_number_of_iterations <= 1 {
            if self.params.fillin_during_scan_selection
                && self.params.fillin_influence_on_scan_selection
            {
                total += self.fillin_bonus(scans, endposition);
            }
            return total;
        }
        let mut probe = self.clone();
        for scan in scans {
            probe.commit(scan.clone());
        }
        for _ in 1..self.params.max_number_of_iterations {
            let Some(now) = probe.decision_time() else { break };
            if now >= end_time {
                break;
            }
            let subcon = probe.build_subcon(ScanType::Standard, Some(endposition), None);
            let Some(best) = subcon.best_single() else { break };
            let next = subcon.singles[best].clone();
            total += next.score;
            probe.commit(next);
        }
        total
    }

    /// Best fillin-scan score available underneath `chosen`.
    fn fillin_bonus(&self, chosen: &[Scan], endposition: &StationEndposition) -> f64 {
        let mut nested = endposition.clone();
        nested.pin_scans(chosen);
        let subcon = self.build_subcon(ScanType::Fillin, Some(&nested), None);
        subcon
            .best_single()
            .map(|i| subcon.singles[i].score)
            .unwrap_or(0.0)
    }

    /// Commits one scan: station and source counters, sky coverage,
    /// baselines, parallactic-angle history, time advance.
    fn commit(&mut self, scan: Scan) {
        debug!(
            "commit {:?} scan of {} at {}..{} s with {} stations",
            scan.scan_type,
            self.sources[scan.source].name,
            scan.start(),
            scan.end(),
            scan.n_stations()
        );
        let src_idx = scan.source;
        for (k, pv) in scan.pointings.iter().enumerate() {
            let end = scan.end_times[k];
            let slew = self.network.station(pv.station).slew_to(pv).seconds;
            let end_pv = self
                .pointing_at(pv.station, src_idx, end)
                .unwrap_or(PointingVector { time: end, ..*pv });
            let station = self.network.station_mut(pv.station);
            let idle = pv
                .time
                .saturating_sub(station.state.available_at.saturating_add(slew));
            station.state.idle_time += idle;
            station.state.n_scans += 1;
            station.state.observed_time += end.saturating_sub(pv.time);
            station.state.available_at = end;
            station.state.current_pointing = Some(end_pv);
            self.network.record_pointing(pv);
        }
        let ids: Vec<StationIdx> = scan.station_ids().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                self.network.record_observation(ids[i], ids[j]);
            }
        }
        if matches!(
            scan.scan_type,
            ScanType::ParallacticAngle | ScanType::DiffParallacticAngle
        ) {
            for pv in &scan.pointings {
                let angle = self
                    .oracle
                    .parallactic_angle(self.network.station(pv.station), &self.sources[src_idx], pv.time)
                    .unwrap_or(pv.azimuth);
                self.pa_history[pv.station].push(angle);
            }
        }
        let source = &mut self.sources[src_idx];
        source.state.n_scans += 1;
        source.state.n_observations += scan.n_baselines() as u32;
        source.state.last_observed = Some(
            source
                .state
                .last_observed
                .map_or(scan.end(), |t| t.max(scan.end())),
        );
        self.stats.record_scan(&scan);
        self.scans.push(scan);
    }

    /// Raw oracle pointing, no elevation filtering.
    fn pointing_at(
        &self,
        station: StationIdx,
        source: SourceIdx,
        time: Second,
    ) -> Option<PointingVector> {
        let st = self.network.station(station);
        let (az, el) = self
            .oracle
            .compute_pointing(st, &self.sources[source], time)?;
        Some(PointingVector {
            station,
            source,
            time,
            azimuth: az,
            elevation: el,
        })
    }

    /// Oracle pointing filtered by the combined minimum elevation.
    fn admissible_pointing(
        &self,
        station: StationIdx,
        source: SourceIdx,
        time: Second,
    ) -> Option<PointingVector> {
        let pv = self.pointing_at(station, source, time)?;
        let limit = self.network.station(station).limits.min_elevation
            .max(self.sources[source].limits.min_elevation);
        (pv.elevation >= limit).then_some(pv)
    }

    /// Latest time in `lo..=hi` with an admissible pointing, assuming
    /// `lo` has one.
    fn visibility_cap(
        &self,
        station: StationIdx,
        source: SourceIdx,
        lo: Second,
        hi: Second,
    ) -> Second {
        if hi <= lo || self.admissible_pointing(station, source, hi).is_some() {
            return hi;
        }
        let (mut lo, mut hi) = (lo, hi);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.admissible_pointing(station, source, mid).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Skips every caught-up station ahead by one idle step. Returns
    /// false when the window is exhausted.
    fn advance_idle(&mut self, now: Second, end_time: Second) -> bool {
        let next = now.saturating_add(IDLE_STEP);
        if next >= end_time.min(self.session_end) {
            return false;
        }
        for id in 0..self.network.n_stations() {
            let station = self.network.station_mut(id);
            if station.state.available && station.state.available_at <= now {
                station.state.idle_time += next - station.state.available_at;
                station.state.available_at = next;
            }
        }
        debug!("no candidate at {now} s, skipping to {next} s");
        true
    }

    /// Applies all events due at `now`; any event is a hard break.
    fn check_for_new_events(&mut self, now: Second) -> bool {
        let mut changed = false;
        while self.next_event < self.events.len() && self.events[self.next_event].time <= now {
            let event = self.events[self.next_event];
            self.next_event += 1;
            let station = self.network.station_mut(event.station);
            match event.status {
                StationStatus::Unavailable => {
                    info!("station {} unavailable from {} s", station.name, event.time);
                    station.state.available = false;
                }
                StationStatus::Available | StationStatus::Tagalong => {
                    info!("station {} available from {} s", station.name, event.time);
                    station.state.available = true;
                    station.state.available_at = station.state.available_at.max(event.time);
                }
            }
            changed = true;
        }
        changed
    }

    /// Availability of `station` at time `t` per the event stream.
    fn availability_at(&self, station: StationIdx, t: Second) -> bool {
        let mut available = true;
        for event in self.events.iter().filter(|e| e.station == station) {
            if event.time <= t {
                available = !matches!(event.status, StationStatus::Unavailable);
            }
        }
        available
    }

    /// Whether `station` is available at `a` with no status change
    /// before `b`.
    fn available_throughout(&self, station: StationIdx, a: Second, b: Second) -> bool {
        self.availability_at(station, a)
            && !self
                .events
                .iter()
                .any(|e| e.station == station && e.time > a && e.time < b)
    }

    /// Latest availability boundary at or before `t`; scans never fold
    /// back across it.
    fn availability_floor(&self, station: StationIdx, t: Second) -> Second {
        self.events
            .iter()
            .filter(|e| e.station == station && e.time <= t)
            .map(|e| e.time)
            .fold(self.params.start_offset, Second::max)
    }

    /// Earliest availability boundary after `t`; scans never extend
    /// across it.
    fn availability_cap(&self, station: StationIdx, t: Second) -> Second {
        self.events
            .iter()
            .filter(|e| e.station == station && e.time > t)
            .map(|e| e.time)
            .fold(self.session_end, Second::min)
    }

    fn stop_condition_met(&self, now: Second) -> bool {
        let Some(limit) = self.params.stop_at_sky_coverage else {
            return false;
        };
        let saturation = self.network.mean_sky_saturation(now);
        if saturation >= limit {
            info!("sky saturation {saturation:.2} reached target {limit:.2} at {now} s, stopping");
            true
        } else {
            false
        }
    }

    fn calibrator_due(&self, now: Second) -> bool {
        self.calibrator.is_some() && now >= self.next_calibrator_at
    }

    /// Runs one calibrator block at `now`.
    fn calibrator_block(&mut self, now: Second) {
        let Some(setup) = self.calibrator.clone() else { return };
        self.next_calibrator_at = now.saturating_add(setup.interval);
        let scan_type = setup.kind.scan_type();
        let ep = StationEndposition::uniform(&self.network, self.session_end);
        let mut progress = CalibratorProgress::default();
        let mut committed = 0;
        info!("{:?} calibrator block at {now} s", setup.kind);
        while committed < setup.max_scans_per_block {
            let subcon = self.build_subcon(scan_type, Some(&ep), Some(&setup.sources));
            self.stats.record_subcon(&subcon);
            let Some(best) = subcon.best_single() else { break };
            let scan = subcon.singles[best].clone();
            progress.update(&setup, &scan);
            self.commit(scan);
            committed += 1;
            if setup.kind == CalibratorKind::Elevation && progress.satisfied() {
                break;
            }
        }
    }

    /// Pins high-impact scans on a fixed time grid before the main fill.
    fn schedule_high_impact(&mut self) {
        let Some(descriptor) = self.high_impact.clone() else { return };
        if descriptor.targets.is_empty() || descriptor.interval == 0 {
            return;
        }
        let pool = descriptor.source_pool();
        let ep = StationEndposition::uniform(&self.network, self.session_end);
        let mut last_end: Option<Second> = None;
        let mut t = self.params.start_offset;
        while t < self.session_end {
            if let Some(prev) = last_end {
                if t < prev.saturating_add(descriptor.min_time_between_scans) {
                    t = t.saturating_add(descriptor.interval);
                    continue;
                }
            }
            for id in 0..self.network.n_stations() {
                let available = self.availability_at(id, t);
                let station = self.network.station_mut(id);
                station.state.available = available;
                station.state.available_at = station.state.available_at.max(t);
            }
            let subcon = self.build_subcon(ScanType::HighImpact, Some(&ep), Some(&pool));
            self.stats.record_subcon(&subcon);
            let mut best: Option<Scan> = None;
            for scan in &subcon.singles {
                let Some(target) = descriptor.target_for(scan.source) else {
                    continue;
                };
                if !target.admits(scan) {
                    continue;
                }
                if best
                    .as_ref()
                    .map_or(true, |b| scan.score > b.score + SCORE_EPSILON)
                {
                    best = Some(scan.clone());
                }
            }
            if let Some(scan) = best {
                info!(
                    "high-impact scan of {} at {} s",
                    self.sources[scan.source].name,
                    scan.start()
                );
                last_end = Some(scan.end());
                self.commit(scan);
            }
            t = t.saturating_add(descriptor.interval);
        }
    }

    /// Fills the gaps between the already committed scans.
    ///
    /// Rewinds station pointing state to the session start, then walks
    /// the fixed schedule segment by segment: each gap is filled with a
    /// bounded selection whose endposition pins every station to its
    /// next fixed scan, then the fixed scan is replayed.
    fn scan_selection_between_scans(&mut self, scan_type: ScanType) {
        self.sort_schedule();
        let fixed = std::mem::take(&mut self.scans);
        for id in 0..self.network.n_stations() {
            let station = self.network.station_mut(id);
            station.state.available_at = self.params.start_offset;
            station.state.current_pointing = None;
        }
        for k in 0..=fixed.len() {
            let segment_end = fixed.get(k).map_or(self.session_end, |s| s.start());
            for id in 0..self.network.n_stations() {
                let from = self.network.station(id).state.available_at;
                let available = self.available_throughout(id, from, segment_end);
                self.network.station_mut(id).state.available = available;
            }
            let ep = StationEndposition::from_scans(&fixed[k..], &self.network, self.session_end);
            self.scan_selection(segment_end, scan_type, &ep, 1);
            if let Some(scan) = fixed.get(k) {
                self.replay_fixed(scan);
            }
        }
        for id in 0..self.network.n_stations() {
            let available = self.availability_at(id, self.session_end);
            self.network.station_mut(id).state.available = available;
        }
        self.scans.extend(fixed);
        self.sort_schedule();
    }

    /// Walks the station state through an already committed scan.
    fn replay_fixed(&mut self, scan: &Scan) {
        for (k, pv) in scan.pointings.iter().enumerate() {
            let end = scan.end_times[k];
            let end_pv = self
                .pointing_at(pv.station, scan.source, end)
                .unwrap_or(PointingVector { time: end, ..*pv });
            let station = self.network.station_mut(pv.station);
            station.state.available_at = end;
            station.state.current_pointing = Some(end_pv);
        }
    }

    /// Folds idle time into the adjacent scans.
    ///
    /// [`Timestamp::End`] extends each per-station end towards the next
    /// obligation; [`Timestamp::Start`] pulls each per-station start back
    /// towards the previous one. Both recompute the oracle pointing and
    /// slew inside a small correction loop so the result stays feasible.
    fn idle_to_scan_time(&mut self, timestamp: Timestamp) {
        self.sort_schedule();
        let n = self.network.n_stations();
        let mut chains: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (i, scan) in self.scans.iter().enumerate() {
            for (k, pv) in scan.pointings.iter().enumerate() {
                chains[pv.station].push((i, k));
            }
        }
        match timestamp {
            Timestamp::End => self.extend_scan_ends(&chains),
            Timestamp::Start => self.advance_scan_starts(&chains),
        }
    }

    fn max_duration_for(&self, scan: &Scan, station: StationIdx) -> Second {
        self.network
            .station(station)
            .limits
            .max_scan
            .min(self.sources[scan.source].limits.max_scan)
    }

    fn extend_scan_ends(&mut self, chains: &[Vec<(usize, usize)>]) {
        for (station_id, chain) in chains.iter().enumerate() {
            for (pos, &(i, k)) in chain.iter().enumerate() {
                let (next_start, next_pv) = match chain.get(pos + 1) {
                    Some(&(j, m)) => {
                        let pv = self.scans[j].pointings[m];
                        (pv.time, Some(pv))
                    }
                    None => (self.session_end, None),
                };
                let start = self.scans[i].pointings[k].time;
                let start_pv = self.scans[i].pointings[k];
                let old_end = self.scans[i].end_times[k];
                let source = self.scans[i].source;
                let cap = start
                    .saturating_add(self.max_duration_for(&self.scans[i], station_id))
                    .min(self.session_end)
                    .min(self.availability_cap(station_id, old_end));
                // The source must stay above the elevation limit for the
                // whole extension, not just at the committed end.
                let cap = self.visibility_cap(station_id, source, old_end, cap);
                let mut new_end = next_start.min(cap);
                if let Some(target) = next_pv {
                    // Moving the end moves the end pointing, which moves
                    // the slew; a few corrections settle it.
                    for _ in 0..8 {
                        let end_pv = self
                            .pointing_at(station_id, source, new_end)
                            .unwrap_or(PointingVector { time: new_end, ..start_pv });
                        let slew = self
                            .network
                            .station(station_id)
                            .slew
                            .between(&end_pv, &target)
                            .seconds;
                        let feasible = next_start.saturating_sub(slew).min(cap);
                        if feasible >= new_end {
                            break;
                        }
                        new_end = feasible;
                    }
                }
                if new_end > old_end {
                    let delta = new_end - old_end;
                    self.scans[i].end_times[k] = new_end;
                    let station = self.network.station_mut(station_id);
                    station.state.observed_time += delta;
                    station.state.idle_time = station.state.idle_time.saturating_sub(delta);
                }
            }
        }
    }

    fn advance_scan_starts(&mut self, chains: &[Vec<(usize, usize)>]) {
        // Earliest allowed start per source, so the repeat interval
        // between same-source scans survives the fold.
        let mut source_floor: HashMap<SourceIdx, Second> = HashMap::new();
        let order = self.scans_in_start_order();
        for i in order {
            let source = self.scans[i].source;
            let floor = source_floor.get(&source).copied().unwrap_or(0);
            for k in 0..self.scans[i].pointings.len() {
                let station_id = self.scans[i].pointings[k].station;
                self.advance_one_start(i, k, station_id, floor, chains);
            }
            // Every scan of a source floors the next one, calibrator
            // scans included, so no fold can close a repeat gap.
            let repeat = self.sources[source].limits.min_repeat;
            source_floor.insert(source, self.scans[i].start().saturating_add(repeat));
        }
    }

    fn scans_in_start_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.scans.len()).collect();
        order.sort_by_key(|&i| (self.scans[i].start(), self.scans[i].end()));
        order
    }

    fn advance_one_start(
        &mut self,
        i: usize,
        k: usize,
        station_id: StationIdx,
        floor: Second,
        chains: &[Vec<(usize, usize)>],
    ) {
        let old_start = self.scans[i].pointings[k].time;
        let end = self.scans[i].end_times[k];
        let source = self.scans[i].source;
        let max_dur = self.max_duration_for(&self.scans[i], station_id);
        let prev = chains[station_id]
            .iter()
            .position(|&(j, m)| (j, m) == (i, k))
            .and_then(|pos| pos.checked_sub(1))
            .map(|pos| chains[station_id][pos]);

        let avail_floor = self.availability_floor(station_id, old_start);
        let mut t = end.saturating_sub(max_dur).max(floor).max(avail_floor);
        let mut accepted: Option<PointingVector> = None;
        for _ in 0..8 {
            if t >= old_start {
                return;
            }
            let Some(pv_new) = self.admissible_pointing(station_id, source, t) else {
                return;
            };
            let ready = match prev {
                Some((j, m)) => {
                    let prev_end = self.scans[j].end_times[m];
                    let prev_pv = self
                        .pointing_at(station_id, self.scans[j].source, prev_end)
                        .unwrap_or(PointingVector {
                            time: prev_end,
                            ..self.scans[j].pointings[m]
                        });
                    let slew = self
                        .network
                        .station(station_id)
                        .slew
                        .between(&prev_pv, &pv_new)
                        .seconds;
                    prev_end.saturating_add(slew)
                }
                None => avail_floor
                    .saturating_add(self.network.station(station_id).slew.from_rest().seconds),
            };
            if ready <= t {
                accepted = Some(pv_new);
                break;
            }
            t = ready;
        }
        if let Some(pv_new) = accepted {
            let delta = old_start - t;
            self.scans[i].pointings[k] = pv_new;
            let station = self.network.station_mut(station_id);
            station.state.observed_time += delta;
            station.state.idle_time = station.state.idle_time.saturating_sub(delta);
        }
    }

    fn sort_schedule(&mut self) {
        self.scans.sort_by_key(|s| (s.start(), s.end()));
    }
}

#[cfg(test)]
mod tests {
    use super::super::blocks::HighImpactTarget;
    use super::*;
    use crate::geometry::SiderealModel;
    use crate::models::{GeodeticPosition, Station};
    use crate::verify::verify_schedule;

    fn station_at(name: &str, lat_deg: f64, lon_deg: f64) -> Station {
        Station::new(
            name,
            GeodeticPosition::new(lat_deg.to_radians(), lon_deg.to_radians(), 0.0),
        )
    }

    fn two_station_network() -> Network {
        Network::new(vec![
            station_at("AA", 45.0, 0.0),
            station_at("BB", 50.0, 10.0),
        ])
    }

    /// Three circumpolar sources, always visible from both stations.
    fn three_sources(min_repeat: Second) -> Vec<Source> {
        let mut sources = vec![
            Source::quasar("Q1", 0.0, 70.0_f64.to_radians(), 2.0),
            Source::quasar("Q2", 2.0, 75.0_f64.to_radians(), 2.0),
            Source::quasar("Q3", 4.0, 72.0_f64.to_radians(), 2.0),
        ];
        for src in &mut sources {
            src.limits.min_repeat = min_repeat;
        }
        sources
    }

    fn oracle() -> Arc<dyn GeometryOracle> {
        Arc::new(SiderealModel::new(0.0))
    }

    fn run(network: Network, sources: Vec<Source>, session: Second, params: Parameters) -> Scheduler {
        let mut scheduler =
            Scheduler::new(network, sources, session, params, oracle()).expect("valid inputs");
        scheduler.start();
        scheduler
    }

    #[test]
    fn test_construction_validates_inputs() {
        let err = Scheduler::new(
            Network::new(vec![station_at("AA", 45.0, 0.0)]),
            three_sources(300),
            3600,
            Parameters::default(),
            oracle(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::EmptyNetwork(1));
        let err = Scheduler::new(
            two_station_network(),
            Vec::new(),
            3600,
            Parameters::default(),
            oracle(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::NoSources);
        let err = Scheduler::new(
            two_station_network(),
            three_sources(300),
            0,
            Parameters::default(),
            oracle(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::EmptySession);
    }

    #[test]
    fn test_end_to_end_passes_verification() {
        let scheduler = run(
            two_station_network(),
            three_sources(300),
            3600,
            Parameters::default(),
        );
        assert!(!scheduler.scans().is_empty());
        let report = verify_schedule(
            scheduler.scans(),
            scheduler.network(),
            scheduler.sources(),
            &SiderealModel::new(0.0),
            3600,
        );
        assert!(report.passed(), "verification errors: {report}");
        // Sorted by start, and every scan fits the session.
        let starts: Vec<Second> = scheduler.scans().iter().map(|s| s.start()).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
        assert!(scheduler.scans().iter().all(|s| s.end() <= 3600));
    }

    #[test]
    fn test_station_gaps_stay_bounded() {
        let scheduler = run(
            two_station_network(),
            three_sources(300),
            3600,
            Parameters::default(),
        );
        let max_wait = scheduler
            .network()
            .stations()
            .iter()
            .map(|s| s.limits.max_wait)
            .max()
            .unwrap();
        for id in 0..scheduler.network().n_stations() {
            let mut intervals: Vec<(Second, Second)> = scheduler
                .scans()
                .iter()
                .filter_map(|s| s.interval_for(id))
                .collect();
            intervals.sort_unstable();
            for pair in intervals.windows(2) {
                // Repeat-limited idling is skipped in 60 s steps, so a
                // gap never exceeds the wait limit plus the repeat floor.
                assert!(pair[1].0 - pair[0].1 <= max_wait.max(300 + 2 * IDLE_STEP));
            }
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = run(
            two_station_network(),
            three_sources(300),
            3600,
            Parameters::default(),
        );
        let b = run(
            two_station_network(),
            three_sources(300),
            3600,
            Parameters::default(),
        );
        assert_eq!(a.scans(), b.scans());
        assert_eq!(a.statistics(), b.statistics());
    }

    #[test]
    fn test_min_repeat_separates_same_source_scans() {
        let scheduler = run(
            two_station_network(),
            three_sources(600),
            7200,
            Parameters::default(),
        );
        for src in 0..3 {
            let starts: Vec<Second> = scheduler
                .scans()
                .iter()
                .filter(|s| s.source == src)
                .map(|s| s.start())
                .collect();
            for pair in starts.windows(2) {
                assert!(pair[1] >= pair[0] + 600);
            }
        }
    }

    #[test]
    fn test_unavailable_station_is_never_scheduled() {
        let network = Network::new(vec![
            station_at("AA", 45.0, 0.0),
            station_at("BB", 50.0, 10.0),
            station_at("CC", 40.0, 5.0),
        ]);
        let mut scheduler = Scheduler::new(
            network,
            three_sources(300),
            3600,
            Parameters::default(),
            oracle(),
        )
        .unwrap();
        scheduler = scheduler.with_events(vec![StationEvent {
            time: 0,
            station: 2,
            status: StationStatus::Unavailable,
        }]);
        scheduler.start();
        assert!(!scheduler.scans().is_empty());
        assert!(scheduler.scans().iter().all(|s| !s.contains_station(2)));
    }

    #[test]
    fn test_late_station_joins_after_event() {
        let network = Network::new(vec![
            station_at("AA", 45.0, 0.0),
            station_at("BB", 50.0, 10.0),
            station_at("CC", 40.0, 5.0),
        ]);
        let mut scheduler = Scheduler::new(
            network,
            three_sources(300),
            7200,
            Parameters::default(),
            oracle(),
        )
        .unwrap();
        scheduler = scheduler.with_events(vec![
            StationEvent {
                time: 0,
                station: 2,
                status: StationStatus::Unavailable,
            },
            StationEvent {
                time: 1800,
                station: 2,
                status: StationStatus::Tagalong,
            },
        ]);
        scheduler.start();
        let cc_scans: Vec<&Scan> = scheduler
            .scans()
            .iter()
            .filter(|s| s.contains_station(2))
            .collect();
        assert!(!cc_scans.is_empty());
        assert!(cc_scans.iter().all(|s| s.interval_for(2).unwrap().0 >= 1800));
    }

    #[test]
    fn test_subnetting_does_not_reduce_utilization() {
        // Two clusters on opposite sides of the earth; each sees one of
        // two equatorial sources, so subnetting can run them in parallel.
        let network = || {
            Network::new(vec![
                station_at("AA", 45.0, 0.0),
                station_at("BB", 45.0, 10.0),
                station_at("CC", 45.0, 170.0),
                station_at("DD", 45.0, 180.0),
            ])
        };
        let sources = || {
            let mut v = vec![
                Source::quasar("E1", 0.0, 0.0, 2.0),
                Source::quasar("E2", std::f64::consts::PI, 0.0, 2.0),
            ];
            for s in &mut v {
                s.limits.min_repeat = 300;
            }
            v
        };
        let observed = |scheduler: &Scheduler| -> u64 {
            scheduler
                .network()
                .stations()
                .iter()
                .map(|s| s.state.observed_time as u64)
                .sum()
        };
        let with = run(network(), sources(), 3600, Parameters::default());
        let mut params = Parameters::default();
        params.subnetting = None;
        let without = run(network(), sources(), 3600, params);
        assert!(observed(&with) >= observed(&without));
        assert!(with
            .scans()
            .iter()
            .any(|s| s.scan_type == ScanType::Subnetting));
    }

    #[test]
    fn test_calibrator_block_injected_on_interval() {
        let mut scheduler = Scheduler::new(
            two_station_network(),
            three_sources(300),
            7200,
            Parameters::default(),
            oracle(),
        )
        .unwrap();
        scheduler = scheduler.with_calibrator(
            CalibratorSetup::new(1800, vec![0, 1, 2], CalibratorKind::Elevation).with_max_scans(2),
        );
        scheduler.start();
        let n_cal = scheduler
            .scans()
            .iter()
            .filter(|s| s.scan_type == ScanType::Calibrator)
            .count();
        assert!(n_cal >= 1);
        assert!(scheduler
            .scans()
            .iter()
            .any(|s| s.scan_type == ScanType::Standard));
    }

    #[test]
    fn test_a_posteriori_fillin_passes_verification() {
        let mut params = Parameters::default();
        params.fillin_a_posteriori = true;
        let scheduler = run(two_station_network(), three_sources(300), 7200, params);
        assert!(!scheduler.scans().is_empty());
        let report = verify_schedule(
            scheduler.scans(),
            scheduler.network(),
            scheduler.sources(),
            &SiderealModel::new(0.0),
            7200,
        );
        assert!(report.passed(), "verification errors: {report}");
    }

    #[test]
    fn test_setting_source_scans_are_trimmed_to_visibility() {
        // One weak equatorial source that sets roughly 3000 s into the
        // session: the flux asks for 600 s scans, but neither selection
        // nor the folding pass may track it below the elevation limit.
        let network = Network::new(vec![
            station_at("AA", 45.0, 0.0),
            station_at("BB", 45.0, 0.5),
        ]);
        let mut source = Source::quasar("W", -1.2279, 0.0, 0.1);
        source.limits.min_repeat = 300;
        let scheduler = run(network, vec![source], 7200, Parameters::default());
        assert!(!scheduler.scans().is_empty());
        let report = verify_schedule(
            scheduler.scans(),
            scheduler.network(),
            scheduler.sources(),
            &SiderealModel::new(0.0),
            7200,
        );
        assert!(report.passed(), "verification errors: {report}");
    }

    #[test]
    fn test_parallactic_angle_blocks_commit_scans() {
        for kind in [
            CalibratorKind::ParallacticAngle,
            CalibratorKind::DiffParallacticAngle,
        ] {
            let mut scheduler = Scheduler::new(
                two_station_network(),
                three_sources(300),
                7200,
                Parameters::default(),
                oracle(),
            )
            .unwrap();
            scheduler = scheduler
                .with_calibrator(CalibratorSetup::new(1800, vec![0, 1, 2], kind).with_max_scans(2));
            scheduler.start();
            let expected = kind.scan_type();
            assert!(scheduler.scans().iter().any(|s| s.scan_type == expected));
            let report = verify_schedule(
                scheduler.scans(),
                scheduler.network(),
                scheduler.sources(),
                &SiderealModel::new(0.0),
                7200,
            );
            assert!(report.passed(), "verification errors: {report}");
        }
    }

    #[test]
    fn test_high_impact_prepass_then_gap_fill() {
        let mut scheduler = Scheduler::new(
            two_station_network(),
            three_sources(300),
            7200,
            Parameters::default(),
            oracle(),
        )
        .unwrap();
        scheduler = scheduler.with_high_impact(HighImpactScanDescriptor::new(
            3600,
            600,
            vec![HighImpactTarget::new(0)],
        ));
        scheduler.start();
        let high: Vec<&Scan> = scheduler
            .scans()
            .iter()
            .filter(|s| s.scan_type == ScanType::HighImpact)
            .collect();
        assert!(!high.is_empty());
        assert!(high.iter().all(|s| s.source == 0));
        // The gaps around the pinned scans get ordinary scans.
        assert!(scheduler
            .scans()
            .iter()
            .any(|s| s.scan_type == ScanType::Standard));
    }

    #[test]
    fn test_idle_folding_grows_observing_time() {
        let folded = run(
            two_station_network(),
            three_sources(300),
            3600,
            Parameters::default(),
        );
        let mut params = Parameters::default();
        params.idle_to_observing_time = false;
        let plain = run(two_station_network(), three_sources(300), 3600, params);
        let observed = |s: &Scheduler| -> u64 {
            s.scans().iter().map(|sc| sc.mean_duration() as u64).sum()
        };
        assert!(observed(&folded) >= observed(&plain));
    }

    #[test]
    fn test_sky_coverage_early_stop() {
        let mut params = Parameters::default();
        params.stop_at_sky_coverage = Some(0.0);
        let scheduler = run(two_station_network(), three_sources(300), 3600, params);
        // Saturation 0 is reached immediately; nothing gets scheduled.
        assert!(scheduler.scans().is_empty());
    }
}
