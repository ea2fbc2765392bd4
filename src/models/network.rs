//! Station network.
//!
//! Arena owning every station, the baseline between every station pair,
//! and the sky-coverage accumulators. Stations closer than a configurable
//! twin distance share one accumulator (co-located antennas see the same
//! sky). All cross-references are stable integer indices so that one run
//! can deep-copy the whole network cheaply and correctly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    Baseline, BaselineIdx, Interpolation, PointingVector, Second, SkyCoverage, Station, StationIdx,
};

/// The station network of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    stations: Vec<Station>,
    baselines: Vec<Baseline>,
    sky_coverages: Vec<SkyCoverage>,
    /// Sky-coverage group per station.
    station_to_coverage: Vec<usize>,
    baseline_lookup: HashMap<(StationIdx, StationIdx), BaselineIdx>,
}

impl Network {
    /// Builds a network from stations: one baseline per pair, one
    /// sky-coverage accumulator per station.
    pub fn new(stations: Vec<Station>) -> Self {
        let n = stations.len();
        let mut baselines = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        let mut baseline_lookup = HashMap::new();
        for a in 0..n {
            for b in (a + 1)..n {
                baseline_lookup.insert((a, b), baselines.len());
                baselines.push(Baseline::new(a, b));
            }
        }
        Self {
            sky_coverages: stations.iter().map(|_| SkyCoverage::default()).collect(),
            station_to_coverage: (0..n).collect(),
            stations,
            baselines,
            baseline_lookup,
        }
    }

    /// Regroups sky coverages so stations within `twin_distance_m` of an
    /// earlier station share its accumulator.
    pub fn with_twin_distance(mut self, twin_distance_m: f64) -> Self {
        let mut groups: Vec<usize> = Vec::with_capacity(self.stations.len());
        let mut representatives: Vec<StationIdx> = Vec::new();
        for (i, station) in self.stations.iter().enumerate() {
            let shared = representatives.iter().position(|&rep| {
                station
                    .position
                    .distance_to(&self.stations[rep].position)
                    <= twin_distance_m
            });
            match shared {
                Some(g) => groups.push(g),
                None => {
                    representatives.push(i);
                    groups.push(representatives.len() - 1);
                }
            }
        }
        self.sky_coverages = representatives.iter().map(|_| SkyCoverage::default()).collect();
        self.station_to_coverage = groups;
        self
    }

    /// Applies one influence configuration to every coverage group.
    pub fn with_sky_coverage_config(
        mut self,
        max_influence_distance: f64,
        max_influence_time: Second,
        distance_interpolation: Interpolation,
        time_interpolation: Interpolation,
    ) -> Self {
        for cov in &mut self.sky_coverages {
            *cov = SkyCoverage::new(
                max_influence_distance,
                max_influence_time,
                distance_interpolation,
                time_interpolation,
            );
        }
        self
    }

    /// Number of stations.
    pub fn n_stations(&self) -> usize {
        self.stations.len()
    }

    /// Number of baselines.
    pub fn n_baselines(&self) -> usize {
        self.baselines.len()
    }

    /// All stations.
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Station by index.
    pub fn station(&self, id: StationIdx) -> &Station {
        &self.stations[id]
    }

    /// Mutable station by index.
    pub fn station_mut(&mut self, id: StationIdx) -> &mut Station {
        &mut self.stations[id]
    }

    /// Station index by name.
    pub fn station_index(&self, name: &str) -> Option<StationIdx> {
        self.stations.iter().position(|s| s.name == name)
    }

    /// All baselines.
    pub fn baselines(&self) -> &[Baseline] {
        &self.baselines
    }

    /// Baseline between two stations.
    pub fn baseline_between(&self, a: StationIdx, b: StationIdx) -> Option<&Baseline> {
        self.baseline_id(a, b).map(|id| &self.baselines[id])
    }

    /// Mutable baseline between two stations.
    pub fn baseline_between_mut(&mut self, a: StationIdx, b: StationIdx) -> Option<&mut Baseline> {
        self.baseline_id(a, b).map(move |id| &mut self.baselines[id])
    }

    /// Baseline index between two stations.
    pub fn baseline_id(&self, a: StationIdx, b: StationIdx) -> Option<BaselineIdx> {
        self.baseline_lookup.get(&(a.min(b), a.max(b))).copied()
    }

    /// All sky-coverage accumulators.
    pub fn sky_coverages(&self) -> &[SkyCoverage] {
        &self.sky_coverages
    }

    /// Mutable access to the coverage accumulators.
    pub fn sky_coverages_mut(&mut self) -> &mut [SkyCoverage] {
        &mut self.sky_coverages
    }

    /// Coverage group index of a station.
    pub fn coverage_of(&self, station: StationIdx) -> usize {
        self.station_to_coverage[station]
    }

    /// Records a committed pointing in the station's coverage group.
    pub fn record_pointing(&mut self, pv: &PointingVector) {
        let group = self.station_to_coverage[pv.station];
        self.sky_coverages[group].update(*pv);
    }

    /// Bumps the observation counter of the baseline between `a` and `b`.
    pub fn record_observation(&mut self, a: StationIdx, b: StationIdx) {
        if let Some(bl) = self.baseline_between_mut(a, b) {
            bl.n_observations += 1;
        }
    }

    /// Total sky-coverage score of a set of candidate pointings.
    pub fn score_sky_coverage(&self, pvs: &[PointingVector]) -> f64 {
        pvs.iter()
            .map(|pv| self.sky_coverages[self.station_to_coverage[pv.station]].score(pv))
            .sum()
    }

    /// Mean grid-saturation over all coverage groups at `now`.
    pub fn mean_sky_saturation(&self, now: Second) -> f64 {
        if self.sky_coverages.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .sky_coverages
            .iter()
            .map(|c| c.saturation_fraction(now))
            .sum();
        sum / self.sky_coverages.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeodeticPosition;

    fn station(name: &str, lat_deg: f64, lon_deg: f64) -> Station {
        Station::new(
            name,
            GeodeticPosition::new(lat_deg.to_radians(), lon_deg.to_radians(), 0.0),
        )
    }

    fn sample_network() -> Network {
        Network::new(vec![
            station("AA", 49.0, 12.0),
            station("BB", 22.0, -159.0),
            station("CC", -25.0, 27.0),
        ])
    }

    fn pv(station: StationIdx, time: Second) -> PointingVector {
        PointingVector {
            station,
            source: 0,
            time,
            azimuth: 1.0,
            elevation: 0.8,
        }
    }

    #[test]
    fn test_all_pairs_have_baselines() {
        let net = sample_network();
        assert_eq!(net.n_baselines(), 3);
        assert!(net.baseline_between(0, 1).is_some());
        assert!(net.baseline_between(2, 0).is_some());
        assert_eq!(net.baseline_id(1, 2), net.baseline_id(2, 1));
    }

    #[test]
    fn test_station_lookup_by_name() {
        let net = sample_network();
        assert_eq!(net.station_index("BB"), Some(1));
        assert_eq!(net.station_index("ZZ"), None);
    }

    #[test]
    fn test_twin_stations_share_coverage() {
        let mut stations = vec![
            station("AA", 49.0, 12.0),
            station("AA2", 49.0, 12.0),
            station("BB", 22.0, -159.0),
        ];
        // Nudge the twin a few hundred meters.
        stations[1].position.height_m = 200.0;
        let net = Network::new(stations).with_twin_distance(5_000.0);
        assert_eq!(net.coverage_of(0), net.coverage_of(1));
        assert_ne!(net.coverage_of(0), net.coverage_of(2));
        assert_eq!(net.sky_coverages().len(), 2);
    }

    #[test]
    fn test_record_observation_counts() {
        let mut net = sample_network();
        net.record_observation(2, 0);
        net.record_observation(0, 2);
        assert_eq!(net.baseline_between(0, 2).unwrap().n_observations, 2);
        assert_eq!(net.baseline_between(0, 1).unwrap().n_observations, 0);
    }

    #[test]
    fn test_sky_score_sums_per_station() {
        let mut net = sample_network();
        net.record_pointing(&pv(0, 0));
        // Station 0 is partly shadowed, station 1 sees fresh sky.
        let total = net.score_sky_coverage(&[pv(0, 10), pv(1, 10)]);
        assert!(total < 2.0);
        assert!(total > 1.0);
        assert_eq!(net.score_sky_coverage(&[pv(2, 10)]), 1.0);
    }
}
