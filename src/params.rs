//! Scheduling parameters.
//!
//! One [`Parameters`] value fully describes a run: objective weights,
//! optional subnetting, fillin modes, the look-ahead depth, and named
//! per-entity overrides of station/source/baseline limits. Runs never
//! share parameter state; the multi-scheduling generator hands each run
//! its own copy.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::{Network, Second, Source};

/// Relative weights of the candidate-scoring terms.
///
/// The multi-scheduling generator normalizes every emitted combination to
/// sum 1; hand-built values are used as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    /// Reward for pointing at poorly covered sky.
    pub sky_coverage: f64,
    /// Reward per baseline observed.
    pub number_of_observations: f64,
    /// Reward for short scans.
    pub duration: f64,
    /// Reward for rarely observed sources.
    pub average_sources: f64,
    /// Reward for evening out station usage.
    pub average_stations: f64,
    /// Penalty pressure against station idling.
    pub idle_time: f64,
    /// Bonus for low-declination sources.
    pub low_declination: f64,
    /// Bonus for low-elevation observations.
    pub low_elevation: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            sky_coverage: 0.30,
            number_of_observations: 0.25,
            duration: 0.15,
            average_sources: 0.05,
            average_stations: 0.05,
            idle_time: 0.20,
            low_declination: 0.0,
            low_elevation: 0.0,
        }
    }
}

impl ObjectiveWeights {
    /// Canonical dimension names, in [`as_array`](Self::as_array) order.
    pub const NAMES: [&'static str; 8] = [
        "weight_factor_sky_coverage",
        "weight_factor_number_of_observations",
        "weight_factor_duration",
        "weight_factor_average_sources",
        "weight_factor_average_stations",
        "weight_factor_idle_time",
        "weight_factor_low_declination",
        "weight_factor_low_elevation",
    ];

    /// The eight weights, in [`NAMES`](Self::NAMES) order.
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.sky_coverage,
            self.number_of_observations,
            self.duration,
            self.average_sources,
            self.average_stations,
            self.idle_time,
            self.low_declination,
            self.low_elevation,
        ]
    }

    /// Builds weights from an array in [`NAMES`](Self::NAMES) order.
    pub fn from_array(v: [f64; 8]) -> Self {
        Self {
            sky_coverage: v[0],
            number_of_observations: v[1],
            duration: v[2],
            average_sources: v[3],
            average_stations: v[4],
            idle_time: v[5],
            low_declination: v[6],
            low_elevation: v[7],
        }
    }
}

/// Subnetting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnettingConfig {
    /// Minimum angular separation between the two sources of a pair (rad).
    pub min_source_angle: f64,
    /// Minimum fraction of currently available stations a pair must use.
    pub min_participating_fraction: f64,
}

impl Default for SubnettingConfig {
    fn default() -> Self {
        Self {
            min_source_angle: 120.0_f64.to_radians(),
            min_participating_fraction: 0.6,
        }
    }
}

/// Full configuration of one scheduling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Delay of the first decision after session start (s).
    pub start_offset: Second,
    /// Subnetting pair selection, `None` disables it.
    pub subnetting: Option<SubnettingConfig>,
    /// Recurse into fillin scans while selected stations slew.
    pub fillin_during_scan_selection: bool,
    /// Score main candidates by their fillin opportunities too.
    pub fillin_influence_on_scan_selection: bool,
    /// Run a fillin pass over the finished schedule.
    pub fillin_a_posteriori: bool,
    /// Fold leading idle time into the following scan.
    pub idle_to_observing_time: bool,
    /// Look-ahead depth of the selection recursion.
    pub max_number_of_iterations: u32,
    /// Objective weights.
    pub weights: ObjectiveWeights,
    /// Declination below which the low-declination bonus starts (rad).
    pub low_declination_begin: f64,
    /// Declination at which the bonus saturates (rad).
    pub low_declination_full: f64,
    /// Elevation below which the low-elevation bonus starts (rad).
    pub low_elevation_begin: f64,
    /// Elevation at which the bonus saturates (rad).
    pub low_elevation_full: f64,
    /// Idle time at which the idle penalty saturates (s).
    pub idle_time_interval: Second,
    /// Override of the sky-coverage influence distance (rad).
    pub sky_coverage_influence_distance: Option<f64>,
    /// Override of the sky-coverage influence time (s).
    pub sky_coverage_influence_time: Option<Second>,
    /// Stop scheduling once mean sky saturation reaches this fraction.
    pub stop_at_sky_coverage: Option<f64>,

    /// Per-station limit overrides, keyed by station name.
    pub station_weight: HashMap<String, f64>,
    pub station_max_slew_time: HashMap<String, Second>,
    pub station_max_slew_distance: HashMap<String, f64>,
    pub station_max_wait: HashMap<String, Second>,
    pub station_min_elevation: HashMap<String, f64>,
    pub station_max_number_of_scans: HashMap<String, u32>,
    pub station_max_scan: HashMap<String, Second>,
    pub station_min_scan: HashMap<String, Second>,

    /// Per-source limit overrides, keyed by source name.
    pub source_weight: HashMap<String, f64>,
    pub source_min_number_of_stations: HashMap<String, u32>,
    pub source_min_flux: HashMap<String, f64>,
    pub source_max_number_of_scans: HashMap<String, u32>,
    pub source_min_elevation: HashMap<String, f64>,
    pub source_min_sun_distance: HashMap<String, f64>,
    pub source_max_scan: HashMap<String, Second>,
    pub source_min_scan: HashMap<String, Second>,
    pub source_min_repeat: HashMap<String, Second>,

    /// Per-baseline limit overrides, keyed by "NAME1-NAME2".
    pub baseline_weight: HashMap<String, f64>,
    pub baseline_max_scan: HashMap<String, Second>,
    pub baseline_min_scan: HashMap<String, Second>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            start_offset: 0,
            subnetting: Some(SubnettingConfig::default()),
            fillin_during_scan_selection: true,
            fillin_influence_on_scan_selection: true,
            fillin_a_posteriori: false,
            idle_to_observing_time: true,
            max_number_of_iterations: 3,
            weights: ObjectiveWeights::default(),
            low_declination_begin: 0.0,
            low_declination_full: 0.0,
            low_elevation_begin: 0.0,
            low_elevation_full: 0.0,
            idle_time_interval: 600,
            sky_coverage_influence_distance: None,
            sky_coverage_influence_time: None,
            stop_at_sky_coverage: None,
            station_weight: HashMap::new(),
            station_max_slew_time: HashMap::new(),
            station_max_slew_distance: HashMap::new(),
            station_max_wait: HashMap::new(),
            station_min_elevation: HashMap::new(),
            station_max_number_of_scans: HashMap::new(),
            station_max_scan: HashMap::new(),
            station_min_scan: HashMap::new(),
            source_weight: HashMap::new(),
            source_min_number_of_stations: HashMap::new(),
            source_min_flux: HashMap::new(),
            source_max_number_of_scans: HashMap::new(),
            source_min_elevation: HashMap::new(),
            source_min_sun_distance: HashMap::new(),
            source_max_scan: HashMap::new(),
            source_min_scan: HashMap::new(),
            source_min_repeat: HashMap::new(),
            baseline_weight: HashMap::new(),
            baseline_max_scan: HashMap::new(),
            baseline_min_scan: HashMap::new(),
        }
    }
}

impl Parameters {
    /// Writes every named override into the network and source limits.
    ///
    /// Overrides naming unknown stations, sources or baselines are logged
    /// and skipped so one typo cannot sink a whole batch run.
    pub fn apply_to(&self, network: &mut Network, sources: &mut [Source]) {
        macro_rules! apply_station {
            ($map:expr, $field:ident) => {
                for (name, value) in &$map {
                    match network.station_index(name) {
                        Some(id) => network.station_mut(id).limits.$field = value.clone(),
                        None => warn!("override for unknown station {name:?} skipped"),
                    }
                }
            };
        }
        apply_station!(self.station_weight, weight);
        apply_station!(self.station_max_slew_time, max_slew_time);
        apply_station!(self.station_max_slew_distance, max_slew_distance);
        apply_station!(self.station_max_wait, max_wait);
        apply_station!(self.station_min_elevation, min_elevation);
        apply_station!(self.station_max_number_of_scans, max_number_of_scans);
        apply_station!(self.station_max_scan, max_scan);
        apply_station!(self.station_min_scan, min_scan);

        macro_rules! apply_source {
            ($map:expr, $field:ident) => {
                for (name, value) in &$map {
                    match sources.iter_mut().find(|s| &s.name == name) {
                        Some(src) => src.limits.$field = value.clone(),
                        None => warn!("override for unknown source {name:?} skipped"),
                    }
                }
            };
        }
        apply_source!(self.source_weight, weight);
        apply_source!(self.source_min_number_of_stations, min_number_of_stations);
        apply_source!(self.source_min_flux, min_flux);
        apply_source!(self.source_max_number_of_scans, max_number_of_scans);
        apply_source!(self.source_min_elevation, min_elevation);
        apply_source!(self.source_min_sun_distance, min_sun_distance);
        apply_source!(self.source_max_scan, max_scan);
        apply_source!(self.source_min_scan, min_scan);
        apply_source!(self.source_min_repeat, min_repeat);

        macro_rules! apply_baseline {
            ($map:expr, $field:ident) => {
                for (name, value) in &$map {
                    match Self::baseline_by_name(network, name) {
                        Some((a, b)) => {
                            if let Some(bl) = network.baseline_between_mut(a, b) {
                                bl.limits.$field = value.clone();
                            }
                        }
                        None => warn!("override for unknown baseline {name:?} skipped"),
                    }
                }
            };
        }
        apply_baseline!(self.baseline_weight, weight);
        apply_baseline!(self.baseline_max_scan, max_scan);
        apply_baseline!(self.baseline_min_scan, min_scan);
    }

    fn baseline_by_name(network: &Network, name: &str) -> Option<(usize, usize)> {
        let (a, b) = name.split_once('-')?;
        Some((network.station_index(a)?, network.station_index(b)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeodeticPosition, Station};

    fn sample_network() -> Network {
        Network::new(vec![
            Station::new("AA", GeodeticPosition::new(0.8, 0.2, 0.0)),
            Station::new("BB", GeodeticPosition::new(0.4, -2.8, 0.0)),
        ])
    }

    #[test]
    fn test_weights_round_trip_array() {
        let w = ObjectiveWeights::default();
        assert_eq!(ObjectiveWeights::from_array(w.as_array()), w);
        assert_eq!(ObjectiveWeights::NAMES.len(), w.as_array().len());
    }

    #[test]
    fn test_station_overrides_apply() {
        let mut net = sample_network();
        let mut sources = vec![Source::quasar("Q1", 1.0, 0.2, 1.0)];
        let mut params = Parameters::default();
        params.station_max_wait.insert("BB".into(), 120);
        params.source_min_flux.insert("Q1".into(), 0.5);
        params.apply_to(&mut net, &mut sources);
        assert_eq!(net.station(1).limits.max_wait, 120);
        assert_eq!(net.station(0).limits.max_wait, 900);
        assert_eq!(sources[0].limits.min_flux, 0.5);
    }

    #[test]
    fn test_baseline_override_applies() {
        let mut net = sample_network();
        let mut params = Parameters::default();
        params.baseline_weight.insert("AA-BB".into(), 2.5);
        params.apply_to(&mut net, &mut []);
        assert_eq!(net.baseline_between(0, 1).unwrap().limits.weight, 2.5);
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let mut net = sample_network();
        let mut sources = vec![Source::quasar("Q1", 1.0, 0.2, 1.0)];
        let mut params = Parameters::default();
        params.station_weight.insert("ZZ".into(), 0.0);
        params.baseline_weight.insert("AA-ZZ".into(), 0.0);
        params.source_weight.insert("NOPE".into(), 0.0);
        params.apply_to(&mut net, &mut sources);
        assert_eq!(net.station(0).limits.weight, 1.0);
        assert_eq!(sources[0].limits.weight, 1.0);
    }
}
