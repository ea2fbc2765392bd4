//! Multi-scheduling parameter generation.
//!
//! Batch runs explore a grid of [`Parameters`] variants: boolean flags,
//! numeric value lists, objective-weight combinations and grouped
//! per-entity overrides. Each registered dimension multiplies the
//! schedule count, so the generator enforces a hard combination ceiling
//! and can draw a seeded random subset when the grid is still too large
//! to run exhaustively.

use std::collections::HashMap;
use std::fmt;

use log::warn;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::MultiSchedulingError;
use crate::models::Second;
use crate::params::{ObjectiveWeights, Parameters, SubnettingConfig};

/// Hard ceiling on generated parameter combinations.
pub const MAX_COMBINATIONS: usize = 9_999;

/// Two weight combinations closer than this on every component are one.
const WEIGHT_EPSILON: f64 = 1e-10;

/// One explored axis of the parameter grid.
struct Dimension {
    name: String,
    len: usize,
    apply: Box<dyn Fn(&mut Parameters, usize)>,
}

/// Builder for a grid of scheduling parameter variants.
///
/// Dimensions registered first vary slowest across the emitted list.
/// Objective weights are special: all `weight_factor_*` value lists are
/// expanded jointly, each combination normalized to sum 1, and duplicate
/// directions dropped.
#[derive(Default)]
pub struct MultiScheduling {
    dimensions: Vec<Dimension>,
    weight_values: [Option<Vec<f64>>; 8],
    station_groups: HashMap<String, Vec<String>>,
    source_groups: HashMap<String, Vec<String>>,
    baseline_groups: HashMap<String, Vec<String>>,
}

impl fmt::Debug for MultiScheduling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiScheduling")
            .field(
                "dimensions",
                &self
                    .dimensions
                    .iter()
                    .map(|d| (d.name.as_str(), d.len))
                    .collect::<Vec<_>>(),
            )
            .field("weight_values", &self.weight_values)
            .finish_non_exhaustive()
    }
}

impl MultiScheduling {
    /// Empty grid; [`create_parameters`](Self::create_parameters) emits
    /// exactly the base parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a named station group for grouped overrides.
    ///
    /// Groups must be defined before the overrides that use them.
    pub fn add_station_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.station_groups.insert(name.into(), members);
    }

    /// Defines a named source group for grouped overrides.
    pub fn add_source_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.source_groups.insert(name.into(), members);
    }

    /// Defines a named baseline group for grouped overrides.
    pub fn add_baseline_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.baseline_groups.insert(name.into(), members);
    }

    /// Explores both settings of a boolean parameter.
    ///
    /// Known flags: `general_subnetting`,
    /// `general_fillinmode_during_scan_selection`,
    /// `general_fillinmode_influence_on_scan_selection`,
    /// `general_fillinmode_a_posteriori`. Unknown names are logged and
    /// skipped.
    pub fn add_flag(&mut self, name: &str) {
        let setter: fn(&mut Parameters, bool) = match name {
            "general_subnetting" => |p, on| {
                p.subnetting = on.then(|| SubnettingConfig::default());
            },
            "general_fillinmode_during_scan_selection" => {
                |p, on| p.fillin_during_scan_selection = on
            }
            "general_fillinmode_influence_on_scan_selection" => {
                |p, on| p.fillin_influence_on_scan_selection = on
            }
            "general_fillinmode_a_posteriori" => |p, on| p.fillin_a_posteriori = on,
            _ => {
                warn!("unknown multi-scheduling flag {name:?} skipped");
                return;
            }
        };
        self.dimensions.push(Dimension {
            name: name.to_owned(),
            len: 2,
            apply: Box::new(move |p, i| setter(p, i == 0)),
        });
    }

    /// Explores a list of values of a numeric parameter.
    ///
    /// `weight_factor_*` objective weights are collected for joint
    /// expansion instead of forming an independent dimension. Unknown
    /// names are logged and skipped.
    pub fn add_values(&mut self, name: &str, values: Vec<f64>) {
        if values.is_empty() {
            warn!("empty value list for {name:?} skipped");
            return;
        }
        if let Some(k) = ObjectiveWeights::NAMES.iter().position(|&n| n == name) {
            self.weight_values[k] = Some(values);
            return;
        }
        let setter: fn(&mut Parameters, f64) = match name {
            "general_subnetting_min_source_angle" => |p, v| {
                p.subnetting
                    .get_or_insert_with(SubnettingConfig::default)
                    .min_source_angle = v;
            },
            "general_subnetting_min_participating_stations" => |p, v| {
                p.subnetting
                    .get_or_insert_with(SubnettingConfig::default)
                    .min_participating_fraction = v;
            },
            "weight_factor_idle_time_interval" => |p, v| p.idle_time_interval = v as Second,
            "weight_factor_low_declination_begin" => |p, v| p.low_declination_begin = v,
            "weight_factor_low_declination_full" => |p, v| p.low_declination_full = v,
            "weight_factor_low_elevation_begin" => |p, v| p.low_elevation_begin = v,
            "weight_factor_low_elevation_full" => |p, v| p.low_elevation_full = v,
            "weight_factor_influence_distance" => {
                |p, v| p.sky_coverage_influence_distance = Some(v)
            }
            "weight_factor_influence_time" => {
                |p, v| p.sky_coverage_influence_time = Some(v as Second)
            }
            _ => {
                warn!("unknown multi-scheduling parameter {name:?} skipped");
                return;
            }
        };
        self.dimensions.push(Dimension {
            name: name.to_owned(),
            len: values.len(),
            apply: Box::new(move |p, i| setter(p, values[i])),
        });
    }

    /// Explores a list of session start offsets (s).
    pub fn add_start_offsets(&mut self, values: Vec<Second>) {
        if values.is_empty() {
            warn!("empty start offset list skipped");
            return;
        }
        self.dimensions.push(Dimension {
            name: "general_start_offset".to_owned(),
            len: values.len(),
            apply: Box::new(move |p, i| p.start_offset = values[i]),
        });
    }

    /// Explores a list of values of a per-entity override.
    ///
    /// `member` is a station/source/baseline name or a previously defined
    /// group name; a group applies the value to every member. Known
    /// parameters are the override map names of [`Parameters`], e.g.
    /// `station_max_wait`, `source_min_flux` or `baseline_weight`.
    pub fn add_member_values(&mut self, parameter: &str, member: &str, values: Vec<f64>) {
        if values.is_empty() {
            warn!("empty value list for {parameter:?} skipped");
            return;
        }
        let setter: fn(&mut Parameters, &str, f64) = match parameter {
            "station_weight" => |p, n, v| drop(p.station_weight.insert(n.into(), v)),
            "station_max_slew_time" => {
                |p, n, v| drop(p.station_max_slew_time.insert(n.into(), v as Second))
            }
            "station_max_slew_distance" => {
                |p, n, v| drop(p.station_max_slew_distance.insert(n.into(), v))
            }
            "station_max_wait" => |p, n, v| drop(p.station_max_wait.insert(n.into(), v as Second)),
            "station_min_elevation" => |p, n, v| drop(p.station_min_elevation.insert(n.into(), v)),
            "station_max_number_of_scans" => {
                |p, n, v| drop(p.station_max_number_of_scans.insert(n.into(), v as u32))
            }
            "station_max_scan" => |p, n, v| drop(p.station_max_scan.insert(n.into(), v as Second)),
            "station_min_scan" => |p, n, v| drop(p.station_min_scan.insert(n.into(), v as Second)),
            "source_weight" => |p, n, v| drop(p.source_weight.insert(n.into(), v)),
            "source_min_number_of_stations" => {
                |p, n, v| drop(p.source_min_number_of_stations.insert(n.into(), v as u32))
            }
            "source_min_flux" => |p, n, v| drop(p.source_min_flux.insert(n.into(), v)),
            "source_max_number_of_scans" => {
                |p, n, v| drop(p.source_max_number_of_scans.insert(n.into(), v as u32))
            }
            "source_min_elevation" => |p, n, v| drop(p.source_min_elevation.insert(n.into(), v)),
            "source_min_sun_distance" => {
                |p, n, v| drop(p.source_min_sun_distance.insert(n.into(), v))
            }
            "source_max_scan" => |p, n, v| drop(p.source_max_scan.insert(n.into(), v as Second)),
            "source_min_scan" => |p, n, v| drop(p.source_min_scan.insert(n.into(), v as Second)),
            "source_min_repeat" => {
                |p, n, v| drop(p.source_min_repeat.insert(n.into(), v as Second))
            }
            "baseline_weight" => |p, n, v| drop(p.baseline_weight.insert(n.into(), v)),
            "baseline_max_scan" => {
                |p, n, v| drop(p.baseline_max_scan.insert(n.into(), v as Second))
            }
            "baseline_min_scan" => {
                |p, n, v| drop(p.baseline_min_scan.insert(n.into(), v as Second))
            }
            _ => {
                warn!("unknown multi-scheduling override {parameter:?} skipped");
                return;
            }
        };
        let groups = if parameter.starts_with("station_") {
            &self.station_groups
        } else if parameter.starts_with("source_") {
            &self.source_groups
        } else {
            &self.baseline_groups
        };
        let names: Vec<String> = match groups.get(member) {
            Some(members) => members.clone(),
            None => vec![member.to_owned()],
        };
        self.dimensions.push(Dimension {
            name: format!("{parameter}.{member}"),
            len: values.len(),
            apply: Box::new(move |p, i| {
                for name in &names {
                    setter(p, name, values[i]);
                }
            }),
        });
    }

    /// Generates one [`Parameters`] per grid point.
    ///
    /// Dimensions registered first vary slowest. When the grid is larger
    /// than `max_schedules`, a seeded random subset of that size is
    /// drawn, so batch runs are reproducible across hosts.
    pub fn create_parameters(
        &self,
        base: &Parameters,
        max_schedules: Option<usize>,
        seed: u64,
    ) -> Result<Vec<Parameters>, MultiSchedulingError> {
        // Ceiling check on the raw product, before anything is allocated.
        // The deduplicated weight count only ever shrinks it.
        let mut raw: u128 = 1;
        for dim in &self.dimensions {
            raw = raw.saturating_mul(dim.len as u128);
        }
        for values in self.weight_values.iter().flatten() {
            raw = raw.saturating_mul(values.len() as u128);
        }
        if raw > MAX_COMBINATIONS as u128 {
            return Err(MultiSchedulingError::TooManyCombinations(
                raw.min(usize::MAX as u128) as usize,
                MAX_COMBINATIONS,
            ));
        }

        let weights = self.weight_combinations(&base.weights);
        let total = self.dimensions.iter().fold(weights.len(), |n, d| n * d.len);

        let mut out = Vec::with_capacity(total);
        for i in 0..total {
            let mut params = base.clone();
            let mut rem = i;
            // Innermost axis: the joint weight combination.
            params.weights = ObjectiveWeights::from_array(weights[rem % weights.len()]);
            rem /= weights.len();
            for dim in self.dimensions.iter().rev() {
                (dim.apply)(&mut params, rem % dim.len);
                rem /= dim.len;
            }
            out.push(params);
        }

        if let Some(cap) = max_schedules {
            if out.len() > cap {
                let mut rng = StdRng::seed_from_u64(seed);
                out.shuffle(&mut rng);
                out.truncate(cap);
            }
        }
        Ok(out)
    }

    /// Joint expansion of the `weight_factor_*` value lists.
    ///
    /// Weights not given a list keep their base value. Every combination
    /// is normalized to sum 1; combinations pointing in the same
    /// direction collapse to one.
    fn weight_combinations(&self, base: &ObjectiveWeights) -> Vec<[f64; 8]> {
        if self.weight_values.iter().all(Option::is_none) {
            return vec![base.as_array()];
        }
        let base = base.as_array();
        let lists: Vec<Vec<f64>> = self
            .weight_values
            .iter()
            .enumerate()
            .map(|(k, v)| v.clone().unwrap_or_else(|| vec![base[k]]))
            .collect();

        let mut combos: Vec<[f64; 8]> = Vec::new();
        let n_raw: usize = lists.iter().map(Vec::len).product();
        for mut i in 0..n_raw {
            let mut combo = [0.0; 8];
            for (k, list) in lists.iter().enumerate() {
                combo[k] = list[i % list.len()];
                i /= list.len();
            }
            let sum: f64 = combo.iter().sum();
            if sum <= WEIGHT_EPSILON {
                continue;
            }
            for w in &mut combo {
                *w /= sum;
            }
            let duplicate = combos.iter().any(|seen| {
                seen.iter()
                    .zip(&combo)
                    .all(|(a, b)| (a - b).abs() < WEIGHT_EPSILON)
            });
            if !duplicate {
                combos.push(combo);
            }
        }
        if combos.is_empty() {
            combos.push(base);
        }
        combos
    }
}
