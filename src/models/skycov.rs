//! Sky-coverage accumulator.
//!
//! Tracks where on its local sky a station group has already observed and
//! scores a candidate pointing by how little it is "shadowed" by earlier
//! observations. The influence of a past observation decays with angular
//! distance and with elapsed time, each through an independently
//! configured kernel.
//!
//! The history is append-only within a run and every score is an exact
//! recomputation over it. Scores are only requested at discrete decision
//! points, so correctness wins over incremental bookkeeping.

use serde::{Deserialize, Serialize};

use crate::geometry::angular_separation;

use super::{PointingVector, Second};

/// Kernel shape for the distance and time influence dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Influence falls off linearly from 1 at zero offset to 0 at the
    /// configured maximum.
    Linear,
    /// Full influence inside the configured maximum, none outside.
    Step,
}

impl Interpolation {
    fn kernel(self, offset: f64, max: f64) -> f64 {
        if max <= 0.0 || offset >= max {
            return 0.0;
        }
        match self {
            Interpolation::Linear => 1.0 - offset / max,
            Interpolation::Step => 1.0,
        }
    }
}

/// Angular/temporal coverage accumulator shared by one station group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyCoverage {
    /// Maximum angular distance at which an observation has influence (rad).
    pub max_influence_distance: f64,
    /// Maximum elapsed time at which an observation has influence (s).
    pub max_influence_time: Second,
    /// Kernel shape over angular distance.
    pub distance_interpolation: Interpolation,
    /// Kernel shape over elapsed time.
    pub time_interpolation: Interpolation,
    observed: Vec<PointingVector>,
}

impl Default for SkyCoverage {
    fn default() -> Self {
        Self {
            max_influence_distance: 30.0_f64.to_radians(),
            max_influence_time: 3600,
            distance_interpolation: Interpolation::Linear,
            time_interpolation: Interpolation::Linear,
            observed: Vec::new(),
        }
    }
}

impl SkyCoverage {
    /// Creates an accumulator with explicit influence configuration.
    pub fn new(
        max_influence_distance: f64,
        max_influence_time: Second,
        distance_interpolation: Interpolation,
        time_interpolation: Interpolation,
    ) -> Self {
        Self {
            max_influence_distance,
            max_influence_time,
            distance_interpolation,
            time_interpolation,
            observed: Vec::new(),
        }
    }

    /// Influence of one past observation on a candidate pointing.
    fn influence(&self, past: &PointingVector, candidate: &PointingVector) -> f64 {
        if past.time > candidate.time {
            return 0.0;
        }
        let dt = (candidate.time - past.time) as f64;
        let f_time = self
            .time_interpolation
            .kernel(dt, self.max_influence_time as f64);
        if f_time == 0.0 {
            return 0.0;
        }
        let dist = angular_separation(
            past.azimuth,
            past.elevation,
            candidate.azimuth,
            candidate.elevation,
        );
        let f_dist = self
            .distance_interpolation
            .kernel(dist, self.max_influence_distance);
        f_dist * f_time
    }

    /// Coverage score for a candidate pointing, in `[0, 1]`.
    ///
    /// 1 means nothing nearby has been observed recently; 0 means the
    /// candidate repeats a just-observed direction.
    pub fn score(&self, candidate: &PointingVector) -> f64 {
        let saturation = self
            .observed
            .iter()
            .map(|past| self.influence(past, candidate))
            .fold(0.0_f64, f64::max);
        1.0 - saturation.min(1.0)
    }

    /// Records a committed observation. Append-only.
    pub fn update(&mut self, pv: PointingVector) {
        self.observed.push(pv);
    }

    /// Number of recorded observations.
    pub fn n_observed(&self) -> usize {
        self.observed.len()
    }

    /// Fraction of a coarse az/el grid with nonzero influence at `now`.
    ///
    /// Drives the optimization-condition early stop; the 12x4 grid is
    /// deliberately coarse because only a rough saturation estimate is
    /// needed.
    pub fn saturation_fraction(&self, now: Second) -> f64 {
        const N_AZ: usize = 12;
        const N_EL: usize = 4;
        let mut covered = 0usize;
        for i_az in 0..N_AZ {
            for i_el in 0..N_EL {
                let cell = PointingVector {
                    station: 0,
                    source: 0,
                    time: now,
                    azimuth: (i_az as f64 + 0.5) * std::f64::consts::TAU / N_AZ as f64,
                    elevation: (15.0 + 20.0 * i_el as f64).to_radians(),
                };
                if self.observed.iter().any(|p| self.influence(p, &cell) > 0.0) {
                    covered += 1;
                }
            }
        }
        covered as f64 / (N_AZ * N_EL) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pv(time: Second, az_deg: f64, el_deg: f64) -> PointingVector {
        PointingVector {
            station: 0,
            source: 0,
            time,
            azimuth: az_deg.to_radians(),
            elevation: el_deg.to_radians(),
        }
    }

    #[test]
    fn test_unobserved_sky_scores_one() {
        let cov = SkyCoverage::default();
        assert_eq!(cov.score(&pv(100, 180.0, 45.0)), 1.0);
    }

    #[test]
    fn test_fresh_observation_shadows_identical_pointing() {
        let mut cov = SkyCoverage::default();
        cov.update(pv(100, 180.0, 45.0));
        // Same direction, just observed: fully shadowed.
        assert!(cov.score(&pv(101, 180.0, 45.0)) < 1e-9);
        // Opposite side of the sky: untouched.
        assert_eq!(cov.score(&pv(101, 0.0, 45.0)), 1.0);
    }

    #[test]
    fn test_unobserved_beats_just_observed() {
        let mut cov = SkyCoverage::default();
        cov.update(pv(100, 180.0, 45.0));
        let fresh = cov.score(&pv(200, 30.0, 60.0));
        let repeat = cov.score(&pv(200, 180.0, 45.0));
        assert!(fresh > repeat);
    }

    #[test]
    fn test_influence_decays_with_time() {
        let mut cov = SkyCoverage::default();
        cov.update(pv(0, 180.0, 45.0));
        let soon = cov.score(&pv(600, 180.0, 45.0));
        let later = cov.score(&pv(3000, 180.0, 45.0));
        assert!(later > soon);
        // Beyond the influence window the observation is forgotten.
        assert_eq!(cov.score(&pv(4000, 180.0, 45.0)), 1.0);
    }

    #[test]
    fn test_step_kernel_is_flat() {
        let mut cov = SkyCoverage::new(
            30.0_f64.to_radians(),
            3600,
            Interpolation::Step,
            Interpolation::Step,
        );
        cov.update(pv(0, 180.0, 45.0));
        // Anywhere inside both windows: fully shadowed.
        assert!(cov.score(&pv(3000, 170.0, 40.0)) < 1e-9);
        // Outside the distance window: clean.
        assert_eq!(cov.score(&pv(3000, 0.0, 45.0)), 1.0);
    }

    #[test]
    fn test_future_observations_have_no_influence() {
        let mut cov = SkyCoverage::default();
        cov.update(pv(500, 180.0, 45.0));
        assert_eq!(cov.score(&pv(100, 180.0, 45.0)), 1.0);
    }

    #[test]
    fn test_saturation_fraction_grows() {
        let mut cov = SkyCoverage::default();
        assert_eq!(cov.saturation_fraction(0), 0.0);
        cov.update(pv(0, 15.0, 35.0));
        let one = cov.saturation_fraction(10);
        assert!(one > 0.0);
        cov.update(pv(0, 195.0, 35.0));
        assert!(cov.saturation_fraction(10) > one);
    }
}
