//! Source catalog model.
//!
//! A source is something the network can observe: a quasar fixed on the
//! celestial sphere or a satellite with a time-dependent apparent
//! position. The variant set is closed — the scheduler dispatches on it
//! exactly once per geometry query.

use serde::{Deserialize, Serialize};

use super::Second;

/// One sample of a satellite's apparent equatorial position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EphemerisPoint {
    /// Sample time (s since session start).
    pub time: Second,
    /// Apparent right ascension (rad).
    pub ra: f64,
    /// Apparent declination (rad).
    pub dec: f64,
}

/// Closed set of source kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceVariant {
    /// Extragalactic source, fixed equatorial coordinates.
    Quasar {
        /// Right ascension (rad).
        ra: f64,
        /// Declination (rad).
        dec: f64,
        /// Flux density (Jy).
        flux_jy: f64,
    },
    /// Satellite with a tabulated apparent ephemeris.
    ///
    /// Positions between samples are interpolated linearly; outside the
    /// tabulated span the satellite is unobservable.
    Satellite {
        /// Ephemeris samples, strictly increasing in time.
        ephemeris: Vec<EphemerisPoint>,
        /// Effective downlink flux density (Jy).
        flux_jy: f64,
    },
}

/// Per-source observing constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLimits {
    /// Minimum scan duration (s).
    pub min_scan: Second,
    /// Maximum scan duration (s).
    pub max_scan: Second,
    /// Minimum time between the end of one scan and the start of the
    /// next scan of this source (s).
    pub min_repeat: Second,
    /// Minimum number of participating stations per scan.
    pub min_number_of_stations: u32,
    /// Minimum observable elevation (rad).
    pub min_elevation: f64,
    /// Minimum angular distance to the sun (rad). Skipped when the
    /// geometry oracle cannot supply a sun position.
    pub min_sun_distance: f64,
    /// Minimum flux density to be considered at all (Jy).
    pub min_flux: f64,
    /// Maximum number of scans of this source in one session.
    pub max_number_of_scans: u32,
    /// Relative weight of this source in candidate scoring.
    pub weight: f64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            min_scan: 30,
            max_scan: 600,
            min_repeat: 1800,
            min_number_of_stations: 2,
            min_elevation: 0.0,
            min_sun_distance: 0.0,
            min_flux: 0.0,
            max_number_of_scans: u32::MAX,
            weight: 1.0,
        }
    }
}

/// Runtime observation counters, mutated on every commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    /// Number of committed scans.
    pub n_scans: u32,
    /// Number of committed observations (baselines).
    pub n_observations: u32,
    /// End time of the most recent committed scan.
    pub last_observed: Option<Second>,
}

/// A catalog entry the network can observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Unique source name (e.g. "0059+581").
    pub name: String,
    /// Source kind and position/flux model.
    pub variant: SourceVariant,
    /// Observing constraints.
    pub limits: SourceLimits,
    /// Runtime counters.
    pub state: SourceState,
}

impl Source {
    /// Creates a quasar with default limits.
    pub fn quasar(name: impl Into<String>, ra: f64, dec: f64, flux_jy: f64) -> Self {
        Self {
            name: name.into(),
            variant: SourceVariant::Quasar { ra, dec, flux_jy },
            limits: SourceLimits::default(),
            state: SourceState::default(),
        }
    }

    /// Creates a satellite with default limits.
    pub fn satellite(
        name: impl Into<String>,
        ephemeris: Vec<EphemerisPoint>,
        flux_jy: f64,
    ) -> Self {
        Self {
            name: name.into(),
            variant: SourceVariant::Satellite { ephemeris, flux_jy },
            limits: SourceLimits::default(),
            state: SourceState::default(),
        }
    }

    /// Sets the observing constraints.
    pub fn with_limits(mut self, limits: SourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Apparent equatorial coordinates at `time`, `None` when the source
    /// has no defined position (satellite outside its ephemeris span).
    pub fn radec(&self, time: Second) -> Option<(f64, f64)> {
        match &self.variant {
            SourceVariant::Quasar { ra, dec, .. } => Some((*ra, *dec)),
            SourceVariant::Satellite { ephemeris, .. } => {
                let after = ephemeris.iter().position(|p| p.time >= time)?;
                let hi = ephemeris[after];
                if hi.time == time || after == 0 {
                    if after == 0 && hi.time != time {
                        return None;
                    }
                    return Some((hi.ra, hi.dec));
                }
                let lo = ephemeris[after - 1];
                let f = (time - lo.time) as f64 / (hi.time - lo.time) as f64;
                Some((lo.ra + f * (hi.ra - lo.ra), lo.dec + f * (hi.dec - lo.dec)))
            }
        }
    }

    /// Flux density (Jy); drives the required scan duration.
    pub fn flux(&self) -> f64 {
        match &self.variant {
            SourceVariant::Quasar { flux_jy, .. } => *flux_jy,
            SourceVariant::Satellite { flux_jy, .. } => *flux_jy,
        }
    }
}
