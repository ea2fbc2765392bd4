//! Station model.
//!
//! A station is an antenna participating in the session. It carries
//! immutable operating limits, a simple two-axis slew model, and the
//! mutable runtime state the scheduling engine updates on every commit.

use serde::{Deserialize, Serialize};

use super::{PointingVector, Second};

/// Geodetic station position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    /// Latitude (rad, positive north).
    pub latitude: f64,
    /// Longitude (rad, positive east).
    pub longitude: f64,
    /// Height above the reference ellipsoid (m).
    pub height_m: f64,
}

impl GeodeticPosition {
    /// Creates a position from latitude/longitude in radians.
    pub fn new(latitude: f64, longitude: f64, height_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            height_m,
        }
    }

    /// Geocentric cartesian coordinates (m), spherical-earth approximation.
    ///
    /// Only used to decide which stations are close enough to share a
    /// sky-coverage accumulator, so ellipsoidal precision is not needed.
    pub fn to_cartesian(&self) -> [f64; 3] {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let r = EARTH_RADIUS_M + self.height_m;
        [
            r * self.latitude.cos() * self.longitude.cos(),
            r * self.latitude.cos() * self.longitude.sin(),
            r * self.latitude.sin(),
        ]
    }

    /// Straight-line distance to another station (m).
    pub fn distance_to(&self, other: &GeodeticPosition) -> f64 {
        let a = self.to_cartesian();
        let b = other.to_cartesian();
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    }
}

/// Two-axis antenna drive model.
///
/// Slew duration is the slower of the two axes plus a fixed settle time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlewModel {
    /// Azimuth axis rate (rad/s).
    pub az_rate: f64,
    /// Elevation axis rate (rad/s).
    pub el_rate: f64,
    /// Fixed settle/calibration overhead per slew (s).
    pub settle: Second,
}

impl Default for SlewModel {
    fn default() -> Self {
        // Typical mid-size azel mount: ~1.5 deg/s az, ~0.75 deg/s el.
        Self {
            az_rate: 0.026,
            el_rate: 0.013,
            settle: 10,
        }
    }
}

/// Result of a slew computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slew {
    /// Slew duration including settle time (s).
    pub seconds: Second,
    /// Great-circle angular distance covered (rad).
    pub distance: f64,
}

impl SlewModel {
    /// Slew between two pointings.
    pub fn between(&self, from: &PointingVector, to: &PointingVector) -> Slew {
        let mut d_az = (to.azimuth - from.azimuth).abs() % std::f64::consts::TAU;
        if d_az > std::f64::consts::PI {
            d_az = std::f64::consts::TAU - d_az;
        }
        let d_el = (to.elevation - from.elevation).abs();
        let axis_s = (d_az / self.az_rate).max(d_el / self.el_rate);
        Slew {
            seconds: self.settle + axis_s.ceil() as Second,
            distance: crate::geometry::angular_separation(
                from.azimuth,
                from.elevation,
                to.azimuth,
                to.elevation,
            ),
        }
    }

    /// Slew from an unknown position (session start): settle time only.
    pub fn from_rest(&self) -> Slew {
        Slew {
            seconds: self.settle,
            distance: 0.0,
        }
    }
}

/// Per-station operating limits.
///
/// Every limit can be overridden per run through
/// [`Parameters`](crate::params::Parameters) grouped overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLimits {
    /// Minimum scan duration (s).
    pub min_scan: Second,
    /// Maximum scan duration (s).
    pub max_scan: Second,
    /// Maximum allowed slew duration (s).
    pub max_slew_time: Second,
    /// Maximum allowed slew distance (rad).
    pub max_slew_distance: f64,
    /// Maximum idle wait between becoming ready and the scan start (s).
    pub max_wait: Second,
    /// Minimum observable elevation (rad).
    pub min_elevation: f64,
    /// Maximum number of scans for this station in one session.
    pub max_number_of_scans: u32,
    /// Relative weight of this station in candidate scoring.
    pub weight: f64,
}

impl Default for StationLimits {
    fn default() -> Self {
        Self {
            min_scan: 30,
            max_scan: 600,
            max_slew_time: 600,
            max_slew_distance: std::f64::consts::PI,
            max_wait: 900,
            min_elevation: 5.0_f64.to_radians(),
            max_number_of_scans: u32::MAX,
            weight: 1.0,
        }
    }
}

/// Mutable runtime state, owned by the engine during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationState {
    /// Whether the station currently participates in scheduling.
    pub available: bool,
    /// Earliest time the station can start a new slew (s).
    pub available_at: Second,
    /// Pointing at `available_at`, `None` before the first scan.
    pub current_pointing: Option<PointingVector>,
    /// Number of committed scans.
    pub n_scans: u32,
    /// Accumulated on-source time (s).
    pub observed_time: Second,
    /// Accumulated idle time (s).
    pub idle_time: Second,
}

impl Default for StationState {
    fn default() -> Self {
        Self {
            available: true,
            available_at: 0,
            current_pointing: None,
            n_scans: 0,
            observed_time: 0,
            idle_time: 0,
        }
    }
}

/// An antenna participating in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Unique station name (e.g. "WETTZELL").
    pub name: String,
    /// Geodetic position.
    pub position: GeodeticPosition,
    /// Antenna drive model.
    pub slew: SlewModel,
    /// Operating limits.
    pub limits: StationLimits,
    /// Runtime state.
    pub state: StationState,
}

impl Station {
    /// Creates a station with default limits and drive model.
    pub fn new(name: impl Into<String>, position: GeodeticPosition) -> Self {
        Self {
            name: name.into(),
            position,
            slew: SlewModel::default(),
            limits: StationLimits::default(),
            state: StationState::default(),
        }
    }

    /// Sets the drive model.
    pub fn with_slew(mut self, slew: SlewModel) -> Self {
        self.slew = slew;
        self
    }

    /// Sets the operating limits.
    pub fn with_limits(mut self, limits: StationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Slew from the current pointing to a target.
    ///
    /// Before the first scan there is no current pointing and only the
    /// settle time applies.
    pub fn slew_to(&self, target: &PointingVector) -> Slew {
        match &self.state.current_pointing {
            Some(from) => self.slew.between(from, target),
            None => self.slew.from_rest(),
        }
    }

    /// Whether the station may take another scan.
    pub fn can_observe(&self) -> bool {
        self.state.available && self.state.n_scans < self.limits.max_number_of_scans
    }
}
