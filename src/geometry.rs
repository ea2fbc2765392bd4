//! Pointing geometry.
//!
//! The engine never computes azimuth/elevation itself; it asks a
//! [`GeometryOracle`]. The oracle seam keeps the combinatorial search
//! independent of the precision of the astronomical model: tests plug in
//! trivial oracles, production uses [`SiderealModel`], and a higher
//! fidelity model (nutation, refraction, cable wrap) can be swapped in
//! without touching the engine.
//!
//! # Reference
//!
//! Hour-angle to horizontal conversion per Meeus, *Astronomical
//! Algorithms*, 2nd ed., ch. 13.

use crate::models::{PointingVector, Second, Source, Station};

/// Earth rotation rate (rad/s of solar time, sidereal).
const EARTH_ROT_RATE: f64 = 7.292_115_0e-5;

/// Great-circle separation between two directions given as
/// (longitude-like, latitude-like) pairs in radians.
pub fn angular_separation(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    // Haversine, stable for small separations.
    let dlat = (lat2 - lat1) * 0.5;
    let dlon = (lon2 - lon1) * 0.5;
    let h = dlat.sin().powi(2) + lat1.cos() * lat2.cos() * dlon.sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Supplies pointing geometry to the scheduling engine.
///
/// Implementations must be pure: the same `(station, source, time)` query
/// always yields the same answer within one run.
pub trait GeometryOracle: Send + Sync {
    /// Azimuth/elevation (rad) of `source` as seen from `station` at
    /// `time`, or `None` when the source is below the horizon or has no
    /// defined position.
    fn compute_pointing(
        &self,
        station: &Station,
        source: &Source,
        time: Second,
    ) -> Option<(f64, f64)>;

    /// Angular separation between `source` and the sun (rad). `None`
    /// disables sun-distance filtering.
    fn sun_separation(&self, _source: &Source, _time: Second) -> Option<f64> {
        None
    }

    /// Parallactic angle (rad) of `source` at `station`. `None` makes
    /// parallactic-angle calibrator blocks fall back to azimuth.
    fn parallactic_angle(
        &self,
        _station: &Station,
        _source: &Source,
        _time: Second,
    ) -> Option<f64> {
        None
    }
}

/// Rigid-sky geometry: uniform earth rotation, no refraction.
#[derive(Debug, Clone, Default)]
pub struct SiderealModel {
    /// Greenwich sidereal angle at session start (rad).
    pub reference_sidereal: f64,
    /// Apparent equatorial sun position, when sun avoidance is wanted.
    sun: Option<(f64, f64)>,
}

impl SiderealModel {
    /// Creates a model with the given Greenwich sidereal angle at t = 0.
    pub fn new(reference_sidereal: f64) -> Self {
        Self {
            reference_sidereal,
            sun: None,
        }
    }

    /// Enables sun-distance filtering with a fixed apparent sun position.
    ///
    /// The sun moves about a degree per day, far less than any sensible
    /// avoidance margin over a 24 h session.
    pub fn with_sun(mut self, ra: f64, dec: f64) -> Self {
        self.sun = Some((ra, dec));
        self
    }

    /// Local hour angle of a direction at `time`.
    fn hour_angle(&self, station: &Station, ra: f64, time: Second) -> f64 {
        self.reference_sidereal + EARTH_ROT_RATE * time as f64 + station.position.longitude - ra
    }
}

impl GeometryOracle for SiderealModel {
    fn compute_pointing(
        &self,
        station: &Station,
        source: &Source,
        time: Second,
    ) -> Option<(f64, f64)> {
        let (ra, dec) = source.radec(time)?;
        let ha = self.hour_angle(station, ra, time);
        let lat = station.position.latitude;
        let sin_el = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
        let el = sin_el.clamp(-1.0, 1.0).asin();
        if el < 0.0 {
            return None;
        }
        // Azimuth from north, eastwards.
        let az = (-ha.sin() * dec.cos())
            .atan2(lat.cos() * dec.sin() - lat.sin() * dec.cos() * ha.cos())
            .rem_euclid(std::f64::consts::TAU);
        Some((az, el))
    }

    fn sun_separation(&self, source: &Source, time: Second) -> Option<f64> {
        let (sun_ra, sun_dec) = self.sun?;
        let (ra, dec) = source.radec(time)?;
        Some(angular_separation(ra, dec, sun_ra, sun_dec))
    }

    fn parallactic_angle(
        &self,
        station: &Station,
        source: &Source,
        time: Second,
    ) -> Option<f64> {
        let (ra, dec) = source.radec(time)?;
        let ha = self.hour_angle(station, ra, time);
        let lat = station.position.latitude;
        Some(ha.sin().atan2(lat.tan() * dec.cos() - dec.sin() * ha.cos()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeodeticPosition;

    fn station_at(lat_deg: f64, lon_deg: f64) -> Station {
        Station::new(
            "TEST",
            GeodeticPosition::new(lat_deg.to_radians(), lon_deg.to_radians(), 0.0),
        )
    }

    #[test]
    fn test_angular_separation_basics() {
        assert!(angular_separation(0.0, 0.0, 0.0, 0.0) < 1e-12);
        let quarter = angular_separation(0.0, 0.0, std::f64::consts::FRAC_PI_2, 0.0);
        assert!((quarter - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        let pole = angular_separation(1.0, std::f64::consts::FRAC_PI_2, 2.0, 0.0);
        assert!((pole - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_source_on_meridian_at_zenith() {
        // Station latitude equals declination, hour angle zero: zenith.
        let station = station_at(40.0, 0.0);
        let source = Source::quasar("Q", 0.0, 40.0_f64.to_radians(), 1.0);
        let model = SiderealModel::new(0.0);
        let (_, el) = model.compute_pointing(&station, &source, 0).unwrap();
        assert!((el - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_source_below_horizon_is_none() {
        let station = station_at(40.0, 0.0);
        // Anti-zenith direction.
        let source = Source::quasar(
            "Q",
            std::f64::consts::PI,
            (-40.0_f64).to_radians(),
            1.0,
        );
        let model = SiderealModel::new(0.0);
        assert!(model.compute_pointing(&station, &source, 0).is_none());
    }

    #[test]
    fn test_source_rises_and_sets() {
        let station = station_at(40.0, 0.0);
        let source = Source::quasar("Q", std::f64::consts::PI, 0.3, 1.0);
        let model = SiderealModel::new(0.0);
        // Opposite the local meridian at t = 0, on it half a sidereal
        // day later.
        assert!(model.compute_pointing(&station, &source, 0).is_none());
        let half_day = (std::f64::consts::PI / EARTH_ROT_RATE) as Second;
        let (_, el) = model
            .compute_pointing(&station, &source, half_day)
            .unwrap();
        assert!(el > 0.5);
    }

    #[test]
    fn test_azimuth_points_south_of_northern_station() {
        // Equatorial source on the meridian of a northern station.
        let station = station_at(40.0, 0.0);
        let source = Source::quasar("Q", 0.0, 0.0, 1.0);
        let model = SiderealModel::new(0.0);
        let (az, el) = model.compute_pointing(&station, &source, 0).unwrap();
        assert!((az - std::f64::consts::PI).abs() < 1e-9);
        assert!((el - 50.0_f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn test_sun_separation_requires_sun() {
        let source = Source::quasar("Q", 1.0, 0.2, 1.0);
        let plain = SiderealModel::new(0.0);
        assert_eq!(plain.sun_separation(&source, 0), None);
        let with_sun = SiderealModel::new(0.0).with_sun(1.0, 0.2);
        assert!(with_sun.sun_separation(&source, 0).unwrap() < 1e-12);
    }

    #[test]
    fn test_parallactic_angle_zero_on_meridian() {
        let station = station_at(40.0, 0.0);
        let source = Source::quasar("Q", 0.0, 0.2, 1.0);
        let model = SiderealModel::new(0.0);
        let pa = model.parallactic_angle(&station, &source, 0).unwrap();
        assert!(pa.abs() < 1e-9);
    }
}
