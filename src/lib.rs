//! Greedy look-ahead scan scheduling for radio-telescope networks.
//!
//! A session is a network of [`Station`](models::Station)s, a catalog of
//! [`Source`](models::Source)s and a time window. The
//! [`Scheduler`](engine::Scheduler) repeatedly enumerates every feasible
//! next scan (a *subcon*), scores each candidate against the weighted
//! objective in [`Parameters`](params::Parameters), commits the winner
//! and advances. On top of that sit subnetting pairs, fillin recursion
//! into slew gaps, periodic calibrator blocks, high-impact pre-passes
//! and a final pass folding leftover idle time into observing time.
//!
//! Geometry is pluggable through the
//! [`GeometryOracle`](geometry::GeometryOracle) trait; the built-in
//! [`SiderealModel`](geometry::SiderealModel) covers quasars and
//! tabulated satellite ephemerides on a spherical earth.
//!
//! # Modules
//!
//! - **`models`**: domain types — `Station`, `Source`, `Baseline`,
//!   `Scan`, `SkyCoverage`, `Network`
//! - **`geometry`**: the oracle seam and the sidereal az/el model
//! - **`params`**: run configuration and per-entity overrides
//! - **`engine`**: subcon generation, scoring and the scheduling loop
//! - **`multisched`**: parameter grids for batch runs
//! - **`verify`**: independent post-hoc schedule checking
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use obsplan::engine::Scheduler;
//! use obsplan::geometry::SiderealModel;
//! use obsplan::models::{GeodeticPosition, Network, Source, Station};
//! use obsplan::params::Parameters;
//!
//! let network = Network::new(vec![
//!     Station::new("AA", GeodeticPosition::new(0.79, 0.0, 0.0)),
//!     Station::new("BB", GeodeticPosition::new(0.87, 0.17, 0.0)),
//! ]);
//! let sources = vec![
//!     Source::quasar("Q1", 0.0, 1.22, 2.0),
//!     Source::quasar("Q2", 2.0, 1.31, 2.0),
//! ];
//! let oracle = Arc::new(SiderealModel::new(0.0));
//!
//! let mut scheduler =
//!     Scheduler::new(network, sources, 3600, Parameters::default(), oracle)?;
//! scheduler.start();
//! for scan in scheduler.scans() {
//!     println!("{} s: {} stations", scan.start(), scan.n_stations());
//! }
//! # Ok::<(), obsplan::error::SchedulerError>(())
//! ```
//!
//! Batch runs over a parameter grid go through
//! [`MultiScheduling`](multisched::MultiScheduling), and finished
//! schedules can be checked independently with
//! [`verify_schedule`](verify::verify_schedule).

pub mod engine;
pub mod error;
pub mod geometry;
pub mod models;
pub mod multisched;
pub mod params;
pub mod verify;

pub use engine::{ScanScheduler, Scheduler};
pub use error::{MultiSchedulingError, SchedulerError};
pub use geometry::{GeometryOracle, SiderealModel};
pub use models::{Network, Scan, Source, Station};
pub use multisched::MultiScheduling;
pub use params::Parameters;
pub use verify::{verify_schedule, VerificationReport};
