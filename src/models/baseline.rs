//! Baseline model.
//!
//! A baseline is an unordered pair of stations. The network owns one
//! baseline per station pair; the engine bumps its observation counter on
//! every multi-station scan commit.

use serde::{Deserialize, Serialize};

use super::{Second, StationIdx};

/// Per-baseline observing constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineLimits {
    /// Minimum common scan duration (s).
    pub min_scan: Second,
    /// Maximum common scan duration (s).
    pub max_scan: Second,
    /// Relative weight of this baseline in candidate scoring.
    pub weight: f64,
}

impl Default for BaselineLimits {
    fn default() -> Self {
        Self {
            min_scan: 0,
            max_scan: Second::MAX,
            weight: 1.0,
        }
    }
}

/// An unordered station pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// First station index (always the smaller one).
    pub station1: StationIdx,
    /// Second station index.
    pub station2: StationIdx,
    /// Observing constraints.
    pub limits: BaselineLimits,
    /// Number of committed observations on this baseline.
    pub n_observations: u32,
}

impl Baseline {
    /// Creates a baseline; station order is normalized.
    pub fn new(a: StationIdx, b: StationIdx) -> Self {
        Self {
            station1: a.min(b),
            station2: a.max(b),
            limits: BaselineLimits::default(),
            n_observations: 0,
        }
    }

    /// Canonical name, e.g. "WETTZELL-KOKEE".
    pub fn name(&self, station_names: &[String]) -> String {
        format!(
            "{}-{}",
            station_names[self.station1], station_names[self.station2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_order_normalized() {
        let bl = Baseline::new(3, 1);
        assert_eq!((bl.station1, bl.station2), (1, 3));
    }

    #[test]
    fn test_baseline_name() {
        let names = vec!["AA".to_string(), "BB".to_string()];
        assert_eq!(Baseline::new(1, 0).name(&names), "AA-BB");
    }
}
