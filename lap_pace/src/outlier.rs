//! Session-wide lap-time cleaning: pit laps out, IQR outliers nulled.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{DriverSeries, Lap};

/// Acceptance window derived from the quartiles of every valid lap in a session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct IqrBounds {
    pub q1: f64,
    pub q3: f64,
    pub low: f64,
    pub high: f64,
}

impl IqrBounds {
    /// Returns `None` when `times` holds no finite value.
    pub fn compute(times: &[f64], multiplier: f64) -> Option<Self> {
        let mut sorted: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
        sorted.sort_by_key(|t| OrderedFloat(*t));
        let q1 = quantile(&sorted, 0.25)?;
        let q3 = quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;
        Some(Self {
            q1,
            q3,
            low: q1 - multiplier * iqr,
            high: q3 + multiplier * iqr,
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Linear-interpolation quantile of already sorted data; `q` in `[0, 1]`.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = h - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Non-pit laps of a session with out-of-bounds lap times nulled.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CleanedLaps {
    laps: Vec<Lap>,
    bounds: Option<IqrBounds>,
}

impl CleanedLaps {
    pub fn laps(&self) -> &[Lap] {
        &self.laps
    }

    pub fn into_laps(self) -> Vec<Lap> {
        self.laps
    }

    /// Bounds used for this pass; `None` when the session had no valid lap.
    pub fn bounds(&self) -> Option<IqrBounds> {
        self.bounds
    }

    pub fn valid_count(&self) -> usize {
        self.laps.iter().filter(|lap| lap.valid_time().is_some()).count()
    }

    pub fn contains_driver(&self, driver: &str) -> bool {
        self.laps.iter().any(|lap| lap.driver == driver)
    }

    /// Drivers in order of first appearance.
    pub fn drivers(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for lap in &self.laps {
            if !out.iter().any(|d| d == &lap.driver) {
                out.push(lap.driver.clone());
            }
        }
        out
    }

    pub fn driver_series(&self, driver: &str) -> Option<DriverSeries> {
        DriverSeries::from_laps(&self.laps, driver)
    }
}

/// Drop pit-affected laps, then null every lap time outside
/// `[Q1 - k*IQR, Q3 + k*IQR]` where the quartiles span all drivers.
///
/// With a single valid lap the window collapses onto that lap, which is kept.
pub fn clean_laps(raw: &[Lap], multiplier: f64) -> CleanedLaps {
    let mut laps: Vec<Lap> = raw.iter().filter(|lap| !lap.pit_affected).cloned().collect();
    let pit_laps = raw.len() - laps.len();

    let times: Vec<f64> = laps.iter().filter_map(Lap::valid_time).collect();
    let bounds = IqrBounds::compute(&times, multiplier);

    let mut nulled = 0usize;
    for lap in &mut laps {
        match (lap.valid_time(), bounds) {
            (Some(t), Some(b)) if !b.contains(t) => {
                lap.lap_time_s = None;
                nulled += 1;
            }
            (None, _) => lap.lap_time_s = None,
            _ => {}
        }
    }

    if let Some(b) = bounds {
        debug!(
            q1 = b.q1,
            q3 = b.q3,
            low = b.low,
            high = b.high,
            "lap time acceptance window"
        );
    }
    info!(
        "Cleaned {} laps: {} pit laps dropped, {} outliers nulled",
        raw.len(),
        pit_laps,
        nulled
    );

    CleanedLaps { laps, bounds }
}
