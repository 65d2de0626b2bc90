//! Lap-time pace analysis for a single motorsport session.
//!
//! The pipeline turns raw lap records into a clean, comparable signal per
//! driver: pit-affected laps are dropped, session-wide IQR outliers are nulled,
//! each driver gets a least-squares pace trend, and a per-render team registry
//! decides colours and line styles for the two coordinated figure panels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod figure;
pub mod outlier;
pub mod session;
pub mod style;
pub mod trend;

pub use figure::{
    render, BoxStats, ComparativeRenderer, DistributionSlot, LegendEntry, RenderedFigure,
    SkipReason, SkippedDriver, TrendLine,
};
pub use outlier::{clean_laps, quantile, CleanedLaps, IqrBounds};
pub use session::{
    latest_completed_event, select_event, EventInfo, EventMetadata, EventSelector,
    FileSessionProvider, SessionData, SessionKind, SessionProvider, SessionRef,
};
pub use style::{
    assign_style, Color, LineStyle, SeasonPalette, StyleDirective, StyleRank, TeamColors,
    TeamStyleRegistry,
};
pub use trend::{fit_polynomial, fit_trend, Polynomial, TrendCurve};

/// Highest trend polynomial degree accepted from configuration.
pub const MAX_TREND_DEGREE: usize = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaceError {
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("insufficient data for {driver}: {points} laps, need at least {required}")]
    InsufficientData {
        driver: String,
        points: usize,
        required: usize,
    },
    #[error("unknown team: {0}")]
    UnknownTeam(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse session data: {0}")]
    Parse(String),
}

/// One completed lap by one driver.
///
/// `lap_time_s` is `None` when the timing feed had no value or when the
/// outlier filter rejected the lap; the record itself is never dropped so lap
/// numbers stay aligned.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Lap {
    pub driver: String,
    pub team: String,
    pub lap_number: u32,
    pub lap_time_s: Option<f64>,
    pub pit_affected: bool,
}

impl Lap {
    pub fn new(driver: &str, team: &str, lap_number: u32, lap_time_s: Option<f64>) -> Self {
        Self {
            driver: driver.to_string(),
            team: team.to_string(),
            lap_number,
            lap_time_s,
            pit_affected: false,
        }
    }

    pub fn pit(mut self) -> Self {
        self.pit_affected = true;
        self
    }

    /// The lap time if it is present and finite.
    pub fn valid_time(&self) -> Option<f64> {
        self.lap_time_s.filter(|t| t.is_finite())
    }
}

/// Valid laps of one driver ordered by lap number.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DriverSeries {
    pub driver: String,
    pub team: String,
    pub laps: Vec<(u32, f64)>,
}

impl DriverSeries {
    /// Collect a driver's valid, non-pit laps. Returns `None` when the driver
    /// has no such lap.
    ///
    /// The team is the one reported on most of those laps; ties go to the team
    /// seen first in lap order.
    pub fn from_laps(laps: &[Lap], driver: &str) -> Option<Self> {
        let mut rows: Vec<&Lap> = laps
            .iter()
            .filter(|lap| lap.driver == driver && !lap.pit_affected && lap.valid_time().is_some())
            .collect();
        if rows.is_empty() {
            return None;
        }
        rows.sort_by_key(|lap| lap.lap_number);

        let team = dominant_team(&rows)?;
        let laps = rows
            .iter()
            .filter_map(|lap| lap.valid_time().map(|t| (lap.lap_number, t)))
            .collect();
        Some(Self {
            driver: driver.to_string(),
            team,
            laps,
        })
    }

    pub fn len(&self) -> usize {
        self.laps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    pub fn lap_numbers(&self) -> Vec<u32> {
        self.laps.iter().map(|(n, _)| *n).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.laps.iter().map(|(_, t)| *t).collect()
    }
}

fn dominant_team(rows: &[&Lap]) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, lap) in rows.iter().enumerate() {
        let entry = counts.entry(lap.team.as_str()).or_insert((0, idx));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(team, _)| team.to_string())
}

/// Tunables for one analysis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaceParams {
    pub iqr_multiplier: f64,
    pub trend_degree: usize,
    pub highlight_team: String,
    pub highlight_background: Color,
    pub primary_linestyle: LineStyle,
    pub secondary_linestyle: LineStyle,
    pub fallback_color: Color,
    pub figure_size: (u32, u32),
}

impl Default for PaceParams {
    fn default() -> Self {
        Self {
            iqr_multiplier: 1.5,
            trend_degree: 5,
            highlight_team: "Haas F1 Team".to_string(),
            highlight_background: Color::rgb(128, 128, 128),
            primary_linestyle: LineStyle::Solid,
            secondary_linestyle: LineStyle::Dotted,
            fallback_color: Color::rgb(0, 0, 0),
            figure_size: (1000, 1000),
        }
    }
}

impl PaceParams {
    pub fn validate(&self) -> Result<(), PaceError> {
        if !self.iqr_multiplier.is_finite() || self.iqr_multiplier < 0.0 {
            return Err(PaceError::InvalidParameter(format!(
                "iqr_multiplier must be a non-negative number, got {}",
                self.iqr_multiplier
            )));
        }
        if self.trend_degree > MAX_TREND_DEGREE {
            return Err(PaceError::InvalidParameter(format!(
                "trend_degree must be at most {}, got {}",
                MAX_TREND_DEGREE, self.trend_degree
            )));
        }
        if self.figure_size.0 == 0 || self.figure_size.1 == 0 {
            return Err(PaceError::InvalidParameter(
                "figure_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
