//! Two-panel pace figure: lap-time distribution per driver and lap-by-lap trend.
//!
//! [`ComparativeRenderer::render`] produces a [`RenderedFigure`], a plain
//! description of everything a drawing backend needs. It never touches pixels.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::outlier::{quantile, CleanedLaps};
use crate::style::{Color, LineStyle, StyleDirective, TeamColors, TeamStyleRegistry};
use crate::trend::fit_trend;
use crate::{PaceError, PaceParams};

const WHISKER_FACTOR: f64 = 1.5;

/// Box-and-whisker summary of one driver's cleaned lap times.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoxStats {
    pub count: usize,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub mean: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub fliers: Vec<f64>,
}

impl BoxStats {
    /// Whiskers reach the most extreme sample within 1.5 IQR of the box;
    /// anything further out is a flier.
    pub fn from_times(times: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by_key(|t| OrderedFloat(*t));

        let q1 = quantile(&sorted, 0.25)?;
        let median = quantile(&sorted, 0.5)?;
        let q3 = quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;
        let lo_fence = q1 - WHISKER_FACTOR * iqr;
        let hi_fence = q3 + WHISKER_FACTOR * iqr;

        let inside: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|t| *t >= lo_fence && *t <= hi_fence)
            .collect();
        let whisker_low = inside.first().copied().unwrap_or(q1);
        let whisker_high = inside.last().copied().unwrap_or(q3);
        let fliers = sorted
            .iter()
            .copied()
            .filter(|t| *t < lo_fence || *t > hi_fence)
            .collect();

        Some(Self {
            count: sorted.len(),
            q1,
            median,
            q3,
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            whisker_low,
            whisker_high,
            fliers,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DistributionSlot {
    pub driver: String,
    pub team: Option<String>,
    pub stats: Option<BoxStats>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendLine {
    pub driver: String,
    pub style: StyleDirective,
    pub points: Vec<(u32, f64)>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: Color,
    pub linestyle: LineStyle,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum SkipReason {
    /// The driver has no lap in the session at all.
    Missing,
    /// Every lap of the driver was pit-affected or rejected.
    NoValidLaps,
    InsufficientData { points: usize, required: usize },
    FitFailed(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SkippedDriver {
    pub driver: String,
    pub reason: SkipReason,
}

/// Everything needed to draw the two coordinated panels.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RenderedFigure {
    pub title: String,
    pub size: (u32, u32),
    pub distribution: Vec<DistributionSlot>,
    pub trends: Vec<TrendLine>,
    pub legend: Vec<LegendEntry>,
    /// Background fill for the trend panel, set when the highlighted team was drawn.
    pub trend_background: Option<Color>,
    pub skipped: Vec<SkippedDriver>,
}

impl RenderedFigure {
    pub fn distribution_range(&self) -> Option<(f64, f64)> {
        let values = self
            .distribution
            .iter()
            .filter_map(|slot| slot.stats.as_ref())
            .flat_map(|s| {
                let mut v = vec![s.whisker_low, s.whisker_high];
                v.extend(s.fliers.iter().copied());
                v
            });
        min_max(values)
    }

    pub fn trend_range(&self) -> Option<(f64, f64)> {
        min_max(
            self.trends
                .iter()
                .flat_map(|line| line.points.iter().map(|(_, t)| *t)),
        )
    }

    pub fn lap_range(&self) -> Option<(u32, u32)> {
        let laps = self
            .trends
            .iter()
            .flat_map(|line| line.points.iter().map(|(n, _)| *n));
        let (mut lo, mut hi) = (u32::MAX, u32::MIN);
        let mut any = false;
        for n in laps {
            lo = lo.min(n);
            hi = hi.max(n);
            any = true;
        }
        if any {
            Some((lo, hi))
        } else {
            None
        }
    }

    pub fn trend_for(&self, driver: &str) -> Option<&TrendLine> {
        self.trends.iter().find(|line| line.driver == driver)
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Turns cleaned laps and an explicit driver order into a [`RenderedFigure`].
pub struct ComparativeRenderer<'a, C: TeamColors + ?Sized> {
    params: &'a PaceParams,
    colors: &'a C,
}

impl<'a, C: TeamColors + ?Sized> ComparativeRenderer<'a, C> {
    pub fn new(params: &'a PaceParams, colors: &'a C) -> Self {
        Self { params, colors }
    }

    /// Drivers are visited in `driver_order`; that order alone decides which
    /// teammate gets the primary line style. A driver without usable laps is
    /// recorded in [`RenderedFigure::skipped`] and the render carries on.
    pub fn render(
        &self,
        cleaned: &CleanedLaps,
        driver_order: &[String],
        title: &str,
    ) -> RenderedFigure {
        let mut registry = TeamStyleRegistry::new(self.params);
        let mut distribution = Vec::with_capacity(driver_order.len());
        let mut trends = Vec::new();
        let mut skipped = Vec::new();

        for driver in driver_order {
            let series = cleaned.driver_series(driver);
            distribution.push(DistributionSlot {
                driver: driver.clone(),
                team: series.as_ref().map(|s| s.team.clone()),
                stats: series.as_ref().and_then(|s| BoxStats::from_times(&s.times())),
            });

            let series = match series {
                Some(series) => series,
                None => {
                    let reason = if cleaned.contains_driver(driver) {
                        SkipReason::NoValidLaps
                    } else {
                        SkipReason::Missing
                    };
                    warn!("Skipping {}: {:?}", driver, reason);
                    skipped.push(SkippedDriver {
                        driver: driver.clone(),
                        reason,
                    });
                    continue;
                }
            };

            match fit_trend(&series, self.params.trend_degree) {
                Ok(curve) => {
                    let style = registry.assign(&series.team, self.colors);
                    trends.push(TrendLine {
                        driver: driver.clone(),
                        style,
                        points: curve.points,
                    });
                }
                Err(PaceError::InsufficientData {
                    points, required, ..
                }) => {
                    warn!(
                        "Skipping trend for {}: {} distinct laps, degree {} fit needs {}",
                        driver, points, self.params.trend_degree, required
                    );
                    skipped.push(SkippedDriver {
                        driver: driver.clone(),
                        reason: SkipReason::InsufficientData { points, required },
                    });
                }
                Err(err) => {
                    warn!("Skipping trend for {}: {}", driver, err);
                    skipped.push(SkippedDriver {
                        driver: driver.clone(),
                        reason: SkipReason::FitFailed(err.to_string()),
                    });
                }
            }
        }

        let highlight = &self.params.highlight_team;
        let trend_background = if registry
            .teams()
            .iter()
            .any(|team| team.eq_ignore_ascii_case(highlight))
        {
            info!("{} on track; trend panel uses highlight background", highlight);
            Some(self.params.highlight_background)
        } else {
            None
        };

        let legend = trends
            .iter()
            .map(|line| LegendEntry {
                label: line.driver.clone(),
                color: line.style.color,
                linestyle: line.style.linestyle,
            })
            .collect();

        RenderedFigure {
            title: title.to_string(),
            size: self.params.figure_size,
            distribution,
            trends,
            legend,
            trend_background,
            skipped,
        }
    }
}

/// Render with a fresh style registry; see [`ComparativeRenderer::render`].
pub fn render<C: TeamColors + ?Sized>(
    cleaned: &CleanedLaps,
    driver_order: &[String],
    title: &str,
    params: &PaceParams,
    colors: &C,
) -> RenderedFigure {
    ComparativeRenderer::new(params, colors).render(cleaned, driver_order, title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlier::clean_laps;
    use crate::style::{SeasonPalette, StyleRank};
    use crate::Lap;
    use approx::assert_relative_eq;

    fn stint(driver: &str, team: &str, base: f64, laps: u32) -> Vec<Lap> {
        (1..=laps)
            .map(|n| {
                let wobble = ((n * 37 + driver.len() as u32) % 5) as f64 * 0.1;
                Lap::new(driver, team, n, Some(base - 0.02 * n as f64 + wobble))
            })
            .collect()
    }

    fn order(drivers: &[&str]) -> Vec<String> {
        drivers.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn box_stats_separate_fliers() {
        let stats = BoxStats::from_times(&[1.0, 2.0, 3.0, 4.0, 5.0, 40.0]).unwrap();
        assert_eq!(stats.count, 6);
        assert_relative_eq!(stats.q1, 2.25);
        assert_relative_eq!(stats.median, 3.5);
        assert_relative_eq!(stats.q3, 4.75);
        assert_eq!(stats.whisker_low, 1.0);
        assert_eq!(stats.whisker_high, 5.0);
        assert_eq!(stats.fliers, vec![40.0]);
        assert!(BoxStats::from_times(&[]).is_none());
    }

    #[test]
    fn teammates_share_colour_and_split_linestyle() {
        let mut laps = stint("VER", "Red Bull Racing", 92.0, 20);
        laps.extend(stint("LEC", "Ferrari", 92.2, 20));
        laps.extend(stint("PER", "Red Bull Racing", 92.4, 20));
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let params = PaceParams::default();

        let figure = render(&cleaned, &order(&["VER", "LEC", "PER"]), "Test GP", &params, &palette);

        let ver = figure.trend_for("VER").unwrap();
        let lec = figure.trend_for("LEC").unwrap();
        let per = figure.trend_for("PER").unwrap();
        assert_eq!(ver.style.rank, StyleRank::Primary);
        assert_eq!(lec.style.rank, StyleRank::Primary);
        assert_eq!(per.style.rank, StyleRank::Secondary);
        assert_eq!(per.style.linestyle, LineStyle::Dotted);
        assert_eq!(ver.style.color, per.style.color);
        assert_ne!(ver.style.color, lec.style.color);
        assert_eq!(figure.legend.len(), 3);
        assert_eq!(figure.title, "Test GP");
    }

    #[test]
    fn reversed_order_swaps_primary_teammate() {
        let mut laps = stint("VER", "Red Bull Racing", 92.0, 20);
        laps.extend(stint("PER", "Red Bull Racing", 92.4, 20));
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let params = PaceParams::default();

        let figure = render(&cleaned, &order(&["PER", "VER"]), "", &params, &palette);
        assert_eq!(figure.trend_for("PER").unwrap().style.rank, StyleRank::Primary);
        assert_eq!(figure.trend_for("VER").unwrap().style.rank, StyleRank::Secondary);
    }

    #[test]
    fn missing_driver_is_skipped_not_fatal() {
        let laps = stint("HAM", "Mercedes", 92.0, 15);
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let params = PaceParams::default();

        let figure = render(&cleaned, &order(&["MSC", "HAM"]), "", &params, &palette);
        assert_eq!(figure.distribution.len(), 2);
        assert!(figure.distribution[0].stats.is_none());
        assert_eq!(figure.trends.len(), 1);
        assert_eq!(
            figure.skipped,
            vec![SkippedDriver {
                driver: "MSC".into(),
                reason: SkipReason::Missing
            }]
        );
    }

    #[test]
    fn short_stint_keeps_box_but_drops_trend() {
        let mut laps = stint("HAM", "Mercedes", 92.0, 15);
        laps.extend(stint("RUS", "Mercedes", 92.1, 3));
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let params = PaceParams::default();

        let figure = render(&cleaned, &order(&["RUS", "HAM"]), "", &params, &palette);
        assert!(figure.distribution[0].stats.is_some());
        assert!(figure.trend_for("RUS").is_none());
        assert_eq!(
            figure.trend_for("HAM").unwrap().style.rank,
            StyleRank::Primary
        );
        assert!(matches!(
            figure.skipped[0].reason,
            SkipReason::InsufficientData {
                points: 3,
                required: 6
            }
        ));
    }

    #[test]
    fn highlight_background_follows_drawn_teams() {
        let mut laps = stint("MAG", "Haas F1 Team", 93.0, 20);
        laps.extend(stint("BOT", "Alfa Romeo", 93.1, 20));
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let params = PaceParams::default();

        let with = render(&cleaned, &order(&["MAG", "BOT"]), "", &params, &palette);
        assert_eq!(with.trend_background, Some(params.highlight_background));

        let without = render(&cleaned, &order(&["BOT"]), "", &params, &palette);
        assert_eq!(without.trend_background, None);
    }

    #[test]
    fn ranges_cover_drawn_data() {
        let laps = stint("NOR", "McLaren", 91.0, 12);
        let cleaned = clean_laps(&laps, 1.5);
        let palette = SeasonPalette::for_season(2022);
        let figure = render(&cleaned, &order(&["NOR"]), "", &PaceParams::default(), &palette);
        assert_eq!(figure.lap_range(), Some((1, 12)));
        let (lo, hi) = figure.distribution_range().unwrap();
        assert!(lo <= hi);
        assert!(figure.trend_range().is_some());
    }
}
