use std::panic;
use std::path::Path;

use anyhow::Result;
use lap_pace::{Color as PaceColor, LineStyle, RenderedFigure};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::{FontDesc, FontFamily, FontStyle};

const BOX_HALF_WIDTH: f64 = 0.25;
const CAP_HALF_WIDTH: f64 = 0.12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

/// Draw `figure` to `path`, turning backend errors and panics into a message.
pub fn render_chart_guard(
    figure: &RenderedFigure,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(figure, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(figure: &RenderedFigure, path: &Path, kind: ChartKind) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, figure.size).into_drawing_area();
            draw_figure(root, figure)?;
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, figure.size).into_drawing_area();
            draw_figure(root, figure)?;
        }
    }
    Ok(())
}

fn draw_figure<DB>(root: DrawingArea<DB, Shift>, figure: &RenderedFigure) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let body = root.titled(
        &figure.title,
        FontDesc::new(FontFamily::SansSerif, 28.0, FontStyle::Bold),
    )?;
    let panels = body.split_evenly((2, 1));
    draw_distribution_panel(&panels[0], figure)?;
    draw_trend_panel(&panels[1], figure)?;
    root.present()?;
    Ok(())
}

fn draw_distribution_panel<DB>(area: &DrawingArea<DB, Shift>, figure: &RenderedFigure) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let slots = &figure.distribution;
    let n = slots.len().max(1);
    let (y_lo, y_hi) = padded(figure.distribution_range());
    let labels: Vec<&str> = slots.iter().map(|s| s.driver.as_str()).collect();

    let mut chart = ChartBuilder::on(area)
        .caption(
            "Average pace",
            FontDesc::new(FontFamily::SansSerif, 20.0, FontStyle::Normal),
        )
        .margin(15)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), y_lo..y_hi)?;

    let driver_label = |v: &f64| -> String {
        let idx = v.round();
        if idx < 0.0 || (v - idx).abs() > 1e-6 {
            return String::new();
        }
        labels
            .get(idx as usize)
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&driver_label)
        .y_label_formatter(&|v| format!("{:.1}", v))
        .y_desc("Laptime (seconds)")
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            14.0,
            FontStyle::Normal,
        ))
        .draw()?;

    let box_style = ShapeStyle {
        color: RGBColor(40, 40, 40).to_rgba(),
        filled: false,
        stroke_width: 1,
    };
    let median_style = ShapeStyle {
        color: RGBColor(255, 127, 14).to_rgba(),
        filled: false,
        stroke_width: 2,
    };

    for (idx, slot) in slots.iter().enumerate() {
        let stats = match slot.stats.as_ref() {
            Some(stats) => stats,
            None => continue,
        };
        let x = idx as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - BOX_HALF_WIDTH, stats.q1), (x + BOX_HALF_WIDTH, stats.q3)],
            box_style,
        )))?;
        chart.draw_series([
            PathElement::new(
                vec![(x - BOX_HALF_WIDTH, stats.median), (x + BOX_HALF_WIDTH, stats.median)],
                median_style,
            ),
            PathElement::new(vec![(x, stats.q1), (x, stats.whisker_low)], box_style),
            PathElement::new(vec![(x, stats.q3), (x, stats.whisker_high)], box_style),
            PathElement::new(
                vec![(x - CAP_HALF_WIDTH, stats.whisker_low), (x + CAP_HALF_WIDTH, stats.whisker_low)],
                box_style,
            ),
            PathElement::new(
                vec![(x - CAP_HALF_WIDTH, stats.whisker_high), (x + CAP_HALF_WIDTH, stats.whisker_high)],
                box_style,
            ),
        ])?;
        chart.draw_series(
            stats
                .fliers
                .iter()
                .map(|&t| Circle::new((x, t), 3, box_style)),
        )?;
    }

    Ok(())
}

fn draw_trend_panel<DB>(area: &DrawingArea<DB, Shift>, figure: &RenderedFigure) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x_lo, x_hi) = match figure.lap_range() {
        Some((lo, hi)) if hi > lo => (lo as f64, hi as f64),
        Some((lo, _)) => (lo as f64 - 0.5, lo as f64 + 0.5),
        None => (0.0, 1.0),
    };
    let (y_lo, y_hi) = padded(figure.trend_range());

    let mut chart = ChartBuilder::on(area)
        .caption(
            "Lap-by-lap pace",
            FontDesc::new(FontFamily::SansSerif, 20.0, FontStyle::Normal),
        )
        .margin(15)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)?;

    if let Some(background) = figure.trend_background {
        chart.plotting_area().fill(&to_rgb(background))?;
    }

    chart
        .configure_mesh()
        .x_desc("Lap")
        .y_desc("Laptime (seconds)")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            14.0,
            FontStyle::Normal,
        ))
        .draw()?;

    for line in &figure.trends {
        let style = ShapeStyle {
            color: to_rgb(line.style.color).to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        let points: Vec<(f64, f64)> = line.points.iter().map(|(n, t)| (*n as f64, *t)).collect();
        let anno = match line.style.linestyle {
            LineStyle::Solid => chart.draw_series(LineSeries::new(points, style))?,
            LineStyle::Dashed => chart.draw_series(DashedLineSeries::new(points, 10, 6, style))?,
            LineStyle::Dotted => chart.draw_series(DashedLineSeries::new(points, 3, 5, style))?,
        };
        anno.label(line.driver.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 24, y)], style));
    }

    if !figure.trends.is_empty() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK.mix(0.4))
            .label_font(FontDesc::new(
                FontFamily::SansSerif,
                14.0,
                FontStyle::Normal,
            ))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    Ok(())
}

fn to_rgb(color: PaceColor) -> RGBColor {
    RGBColor(color.r, color.g, color.b)
}

fn padded(range: Option<(f64, f64)>) -> (f64, f64) {
    match range {
        Some((lo, hi)) => {
            let pad = ((hi - lo) * 0.05).max(0.5);
            (lo - pad, hi + pad)
        }
        None => (0.0, 1.0),
    }
}
