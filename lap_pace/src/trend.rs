//! Per-driver pace trend via least-squares polynomial regression.

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DriverSeries, PaceError};

const RANK_TOLERANCE: f64 = 1e-10;

/// Fitted pace for one driver, one point per lap of the source series.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendCurve {
    pub driver: String,
    pub points: Vec<(u32, f64)>,
}

impl TrendCurve {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Polynomial in a centred and scaled abscissa.
///
/// Lap numbers are mapped onto `[-1, 1]` before fitting so the Vandermonde
/// columns stay well conditioned at degree five.
#[derive(Clone, Debug, PartialEq)]
pub struct Polynomial {
    coeffs: Array1<f64>,
    center: f64,
    half_range: f64,
}

impl Polynomial {
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let u = (x - self.center) / self.half_range;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * u + c)
    }
}

/// Least-squares fit of `y` against `x` with a polynomial of `degree`.
///
/// Needs at least `degree + 1` distinct abscissae; fewer leaves the system
/// under-determined and is reported as [`PaceError::InsufficientData`].
pub fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial, PaceError> {
    if x.len() != y.len() {
        return Err(PaceError::InvalidParameter(format!(
            "x and y lengths differ ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    let required = degree.checked_add(1).ok_or_else(|| {
        PaceError::InvalidParameter(format!("polynomial degree {} is too large", degree))
    })?;
    let distinct = count_distinct(x);
    if distinct < required {
        return Err(PaceError::InsufficientData {
            driver: String::new(),
            points: distinct,
            required,
        });
    }

    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let center = (min + max) / 2.0;
    let half_range = if max > min { (max - min) / 2.0 } else { 1.0 };

    let m = x.len();
    let mut design = Array2::<f64>::zeros((m, required));
    for (row, &xi) in x.iter().enumerate() {
        let u = (xi - center) / half_range;
        let mut power = 1.0;
        for col in 0..required {
            design[[row, col]] = power;
            power *= u;
        }
    }
    let rhs = Array1::from_vec(y.to_vec());

    let insufficient = || PaceError::InsufficientData {
        driver: String::new(),
        points: distinct,
        required,
    };
    let coeffs = solve_least_squares(design, rhs).ok_or_else(insufficient)?;
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(insufficient());
    }

    Ok(Polynomial {
        coeffs,
        center,
        half_range,
    })
}

/// Fit a pace trend to `series` and evaluate it at each lap the series holds.
pub fn fit_trend(series: &DriverSeries, degree: usize) -> Result<TrendCurve, PaceError> {
    let x: Vec<f64> = series.laps.iter().map(|(n, _)| *n as f64).collect();
    let y = series.times();
    let poly = fit_polynomial(&x, &y, degree).map_err(|err| match err {
        PaceError::InsufficientData {
            points, required, ..
        } => PaceError::InsufficientData {
            driver: series.driver.clone(),
            points,
            required,
        },
        other => other,
    })?;

    let points: Vec<(u32, f64)> = series
        .laps
        .iter()
        .map(|(lap, _)| (*lap, poly.evaluate(*lap as f64)))
        .collect();
    debug!(
        driver = %series.driver,
        laps = points.len(),
        degree = poly.degree(),
        "fitted pace trend"
    );

    Ok(TrendCurve {
        driver: series.driver.clone(),
        points,
    })
}

fn count_distinct(x: &[f64]) -> usize {
    let mut sorted: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    sorted.len()
}

/// Householder QR solve of the overdetermined system `a * c = b`.
fn solve_least_squares(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let (m, n) = a.dim();
    if m < n {
        return None;
    }

    for k in 0..n {
        let column = a.slice(s![k.., k]).to_owned();
        let norm = column.dot(&column).sqrt();
        if norm == 0.0 {
            continue;
        }
        let alpha = if column[0] > 0.0 { -norm } else { norm };
        let mut v = column;
        v[0] -= alpha;
        let v_norm2 = v.dot(&v);
        if v_norm2 == 0.0 {
            continue;
        }
        for j in k..n {
            let f = 2.0 * v.dot(&a.slice(s![k.., j])) / v_norm2;
            a.slice_mut(s![k.., j]).scaled_add(-f, &v);
        }
        let f = 2.0 * v.dot(&b.slice(s![k..])) / v_norm2;
        b.slice_mut(s![k..]).scaled_add(-f, &v);
    }

    let scale = (0..n).map(|i| a[[i, i]].abs()).fold(0.0, f64::max);
    if scale == 0.0 {
        return None;
    }
    let mut coeffs = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let diag = a[[i, i]];
        if diag.abs() <= RANK_TOLERANCE * scale {
            return None;
        }
        let mut acc = b[i];
        for j in (i + 1)..n {
            acc -= a[[i, j]] * coeffs[j];
        }
        coeffs[i] = acc / diag;
    }
    Some(coeffs)
}
