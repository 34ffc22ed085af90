//! Cross-member percentile bands for an ensemble forecast.
//!
//! Quantiles are taken across members at every native timestamp (linear
//! interpolation between ranked values), then each level is resampled onto an
//! hourly grid by time-weighted linear interpolation. The grid starts at the
//! first timestamp floored to the hour; grid points outside the span of
//! defined values stay undefined.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::analysis::rating::RatingCurve;
use crate::logging::{self, Component};
use crate::model::{EnsembleTable, Series};

/// The seven band levels, in ascending rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PercentileLevel {
    P05,
    P10,
    P25,
    P50,
    P75,
    P90,
    P95,
}

impl PercentileLevel {
    pub const ALL: [PercentileLevel; 7] = [
        PercentileLevel::P05,
        PercentileLevel::P10,
        PercentileLevel::P25,
        PercentileLevel::P50,
        PercentileLevel::P75,
        PercentileLevel::P90,
        PercentileLevel::P95,
    ];

    /// Band key as rendered (`p05` … `p95`).
    pub fn name(self) -> &'static str {
        match self {
            PercentileLevel::P05 => "p05",
            PercentileLevel::P10 => "p10",
            PercentileLevel::P25 => "p25",
            PercentileLevel::P50 => "p50",
            PercentileLevel::P75 => "p75",
            PercentileLevel::P90 => "p90",
            PercentileLevel::P95 => "p95",
        }
    }

    pub fn fraction(self) -> f64 {
        match self {
            PercentileLevel::P05 => 0.05,
            PercentileLevel::P10 => 0.10,
            PercentileLevel::P25 => 0.25,
            PercentileLevel::P50 => 0.50,
            PercentileLevel::P75 => 0.75,
            PercentileLevel::P90 => 0.90,
            PercentileLevel::P95 => 0.95,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.name() == name)
    }
}

impl fmt::Display for PercentileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One series per percentile level. All seven keys are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileBandSet {
    bands: BTreeMap<PercentileLevel, Series>,
}

impl Default for PercentileBandSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PercentileBandSet {
    /// Seven empty series.
    pub fn empty() -> Self {
        Self {
            bands: PercentileLevel::ALL
                .into_iter()
                .map(|level| (level, Series::new()))
                .collect(),
        }
    }

    fn from_fn(mut build: impl FnMut(PercentileLevel) -> Series) -> Self {
        Self {
            bands: PercentileLevel::ALL
                .into_iter()
                .map(|level| (level, build(level)))
                .collect(),
        }
    }

    pub fn get(&self, level: PercentileLevel) -> &Series {
        // Every level is inserted on construction.
        &self.bands[&level]
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Series> {
        PercentileLevel::from_name(name).map(|level| self.get(level))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PercentileLevel, &Series)> {
        self.bands.iter().map(|(level, series)| (*level, series))
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// True when every band is empty.
    pub fn is_empty(&self) -> bool {
        self.bands.values().all(Series::is_empty)
    }
}

/// Linear-interpolation quantile of `sorted` (ascending, non-empty).
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Cross-member quantile at each native timestamp, per level.
fn native_quantiles(ensemble: &EnsembleTable) -> BTreeMap<PercentileLevel, Vec<Option<f64>>> {
    let members: Vec<&[Option<f64>]> = ensemble
        .members()
        .map(|(_, values)| values)
        .filter(|values| values.iter().any(Option::is_some))
        .collect();

    let mut out: BTreeMap<PercentileLevel, Vec<Option<f64>>> = PercentileLevel::ALL
        .into_iter()
        .map(|level| (level, Vec::with_capacity(ensemble.len())))
        .collect();

    let mut row_values: Vec<f64> = Vec::with_capacity(members.len());
    for row in 0..ensemble.len() {
        row_values.clear();
        row_values.extend(members.iter().filter_map(|m| m[row]));
        row_values.sort_by(f64::total_cmp);

        for (level, column) in out.iter_mut() {
            column.push(if row_values.is_empty() {
                None
            } else {
                Some(quantile(&row_values, level.fraction()))
            });
        }
    }
    out
}

/// Sub-second precision; knots can be closer than a second apart.
fn seconds(d: Duration) -> f64 {
    d.num_nanoseconds()
        .map(|ns| ns as f64 / 1e9)
        .unwrap_or_else(|| d.num_milliseconds() as f64 / 1e3)
}

/// Resamples a sparse series onto an hourly grid by time-linear interpolation.
pub fn resample_hourly(index: &[DateTime<Utc>], values: &[Option<f64>]) -> Series {
    let knots: Vec<(DateTime<Utc>, f64)> = index
        .iter()
        .zip(values)
        .filter_map(|(t, v)| v.map(|v| (*t, v)))
        .collect();

    let (Some(first), Some(last)) = (index.first(), index.last()) else {
        return Series::new();
    };
    let step = Duration::hours(1);
    let Ok(start) = first.duration_trunc(step) else {
        return Series::new();
    };

    let mut grid = Vec::new();
    let mut out = Vec::new();
    let mut t = start;
    let mut k = 0usize;
    while t <= *last {
        // Advance to the first knot at or after t.
        while k < knots.len() && knots[k].0 < t {
            k += 1;
        }
        let value = match knots.get(k) {
            Some(&(kt, kv)) if kt == t => Some(kv),
            Some(&(kt, kv)) if k > 0 => {
                let (pt, pv) = knots[k - 1];
                let span = seconds(kt - pt);
                if span <= 0.0 {
                    Some(pv)
                } else {
                    Some(pv + (kv - pv) * seconds(t - pt) / span)
                }
            }
            _ => None,
        };
        grid.push(t);
        out.push(value);
        t += step;
    }

    Series::from_parts(grid, out)
}

/// Percentile bands of `ensemble` in its native units (flow).
pub fn compute_bands(ensemble: &EnsembleTable) -> PercentileBandSet {
    let usable = ensemble
        .members()
        .filter(|(_, values)| values.iter().any(Option::is_some))
        .count();
    if ensemble.index().is_empty() || usable == 0 {
        logging::warn(Component::Percentile, None, "ensemble is empty; returning empty bands");
        return PercentileBandSet::empty();
    }

    let native = native_quantiles(ensemble);
    let bands = PercentileBandSet::from_fn(|level| {
        native
            .get(&level)
            .map(|values| resample_hourly(ensemble.index(), values))
            .unwrap_or_default()
    });

    logging::debug(
        Component::Percentile,
        None,
        &format!(
            "computed bands from {} members, {} native rows, {} hourly points",
            usable,
            ensemble.len(),
            bands.get(PercentileLevel::P50).len()
        ),
    );
    bands
}

/// Converts each flow-space band to stage independently.
///
/// An empty rating curve leaves every projected cell undefined while keeping
/// the grid, so the shape stays uniform.
pub fn project_to_stage(bands: &PercentileBandSet, curve: &RatingCurve) -> PercentileBandSet {
    if curve.is_empty() {
        logging::warn(Component::Percentile, None, "rating curve is empty; stage bands undefined");
    }
    let lookup = curve.by_flow();
    PercentileBandSet::from_fn(|level| {
        let band = bands.get(level);
        let stages = band
            .values()
            .iter()
            .map(|v| v.and_then(|flow| lookup.at(flow)))
            .collect();
        Series::from_parts(band.index().to_vec(), stages)
    })
}

/// `compute_bands` followed by `project_to_stage`.
pub fn compute_and_project(ensemble: &EnsembleTable, curve: &RatingCurve) -> PercentileBandSet {
    project_to_stage(&compute_bands(ensemble), curve)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
