//! Stage ↔ flow conversion through a gauge's rating curve.
//!
//! Both directions are pointwise piecewise-linear lookups over the curve's
//! (stage, flow) breakpoints, sorted by whichever variable is independent for
//! the call. Inputs outside the curve's domain clamp to the first or last
//! breakpoint's dependent value. An empty curve yields `None` for every input.

use serde_json::Value;

use crate::logging::{self, Component};
use crate::model::RawRecord;

/// One (stage, flow) breakpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingPoint {
    pub stage: f64,
    pub flow: f64,
}

/// A gauge's empirical stage-flow relationship.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RatingCurve {
    points: Vec<RatingPoint>,
}

impl RatingCurve {
    /// Builds a curve from breakpoints. Non-finite points are discarded.
    pub fn new(points: Vec<RatingPoint>) -> Self {
        Self {
            points: points
                .into_iter()
                .filter(|p| p.stage.is_finite() && p.flow.is_finite())
                .collect(),
        }
    }

    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|&(stage, flow)| RatingPoint { stage, flow })
                .collect(),
        )
    }

    /// Builds a curve from provider records carrying `stage` and `flow`.
    ///
    /// A record missing either field (or holding a non-numeric value)
    /// invalidates the whole curve, which then comes back empty.
    pub fn from_records(records: &[RawRecord]) -> Self {
        let points: Option<Vec<RatingPoint>> = records
            .iter()
            .map(|r| {
                Some(RatingPoint {
                    stage: number(r.get("stage")?)?,
                    flow: number(r.get("flow")?)?,
                })
            })
            .collect();

        match points {
            Some(points) => Self::new(points),
            None => {
                logging::warn(
                    Component::Rating,
                    None,
                    "incomplete rating curve (missing 'stage' or 'flow'); treating as empty",
                );
                Self::default()
            }
        }
    }

    pub fn points(&self) -> &[RatingPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// (min, max) stage covered by the curve.
    pub fn stage_domain(&self) -> Option<(f64, f64)> {
        domain(self.points.iter().map(|p| p.stage))
    }

    /// (min, max) flow covered by the curve.
    pub fn flow_domain(&self) -> Option<(f64, f64)> {
        domain(self.points.iter().map(|p| p.flow))
    }

    /// Lookup table keyed on stage.
    pub fn by_stage(&self) -> Lookup {
        Lookup::new(self.points.iter().map(|p| (p.stage, p.flow)).collect())
    }

    /// Lookup table keyed on flow.
    pub fn by_flow(&self) -> Lookup {
        Lookup::new(self.points.iter().map(|p| (p.flow, p.stage)).collect())
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn domain(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Breakpoints sorted by the independent variable, ready for repeated lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl Lookup {
    fn new(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys) = pairs.into_iter().unzip();
        Self { xs, ys }
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Interpolated value at `x`; `None` for an empty table or non-finite `x`.
    pub fn at(&self, x: f64) -> Option<f64> {
        let n = self.xs.len();
        if n == 0 || !x.is_finite() {
            return None;
        }
        if x <= self.xs[0] {
            return Some(self.ys[0]);
        }
        if x >= self.xs[n - 1] {
            return Some(self.ys[n - 1]);
        }

        // First breakpoint strictly above x; x lies in [xs[hi-1], xs[hi]).
        let hi = self.xs.partition_point(|&b| b <= x);
        let lo = hi - 1;
        let (x0, x1) = (self.xs[lo], self.xs[hi]);
        let (y0, y1) = (self.ys[lo], self.ys[hi]);
        let dx = x1 - x0;
        if dx.abs() < f64::EPSILON {
            Some(y0)
        } else {
            Some(y0 + (x - x0) / dx * (y1 - y0))
        }
    }

    /// `at` over a slice, one output per input, order preserved.
    pub fn map(&self, xs: &[f64]) -> Vec<Option<f64>> {
        xs.iter().map(|&x| self.at(x)).collect()
    }
}

/// Converts stage values to flow.
pub fn stage_to_flow(stages: &[f64], curve: &RatingCurve) -> Vec<Option<f64>> {
    if curve.is_empty() {
        logging::warn(Component::Rating, None, "stage_to_flow: rating curve is empty");
    }
    curve.by_stage().map(stages)
}

/// Converts flow values to stage.
pub fn flow_to_stage(flows: &[f64], curve: &RatingCurve) -> Vec<Option<f64>> {
    if curve.is_empty() {
        logging::warn(Component::Rating, None, "flow_to_stage: rating curve is empty");
    }
    curve.by_flow().map(flows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
