//! Probability that ensemble members exceed flood stages within a window.
//!
//! Each member's flow samples inside the window are converted to stage through
//! the rating curve; a member exceeds a threshold when any of those stages is
//! strictly greater than it. Probability is the exceeding share of all
//! members in the table, as a percentage.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::alert::thresholds::{FloodThresholds, RiskLevel};
use crate::analysis::rating::{Lookup, RatingCurve};
use crate::logging::{self, Component};
use crate::model::{CoreError, EnsembleTable};

/// Threshold name → percentage of members exceeding it, in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExceedanceResult {
    probabilities: BTreeMap<String, f64>,
}

impl ExceedanceResult {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.probabilities.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.probabilities.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, f64> {
        self.probabilities
    }
}

/// Highest stage a member reaches over `rows`, if it has any usable sample.
fn member_peak_stage(values: &[Option<f64>], lookup: &Lookup) -> Option<f64> {
    values
        .iter()
        .flatten()
        .filter_map(|flow| lookup.at(*flow))
        .fold(None, |peak: Option<f64>, stage| Some(peak.map_or(stage, |p| p.max(stage))))
}

/// Exceedance probability per threshold over `[window_start, window_end]`.
///
/// Every threshold is evaluated against the full member set. Members with no
/// sample in the window, and every member when the rating curve is empty,
/// count as not exceeding. An inverted window selects no rows.
pub fn compute_exceedance(
    ensemble: &EnsembleTable,
    curve: &RatingCurve,
    thresholds: &BTreeMap<String, f64>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> ExceedanceResult {
    let total = ensemble.member_count();
    if total == 0 {
        logging::debug(Component::Exceedance, None, "no ensemble members; all probabilities are zero");
        return ExceedanceResult {
            probabilities: thresholds.keys().map(|name| (name.clone(), 0.0)).collect(),
        };
    }
    if curve.is_empty() {
        logging::warn(Component::Exceedance, None, &CoreError::MissingCurve.to_string());
    }

    let rows = ensemble.window_rows(window_start, window_end);
    let lookup = curve.by_flow();

    let peaks: Vec<Option<f64>> = ensemble
        .members()
        .map(|(id, values)| {
            let peak = member_peak_stage(&values[rows.clone()], &lookup);
            if peak.is_none() {
                logging::debug(
                    Component::Exceedance,
                    None,
                    &format!("member {} has no usable samples in window", id),
                );
            }
            peak
        })
        .collect();

    let probabilities = thresholds
        .iter()
        .map(|(name, &threshold)| {
            let exceeding = if threshold.is_finite() {
                peaks
                    .iter()
                    .filter(|peak| peak.is_some_and(|stage| stage > threshold))
                    .count()
            } else {
                0
            };
            (name.clone(), exceeding as f64 / total as f64 * 100.0)
        })
        .collect();

    let result = ExceedanceResult { probabilities };
    logging::debug(
        Component::Exceedance,
        None,
        &format!(
            "{} → {}: {}",
            window_start.format("%Y-%m-%d %H:%M"),
            window_end.format("%Y-%m-%d %H:%M"),
            result
                .iter()
                .map(|(name, p)| format!("{}={:.1}%", name, p))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    );
    result
}

// ---------------------------------------------------------------------------
// Two-window risk table
// ---------------------------------------------------------------------------

/// One threshold's short- and long-term exceedance.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRow {
    pub name: String,
    pub stage: f64,
    pub short_term: f64,
    pub long_term: f64,
    pub level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskTable {
    pub short_window: (DateTime<Utc>, DateTime<Utc>),
    pub long_window: (DateTime<Utc>, DateTime<Utc>),
    /// Ascending by threshold stage.
    pub rows: Vec<RiskRow>,
}

impl RiskTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, name: &str) -> Option<&RiskRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Short-term `[first, first + days]` and long-term `(first + days, last]`
/// exceedance for every threshold. `None` for an empty ensemble.
pub fn risk_table(
    ensemble: &EnsembleTable,
    curve: &RatingCurve,
    thresholds: &FloodThresholds,
    short_term_days: i64,
) -> Option<RiskTable> {
    let (Some(first), Some(last)) = (ensemble.first_time(), ensemble.last_time()) else {
        logging::debug(Component::Exceedance, None, "empty ensemble; no risk table");
        return None;
    };
    if ensemble.member_count() == 0 {
        return None;
    }

    // A horizon past the representable range covers the whole ensemble.
    let short_end = Duration::try_days(short_term_days)
        .and_then(|days| first.checked_add_signed(days))
        .unwrap_or(last);
    // Rows at exactly `short_end` belong to the short-term window only.
    let long_start = short_end
        .checked_add_signed(Duration::nanoseconds(1))
        .unwrap_or(short_end);

    let stage_map = thresholds.as_stage_map();
    let short = compute_exceedance(ensemble, curve, &stage_map, first, short_end);
    let long = compute_exceedance(ensemble, curve, &stage_map, long_start, last);

    let rows = thresholds
        .sorted()
        .into_iter()
        .map(|threshold| {
            let short_term = short.get(&threshold.name).unwrap_or(0.0);
            let long_term = long.get(&threshold.name).unwrap_or(0.0);
            RiskRow {
                level: RiskLevel::from_probabilities(short_term, long_term),
                name: threshold.name,
                stage: threshold.stage,
                short_term,
                long_term,
            }
        })
        .collect();

    Some(RiskTable {
        short_window: (first, short_end),
        long_window: (long_start, last),
        rows,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
