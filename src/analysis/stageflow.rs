//! Normalize a stage/flow payload and fill in whichever quantity is missing.

use crate::analysis::normalize::normalize;
use crate::analysis::rating::{RatingCurve, flow_to_stage, stage_to_flow};
use crate::logging::{self, Component};
use crate::model::{CoreError, FLOW_CFS, FLOW_KCFS, FieldMap, NormalizedSeries, RawRecord, STAGE_FT};

/// Which column, if any, was derived through the rating curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Nothing to derive: both quantities present, or neither.
    NotNeeded,
    /// `flow_kcfs` interpolated from `stage_ft`.
    FlowFromStage,
    /// `stage_ft` interpolated from the named flow column.
    StageFromFlow(&'static str),
    /// Derivation was needed but the rating curve is empty.
    MissingCurve,
}

/// Normalizes `raw_records` and derives the missing stage or flow column.
///
/// Raw values are authoritative: when both stage and a flow column survive
/// normalization nothing is interpolated.
pub fn preprocess(raw_records: &[RawRecord], field_map: &FieldMap, curve: &RatingCurve) -> NormalizedSeries {
    preprocess_with_derivation(raw_records, field_map, curve).0
}

pub fn preprocess_with_derivation(
    raw_records: &[RawRecord],
    field_map: &FieldMap,
    curve: &RatingCurve,
) -> (NormalizedSeries, Derivation) {
    if raw_records.is_empty() {
        logging::warn(Component::Stageflow, None, "raw stage/flow data is empty");
        return (NormalizedSeries::new(), Derivation::NotNeeded);
    }

    let series = normalize(raw_records, field_map);
    if series.is_empty() {
        logging::warn(Component::Stageflow, None, "normalized series is empty");
        return (series, Derivation::NotNeeded);
    }

    fill_missing(series, curve)
}

/// Adds the missing stage or flow column to an already-normalized series.
pub fn fill_missing(mut series: NormalizedSeries, curve: &RatingCurve) -> (NormalizedSeries, Derivation) {
    let flow_column = [FLOW_KCFS, FLOW_CFS].into_iter().find(|c| series.has_column(c));
    let has_stage = series.has_column(STAGE_FT);

    let (source, target, derivation) = match (has_stage, flow_column) {
        (true, None) => (STAGE_FT, FLOW_KCFS, Derivation::FlowFromStage),
        (false, Some(flow)) => (flow, STAGE_FT, Derivation::StageFromFlow(flow)),
        _ => return (series, Derivation::NotNeeded),
    };

    if curve.is_empty() {
        logging::warn(
            Component::Stageflow,
            None,
            &format!("{}; cannot derive {} from {}", CoreError::MissingCurve, target, source),
        );
        return (series, Derivation::MissingCurve);
    }

    let input = series.column(source).unwrap_or_default();
    let derived = if target == FLOW_KCFS {
        stage_to_flow(input, curve)
    } else {
        flow_to_stage(input, curve)
    };

    // A non-empty curve maps every finite input, so this only trips on a bug.
    match derived.into_iter().collect::<Option<Vec<f64>>>() {
        Some(values) if values.len() == series.len() => {
            series.insert_column(target, values);
            logging::debug(
                Component::Stageflow,
                None,
                &format!("interpolated {} from {} ({} rows)", target, source, series.len()),
            );
            (series, derivation)
        }
        _ => {
            logging::error(
                Component::Stageflow,
                None,
                &format!("interpolation of {} produced missing values; column not added", target),
            );
            (series, Derivation::NotNeeded)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalize::records_from_value;
    use serde_json::json;

    fn curve() -> RatingCurve {
        RatingCurve::from_pairs(&[(10.0, 5.0), (12.0, 15.0), (16.0, 55.0)])
    }

    fn stageflow_map() -> FieldMap {
        FieldMap::new(&[("primary", STAGE_FT), ("secondary", FLOW_KCFS)])
    }

    #[test]
    fn test_flow_is_derived_when_only_stage_present() {
        let raw = records_from_value(&json!([
            {"validTime": "2024-05-01T00:00:00Z", "primary": 12.0},
            {"validTime": "2024-05-01T06:00:00Z", "primary": 14.0},
        ]))
        .unwrap();
        let (series, derivation) = preprocess_with_derivation(&raw, &stageflow_map(), &curve());

        assert_eq!(derivation, Derivation::FlowFromStage);
        assert_eq!(series.column(FLOW_KCFS), Some(&[15.0, 35.0][..]));
    }

    #[test]
    fn test_stage_is_derived_from_cfs_flow() {
        let raw = records_from_value(&json!([
            {"validTime": "2024-05-01T00:00:00Z", "flow": 10.0},
        ]))
        .unwrap();
        let map = FieldMap::new(&[("flow", FLOW_CFS)]);
        let (series, derivation) = preprocess_with_derivation(&raw, &map, &curve());

        assert_eq!(derivation, Derivation::StageFromFlow(FLOW_CFS));
        assert_eq!(series.column(STAGE_FT), Some(&[11.0][..]));
    }

    #[test]
    fn test_raw_values_win_when_both_columns_present() {
        let raw = records_from_value(&json!([
            {"validTime": "2024-05-01T00:00:00Z", "primary": 12.0, "secondary": 99.0},
        ]))
        .unwrap();
        let (series, derivation) = preprocess_with_derivation(&raw, &stageflow_map(), &curve());

        assert_eq!(derivation, Derivation::NotNeeded);
        assert_eq!(series.column(FLOW_KCFS), Some(&[99.0][..]), "raw flow must not be overwritten");
    }

    #[test]
    fn test_empty_curve_leaves_series_untouched() {
        let raw = records_from_value(&json!([
            {"validTime": "2024-05-01T00:00:00Z", "primary": 12.0},
        ]))
        .unwrap();
        let (series, derivation) =
            preprocess_with_derivation(&raw, &stageflow_map(), &RatingCurve::default());

        assert_eq!(derivation, Derivation::MissingCurve);
        assert_eq!(series.len(), 1);
        assert!(!series.has_column(FLOW_KCFS));
    }

    #[test]
    fn test_empty_input_yields_empty_series() {
        assert!(preprocess(&[], &stageflow_map(), &curve()).is_empty());

        let all_sentinel = records_from_value(&json!([
            {"validTime": "0001-01-01T00:00:00Z", "primary": 12.0},
        ]))
        .unwrap();
        assert!(preprocess(&all_sentinel, &stageflow_map(), &curve()).is_empty());
    }
}
