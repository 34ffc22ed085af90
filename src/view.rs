//! Per-gauge orchestration.
//!
//! `load_gauge_view` pulls everything the renderer needs for one gauge out of
//! a provider, runs it through the analysis core and returns a plain
//! `GaugeView`. Derived tables go through the session cache; nothing else
//! is retained between calls.

use chrono::{DateTime, Datelike, Utc};

use crate::alert::thresholds::{FloodAlert, FloodThresholds, check_flood_stage};
use crate::analysis::exceedance::{RiskTable, risk_table};
use crate::analysis::normalize::parse_timestamp;
use crate::analysis::percentiles::{PercentileBandSet, compute_and_project};
use crate::analysis::rating::RatingCurve;
use crate::analysis::stageflow::preprocess;
use crate::config::{Config, EnsembleConfig};
use crate::ingest::hefs::{EnsembleFetch, fetch_latest_ensemble};
use crate::ingest::nwps::{GaugeMetadata, NwmModel, ReachStreamflow, stageflow_field_map};
use crate::ingest::{EnsembleSource, GaugeDataSource};
use crate::logging::{self, Component};
use crate::model::{CoreError, FLOW_CFS, INVALID_TIME_SENTINEL, NormalizedSeries, ProviderError, STAGE_FT};
use crate::session::SessionCache;

/// Earliest year a provider timestamp is taken at face value. Older values
/// are placeholder dates.
const MIN_ISSUED_YEAR: i32 = 1677;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewOptions {
    /// Drop cached tables for the gauge before loading.
    pub bypass: bool,
    pub include_ensemble: bool,
    pub short_term_days: i64,
    pub ensemble: EnsembleConfig,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            bypass: false,
            include_ensemble: false,
            short_term_days: 3,
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl ViewOptions {
    pub fn from_config(config: &Config, bypass: bool, include_ensemble: bool) -> Self {
        Self {
            bypass,
            include_ensemble,
            short_term_days: config.risk.short_term_days,
            ensemble: config.ensemble.clone(),
        }
    }
}

/// Official forecast series and the time it was issued.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastSeries {
    pub series: NormalizedSeries,
    pub issued: Option<DateTime<Utc>>,
}

/// One NWM model run converted to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSeries {
    pub model: NwmModel,
    pub reference_time: Option<DateTime<Utc>>,
    pub series: NormalizedSeries,
}

/// Highest stage in a model run.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPeak {
    pub model: NwmModel,
    pub reference_time: Option<DateTime<Utc>>,
    pub peak_time: DateTime<Utc>,
    pub stage: f64,
    pub flow: Option<f64>,
}

/// Latest HEFS run with its derived products.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleView {
    pub fetch: EnsembleFetch,
    /// Percentile bands in stage space.
    pub bands: PercentileBandSet,
    pub risk: Option<RiskTable>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeView {
    pub gauge_id: String,
    pub metadata: GaugeMetadata,
    pub rating: RatingCurve,
    pub observed: NormalizedSeries,
    pub forecast: ForecastSeries,
    pub models: Vec<ModelSeries>,
    pub peaks: Vec<ForecastPeak>,
    pub latest_observation: Option<DateTime<Utc>>,
    pub latest_stage: Option<f64>,
    pub current_alert: Option<FloodAlert>,
    pub ensemble: Option<EnsembleView>,
    /// Conditions worth surfacing alongside the data.
    pub diagnostics: Vec<CoreError>,
}

impl GaugeView {
    /// False when observed, forecast and model data are all empty.
    pub fn has_any_data(&self) -> bool {
        !self.observed.is_empty()
            || !self.forecast.series.is_empty()
            || self.models.iter().any(|m| !m.series.is_empty())
    }

    pub fn thresholds(&self) -> &FloodThresholds {
        &self.metadata.thresholds
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Forecast `issuedTime`, or `None` for the sentinel, garbage or placeholder years.
pub fn parse_issued_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.trim() == INVALID_TIME_SENTINEL {
        return None;
    }
    parse_timestamp(raw).filter(|t| t.year() >= MIN_ISSUED_YEAR)
}

/// The first timestamp of maximum stage in a model run.
pub fn forecast_peak(run: &ModelSeries) -> Option<ForecastPeak> {
    let stages = run.series.column(STAGE_FT)?;
    let (row, stage) = stages
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (row, s)| match best {
            Some((_, top)) if top >= s => best,
            _ => Some((row, s)),
        })?;

    Some(ForecastPeak {
        model: run.model,
        reference_time: run.reference_time,
        peak_time: *run.series.index().get(row)?,
        stage,
        flow: run
            .series
            .column(FLOW_CFS)
            .and_then(|flows| flows.get(row).copied())
            .filter(|f| f.is_finite()),
    })
}

/// Stage-space series for every model that returned data.
pub fn model_series(streamflow: &ReachStreamflow, rating: &RatingCurve) -> Vec<ModelSeries> {
    streamflow
        .runs
        .iter()
        .filter_map(|(model, run)| {
            let field_map = run.field_map()?;
            let series = preprocess(&run.records, &field_map, rating);
            if series.is_empty() {
                return None;
            }
            Some(ModelSeries {
                model: *model,
                reference_time: run.reference_time.as_deref().and_then(parse_timestamp),
                series,
            })
        })
        .collect()
}

fn latest_stage(observed: &NormalizedSeries) -> Option<f64> {
    observed
        .column(STAGE_FT)?
        .iter()
        .rev()
        .copied()
        .find(|s| s.is_finite())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads and derives everything shown for `gauge_id`.
///
/// Metadata and stage/flow failures are returned as errors. A missing rating
/// curve, NWM data or HEFS run only thins out the view.
pub fn load_gauge_view<S>(
    source: &S,
    cache: &mut SessionCache,
    gauge_id: &str,
    options: &ViewOptions,
    now: DateTime<Utc>,
) -> Result<GaugeView, ProviderError>
where
    S: GaugeDataSource + EnsembleSource + ?Sized,
{
    cache.begin(gauge_id, options.bypass);
    logging::info(Component::System, Some(gauge_id), "loading gauge view");
    let mut diagnostics = Vec::new();

    let metadata = source.fetch_metadata(gauge_id).inspect_err(|e| {
        logging::log_provider_failure(Component::Nwps, gauge_id, "metadata fetch", e);
    })?;

    let rating = match source.fetch_ratings(gauge_id) {
        Ok(curve) => curve,
        Err(e) => {
            logging::log_provider_failure(Component::Nwps, gauge_id, "ratings fetch", &e);
            RatingCurve::default()
        }
    };
    if rating.is_empty() {
        diagnostics.push(CoreError::MissingCurve);
    }

    let cached = (
        cache.observed.get(gauge_id, now).cloned(),
        cache.forecast.get(gauge_id, now).cloned(),
    );
    let (observed, forecast) = match cached {
        (Some(observed), Some(forecast)) => {
            logging::debug(Component::Cache, Some(gauge_id), "stage/flow served from cache");
            (observed, forecast)
        }
        _ => {
            let payload = source.fetch_stageflow(gauge_id).inspect_err(|e| {
                logging::log_provider_failure(Component::Nwps, gauge_id, "stageflow fetch", e);
            })?;
            let field_map = stageflow_field_map();
            let observed = preprocess(&payload.observed, &field_map, &rating);
            let forecast = ForecastSeries {
                series: preprocess(&payload.forecast, &field_map, &rating),
                issued: payload.forecast_issued.as_deref().and_then(parse_issued_time),
            };
            // Tables derived without a curve are not kept past this load.
            if !rating.is_empty() {
                cache.observed.insert(gauge_id, observed.clone(), now);
                cache.forecast.insert(gauge_id, forecast.clone(), now);
            }
            (observed, forecast)
        }
    };

    let models = match metadata.reach_id.as_deref() {
        Some(reach_id) => model_series(&source.fetch_reach_streamflow(reach_id), &rating),
        None => {
            logging::debug(Component::Nwps, Some(gauge_id), "gauge has no NWM reach");
            Vec::new()
        }
    };
    let peaks: Vec<ForecastPeak> = models.iter().filter_map(forecast_peak).collect();

    let latest_stage = latest_stage(&observed);
    let current_alert = latest_stage.and_then(|stage| check_flood_stage(stage, &metadata.thresholds));
    if let Some(alert) = &current_alert {
        logging::warn(Component::System, Some(gauge_id), &alert.message);
    }

    let ensemble = if options.include_ensemble {
        load_ensemble(source, cache, gauge_id, &metadata.thresholds, &rating, options, now)
    } else {
        None
    };
    if let Some(diagnostic) = ensemble.as_ref().and_then(|e| e.fetch.merged.diagnostic()) {
        diagnostics.push(diagnostic);
    }

    let view = GaugeView {
        gauge_id: gauge_id.to_string(),
        latest_observation: observed.last_time(),
        metadata,
        rating,
        observed,
        forecast,
        models,
        peaks,
        latest_stage,
        current_alert,
        ensemble,
        diagnostics,
    };
    if !view.has_any_data() {
        logging::warn(Component::System, Some(gauge_id), "no data available for this location");
    }
    Ok(view)
}

fn load_ensemble<S>(
    source: &S,
    cache: &mut SessionCache,
    gauge_id: &str,
    thresholds: &FloodThresholds,
    rating: &RatingCurve,
    options: &ViewOptions,
    now: DateTime<Utc>,
) -> Option<EnsembleView>
where
    S: EnsembleSource + ?Sized,
{
    let fetch = match cache.ensemble.get(gauge_id, now).cloned() {
        Some(fetch) => fetch,
        None => match fetch_latest_ensemble(source, gauge_id, &options.ensemble, None) {
            Ok(Some(fetch)) => {
                cache.ensemble.insert(gauge_id, fetch.clone(), now);
                fetch
            }
            Ok(None) => return None,
            Err(e) => {
                logging::log_provider_failure(Component::Hefs, gauge_id, "header fetch", &e);
                return None;
            }
        },
    };

    if let Some(diagnostic) = fetch.merged.diagnostic() {
        logging::warn(Component::Ensemble, Some(gauge_id), &diagnostic.to_string());
    }

    // Bands and risk must come from the same curve, so a load without one
    // neither reads nor fills the percentile slot.
    let bands = if rating.is_empty() {
        compute_and_project(&fetch.merged.table, rating)
    } else {
        cache
            .percentiles
            .get_or_insert_with(gauge_id, now, || compute_and_project(&fetch.merged.table, rating))
            .clone()
    };
    let risk = risk_table(&fetch.merged.table, rating, thresholds, options.short_term_days);

    Some(EnsembleView { fetch, bands, risk })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    fn run(stages: &[f64], flows: &[f64]) -> ModelSeries {
        let index = (0..stages.len() as u32).map(hour).collect();
        ModelSeries {
            model: NwmModel::ShortRange,
            reference_time: Some(hour(0)),
            series: NormalizedSeries::from_columns(
                index,
                vec![
                    (STAGE_FT.to_string(), stages.to_vec()),
                    (FLOW_CFS.to_string(), flows.to_vec()),
                ],
            )
            .expect("valid columns"),
        }
    }

    // --- Issued time --------------------------------------------------------

    #[test]
    fn test_issued_time_rejects_sentinel_and_placeholder_years() {
        assert_eq!(parse_issued_time(INVALID_TIME_SENTINEL), None);
        assert_eq!(parse_issued_time("not a time"), None);
        assert_eq!(parse_issued_time("1600-01-01T00:00:00Z"), None);
        assert_eq!(parse_issued_time("2024-05-01T03:00:00Z"), Some(hour(3)));
    }

    // --- Peaks --------------------------------------------------------------

    #[test]
    fn test_forecast_peak_takes_first_maximum() {
        let peak = forecast_peak(&run(&[10.0, 14.5, 14.5, 12.0], &[100.0, 300.0, 310.0, 200.0]))
            .expect("peak exists");
        assert_eq!(peak.peak_time, hour(1), "ties resolve to the earliest time");
        assert_eq!(peak.stage, 14.5);
        assert_eq!(peak.flow, Some(300.0));
        assert_eq!(peak.reference_time, Some(hour(0)));
    }

    #[test]
    fn test_forecast_peak_needs_stage() {
        let empty = ModelSeries {
            model: NwmModel::MediumRange,
            reference_time: None,
            series: NormalizedSeries::new(),
        };
        assert_eq!(forecast_peak(&empty), None);
    }

    #[test]
    fn test_latest_stage_is_last_row() {
        let series = run(&[10.0, 11.0, 12.5], &[1.0, 2.0, 3.0]).series;
        assert_eq!(latest_stage(&series), Some(12.5));
        assert_eq!(latest_stage(&NormalizedSeries::new()), None);
    }
}
