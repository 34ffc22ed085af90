/// NWPS (National Water Prediction Service) API Client
///
/// Retrieves gauge metadata, observed/forecast stage and flow, rating curves
/// and National Water Model reach streamflow from the NOAA water API, and
/// adapts each payload into the plain `RawRecord` sequences the analysis
/// core consumes.
///
/// API Documentation: https://api.water.noaa.gov/nwps/v1/docs/
///
/// URL construction and payload parsing are free functions so they can be
/// exercised offline; `NwpsClient` only adds the blocking HTTP round trip.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::alert::thresholds::FloodThresholds;
use crate::analysis::rating::RatingCurve;
use crate::config::ProviderConfig;
use crate::logging::{self, Component};
use crate::model::{FLOW_CFS, FLOW_KCFS, FieldMap, ProviderError, RawRecord, STAGE_FT};

// ============================================================================
// NWPS API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GaugeResponse {
    lid: Option<String>,
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    reach_id: Option<Value>,
    usgs_id: Option<Value>,
    #[serde(default)]
    flood: Option<FloodBlock>,
}

#[derive(Debug, Deserialize)]
struct FloodBlock {
    #[serde(default)]
    categories: BTreeMap<String, FloodCategoryBlock>,
}

#[derive(Debug, Deserialize)]
struct FloodCategoryBlock {
    stage: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageflowBlock {
    issued_time: Option<String>,
    #[serde(default)]
    data: Option<Vec<RawRecord>>,
}

#[derive(Debug, Deserialize, Default)]
struct StageflowResponse {
    observed: Option<StageflowBlock>,
    forecast: Option<StageflowBlock>,
}

#[derive(Debug, Deserialize)]
struct RatingsResponse {
    #[serde(default)]
    data: Option<Vec<RawRecord>>,
}

#[derive(Debug, Deserialize)]
struct GaugeListResponse {
    #[serde(default)]
    gauges: Vec<GaugeListEntry>,
}

#[derive(Debug, Deserialize)]
struct GaugeListEntry {
    lid: Option<String>,
    name: Option<String>,
}

// ============================================================================
// Adapted Types
// ============================================================================

/// Descriptive metadata for one NWS gauge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GaugeMetadata {
    pub lid: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reach_id: Option<String>,
    pub usgs_id: Option<String>,
    pub thresholds: FloodThresholds,
}

/// Observed and forecast stage/flow records for a gauge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageflowPayload {
    pub observed: Vec<RawRecord>,
    pub forecast: Vec<RawRecord>,
    /// Raw `forecast.issuedTime`, if any.
    pub forecast_issued: Option<String>,
}

/// Entry in the gauge catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeSummary {
    pub lid: String,
    pub name: String,
}

/// National Water Model products published per reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NwmModel {
    AnalysisAssimilation,
    ShortRange,
    MediumRange,
    MediumRangeBlend,
}

impl NwmModel {
    pub const ALL: [NwmModel; 4] = [
        NwmModel::AnalysisAssimilation,
        NwmModel::ShortRange,
        NwmModel::MediumRange,
        NwmModel::MediumRangeBlend,
    ];

    /// Key of the model block in the streamflow payload.
    pub fn key(self) -> &'static str {
        match self {
            NwmModel::AnalysisAssimilation => "analysisAssimilation",
            NwmModel::ShortRange => "shortRange",
            NwmModel::MediumRange => "mediumRange",
            NwmModel::MediumRangeBlend => "mediumRangeBlend",
        }
    }

    /// Key of the series inside the model block; medium range publishes
    /// members plus a `mean`, which is what gets drawn.
    pub fn series_key(self) -> &'static str {
        match self {
            NwmModel::MediumRange => "mean",
            _ => "series",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NwmModel::AnalysisAssimilation => "NWM Analysis",
            NwmModel::ShortRange => "NWM Short Range",
            NwmModel::MediumRange => "NWM Medium Range (mean)",
            NwmModel::MediumRangeBlend => "NWM Medium Range Blend",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for NwmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One model's streamflow run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelRun {
    pub reference_time: Option<String>,
    pub records: Vec<RawRecord>,
    /// Raw field carrying flow (`flow`, `primary` or `value`), if found.
    pub flow_field: Option<String>,
}

impl ModelRun {
    /// Rename table mapping this run's flow field to `flow_cfs`.
    pub fn field_map(&self) -> Option<FieldMap> {
        self.flow_field
            .as_deref()
            .map(|field| FieldMap::new(&[(field, FLOW_CFS)]))
    }
}

/// NWM streamflow for a reach, by model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReachStreamflow {
    pub runs: BTreeMap<NwmModel, ModelRun>,
}

impl ReachStreamflow {
    pub fn get(&self, model: NwmModel) -> Option<&ModelRun> {
        self.runs.get(&model)
    }

    /// True when at least one model has records.
    pub fn has_data(&self) -> bool {
        self.runs.values().any(|run| !run.records.is_empty())
    }
}

/// Field map for NWPS observed/forecast records.
pub fn stageflow_field_map() -> FieldMap {
    FieldMap::new(&[("primary", STAGE_FT), ("secondary", FLOW_KCFS)])
}

// ============================================================================
// URL Construction
// ============================================================================

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

pub fn gauge_list_url(gauge_base: &str) -> String {
    gauge_base.trim_end_matches('/').to_string()
}

pub fn metadata_url(gauge_base: &str, gauge_id: &str) -> String {
    join(gauge_base, gauge_id)
}

pub fn stageflow_url(gauge_base: &str, gauge_id: &str) -> String {
    join(gauge_base, &format!("{}/stageflow", gauge_id))
}

pub fn ratings_url(gauge_base: &str, gauge_id: &str) -> String {
    join(gauge_base, &format!("{}/ratings?onlyTenths=false", gauge_id))
}

pub fn reach_streamflow_url(reach_base: &str, reach_id: &str) -> String {
    join(reach_base, &format!("{}/streamflow", reach_id))
}

// ============================================================================
// Payload Parsing
// ============================================================================

/// Identifier fields arrive as either strings or numbers.
fn id_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_metadata(body: &str) -> Result<GaugeMetadata, ProviderError> {
    let gauge: GaugeResponse = serde_json::from_str(body)?;

    let mut thresholds = FloodThresholds::new();
    if let Some(flood) = gauge.flood {
        for (name, category) in flood.categories {
            // NWPS reports undefined categories as missing or zero stage.
            match category.stage {
                Some(stage) if stage != 0.0 => thresholds.insert(&name, stage),
                _ => {}
            }
        }
    }

    Ok(GaugeMetadata {
        lid: gauge.lid.unwrap_or_default(),
        name: gauge.name.unwrap_or_default(),
        latitude: gauge.latitude,
        longitude: gauge.longitude,
        reach_id: id_text(gauge.reach_id),
        usgs_id: id_text(gauge.usgs_id),
        thresholds,
    })
}

pub fn parse_stageflow(body: &str) -> Result<StageflowPayload, ProviderError> {
    // A gauge with neither block answers with `null` pieces; treat as empty.
    let response: StageflowResponse = serde_json::from_str(body)?;
    let (observed, _) = split_block(response.observed);
    let (forecast, forecast_issued) = split_block(response.forecast);
    Ok(StageflowPayload {
        observed,
        forecast,
        forecast_issued,
    })
}

fn split_block(block: Option<StageflowBlock>) -> (Vec<RawRecord>, Option<String>) {
    match block {
        Some(block) => (block.data.unwrap_or_default(), block.issued_time),
        None => (Vec::new(), None),
    }
}

/// Rating curve from `{data: [{stage, flow}, ...]}`. A curve whose records lack
/// either field is returned empty.
pub fn parse_ratings(body: &str) -> Result<RatingCurve, ProviderError> {
    let response: RatingsResponse = serde_json::from_str(body)?;
    Ok(RatingCurve::from_records(&response.data.unwrap_or_default()))
}

/// Streamflow per model. Models that are absent or malformed are skipped.
pub fn parse_reach_streamflow(body: &str) -> Result<ReachStreamflow, ProviderError> {
    let payload: Value = serde_json::from_str(body)?;
    let Some(object) = payload.as_object() else {
        return Err(ProviderError::ParseError(
            "reach streamflow payload is not an object".to_string(),
        ));
    };

    let mut runs = BTreeMap::new();
    for model in NwmModel::ALL {
        let Some(series) = object
            .get(model.key())
            .and_then(|block| block.get(model.series_key()))
            .and_then(Value::as_object)
        else {
            continue;
        };

        let records: Vec<RawRecord> = series
            .get("data")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|i| i.as_object().cloned()).collect())
            .unwrap_or_default();

        let flow_field = records.first().and_then(|first| {
            ["flow", "primary", "value"]
                .into_iter()
                .find(|key| first.contains_key(*key))
                .map(str::to_string)
        });

        runs.insert(
            model,
            ModelRun {
                reference_time: series
                    .get("referenceTime")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                records,
                flow_field,
            },
        );
    }

    Ok(ReachStreamflow { runs })
}

/// Gauge catalogue, entries with both `lid` and `name`, sorted by `lid`.
pub fn parse_gauge_list(body: &str) -> Result<Vec<GaugeSummary>, ProviderError> {
    let response: GaugeListResponse = serde_json::from_str(body)?;
    let mut gauges: Vec<GaugeSummary> = response
        .gauges
        .into_iter()
        .filter_map(|g| match (g.lid, g.name) {
            (Some(lid), Some(name)) if !lid.is_empty() && !name.is_empty() => {
                Some(GaugeSummary { lid, name })
            }
            _ => None,
        })
        .collect();
    gauges.sort_by(|a, b| a.lid.cmp(&b.lid));
    Ok(gauges)
}

// ============================================================================
// API Client
// ============================================================================

/// Shared blocking HTTP plumbing for the NOAA clients.
pub(crate) fn build_http_client(
    user_agent: &str,
    timeout: Duration,
) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))
}

/// GET `url` and return the body, mapping non-2xx statuses to `HttpError`.
pub(crate) fn get_text(client: &reqwest::blocking::Client, url: &str) -> Result<String, ProviderError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::HttpError(status.as_u16()));
    }
    Ok(response.text()?)
}

pub struct NwpsClient {
    client: reqwest::blocking::Client,
    gauge_base_url: String,
    reach_base_url: String,
}

impl NwpsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(
                &config.user_agent,
                Duration::from_secs(config.request_timeout_secs),
            )?,
            gauge_base_url: config.gauge_base_url.clone(),
            reach_base_url: config.reach_base_url.clone(),
        })
    }

    pub fn list_gauges(&self) -> Result<Vec<GaugeSummary>, ProviderError> {
        let body = get_text(&self.client, &gauge_list_url(&self.gauge_base_url))?;
        parse_gauge_list(&body)
    }

    pub fn fetch_metadata(&self, gauge_id: &str) -> Result<GaugeMetadata, ProviderError> {
        let body = get_text(&self.client, &metadata_url(&self.gauge_base_url, gauge_id))?;
        parse_metadata(&body)
    }

    pub fn fetch_stageflow(&self, gauge_id: &str) -> Result<StageflowPayload, ProviderError> {
        let body = get_text(&self.client, &stageflow_url(&self.gauge_base_url, gauge_id))?;
        parse_stageflow(&body)
    }

    pub fn fetch_ratings(&self, gauge_id: &str) -> Result<RatingCurve, ProviderError> {
        let body = get_text(&self.client, &ratings_url(&self.gauge_base_url, gauge_id))?;
        parse_ratings(&body)
    }

    /// NWM streamflow for a reach. Failures degrade to "no model data".
    pub fn fetch_reach_streamflow(&self, reach_id: &str) -> ReachStreamflow {
        let result = get_text(&self.client, &reach_streamflow_url(&self.reach_base_url, reach_id))
            .and_then(|body| parse_reach_streamflow(&body));
        match result {
            Ok(streamflow) => streamflow,
            Err(e) => {
                logging::warn(
                    Component::Nwps,
                    None,
                    &format!("could not fetch NWM streamflow for reach {}: {}", reach_id, e),
                );
                ReachStreamflow::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
