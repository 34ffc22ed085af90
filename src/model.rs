/// RawRecord, FieldMap, Series, NormalizedSeries, EnsembleTable, CoreError, ProviderError
/// core data structures and error handling
///
/// Core data types for the hydrograph normalization and flood-risk engine.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O: only types, column names, and small accessors that
/// keep the table invariants (unique, strictly increasing time index).

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Canonical column names and sentinels
// ---------------------------------------------------------------------------

/// Canonical time field. Raw payloads either carry it directly or provide a
/// `date` + `time` pair that is joined with a single space.
pub const VALID_TIME: &str = "validTime";

/// Raw field names used by ensemble member payloads.
pub const DATE_FIELD: &str = "date";
pub const TIME_FIELD: &str = "time";

/// River stage, in feet.
pub const STAGE_FT: &str = "stage_ft";

/// Flow in thousands of cubic feet per second (NWPS observed/forecast, HEFS).
pub const FLOW_KCFS: &str = "flow_kcfs";

/// Flow in cubic feet per second (NWM model streamflow).
pub const FLOW_CFS: &str = "flow_cfs";

/// Literal time value providers use for "no valid time". Rows carrying it are
/// dropped before timestamp parsing.
pub const INVALID_TIME_SENTINEL: &str = "0001-01-01T00:00:00Z";

/// Numeric value providers use for "no data".
pub const MISSING_VALUE_SENTINEL: f64 = -999.0;

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One timestamped observation as delivered by a provider: field name → JSON value.
pub type RawRecord = serde_json::Map<String, Value>;

/// Caller-supplied rename table, raw field name → canonical column name.
///
/// Fields not named in the map keep their raw name. Only fields whose
/// (renamed) name is one of the map's targets are retained as columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMap {
    pairs: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
                .collect(),
        }
    }

    /// The canonical name for a raw field (identity when unmapped).
    pub fn canonical<'a>(&'a self, raw: &'a str) -> &'a str {
        self.pairs
            .iter()
            .find(|(r, _)| r == raw)
            .map(|(_, c)| c.as_str())
            .unwrap_or(raw)
    }

    /// True if `name` is one of the canonical columns this map produces.
    pub fn is_target(&self, name: &str) -> bool {
        self.pairs.iter().any(|(_, c)| c == name)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, c)| c.as_str())
    }
}

// ---------------------------------------------------------------------------
// Series types
// ---------------------------------------------------------------------------

/// A single time-indexed series whose cells may be missing.
///
/// Used for ensemble members, percentile bands, and single columns pulled out
/// of a `NormalizedSeries`. The index is unique and strictly increasing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    index: Vec<DateTime<Utc>>,
    values: Vec<Option<f64>>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from unordered points. Points are sorted by time; when
    /// a timestamp repeats, the last point supplied for it wins.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, Option<f64>)>,
    {
        let mut points: Vec<_> = points.into_iter().collect();
        points.sort_by_key(|(t, _)| *t);

        let mut index: Vec<DateTime<Utc>> = Vec::with_capacity(points.len());
        let mut values: Vec<Option<f64>> = Vec::with_capacity(points.len());
        for (t, v) in points {
            let v = v.filter(|x| x.is_finite());
            if index.last() == Some(&t) {
                if let Some(last) = values.last_mut() {
                    *last = v;
                }
            } else {
                index.push(t);
                values.push(v);
            }
        }
        Self { index, values }
    }

    /// Caller guarantees equal lengths and a strictly increasing index.
    pub(crate) fn from_parts(index: Vec<DateTime<Utc>>, values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(index.len(), values.len());
        Self { index, values }
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of cells holding a value.
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, Option<f64>)> + '_ {
        self.index.iter().copied().zip(self.values.iter().copied())
    }

    /// Value at exactly `t`, if that timestamp is present and defined.
    pub fn get(&self, t: DateTime<Utc>) -> Option<f64> {
        self.index
            .binary_search(&t)
            .ok()
            .and_then(|i| self.values[i])
    }
}

/// A cleaned, time-indexed table of named numeric columns.
///
/// Invariants: timestamps are unique and strictly increasing, every column
/// has one finite value per timestamp (no missing cells).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedSeries {
    index: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl NormalizedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from already-clean columns, checking the invariants.
    pub fn from_columns(
        index: Vec<DateTime<Utc>>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, CoreError> {
        if index.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::MalformedInput(
                "time index must be strictly increasing".to_string(),
            ));
        }
        let mut table = BTreeMap::new();
        for (name, values) in columns {
            if values.len() != index.len() {
                return Err(CoreError::MalformedInput(format!(
                    "column '{}' has {} values for {} timestamps",
                    name,
                    values.len(),
                    index.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(CoreError::MalformedInput(format!(
                    "column '{}' contains a missing value",
                    name
                )));
            }
            table.insert(name, values);
        }
        Ok(Self { index, columns: table })
    }

    /// Caller guarantees the invariants (used by the normalizer after cleaning).
    pub(crate) fn from_parts(
        index: Vec<DateTime<Utc>>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Self {
        Self { index, columns }
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.index.first().copied()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.index.last().copied()
    }

    /// One column as a standalone `Series`.
    pub fn series(&self, name: &str) -> Option<Series> {
        self.columns.get(name).map(|values| {
            Series::from_parts(self.index.clone(), values.iter().map(|v| Some(*v)).collect())
        })
    }

    /// Adds or replaces a column. Length must match the index.
    pub(crate) fn insert_column(&mut self, name: &str, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.index.len());
        self.columns.insert(name.to_string(), values);
    }

    /// Serializes back to provider-shaped records (`validTime` + one field per column).
    pub fn to_records(&self) -> Vec<RawRecord> {
        self.index
            .iter()
            .enumerate()
            .map(|(row, t)| {
                let mut record = RawRecord::new();
                record.insert(
                    VALID_TIME.to_string(),
                    Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                );
                for (name, values) in &self.columns {
                    let value = Number::from_f64(values[row]).map(Value::Number).unwrap_or(Value::Null);
                    record.insert(name.clone(), value);
                }
                record
            })
            .collect()
    }
}

/// Wide ensemble table: one column per member id, aligned on the union of
/// all member timestamps. Cells a member does not cover are `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnsembleTable {
    index: Vec<DateTime<Utc>>,
    members: BTreeMap<String, Vec<Option<f64>>>,
}

impl EnsembleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caller guarantees a strictly increasing index and equal column lengths.
    pub(crate) fn from_parts(
        index: Vec<DateTime<Utc>>,
        members: BTreeMap<String, Vec<Option<f64>>>,
    ) -> Self {
        Self { index, members }
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when there are no rows or no members.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|k| k.as_str())
    }

    pub fn member(&self, id: &str) -> Option<&[Option<f64>]> {
        self.members.get(id).map(|v| v.as_slice())
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.members.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.index.first().copied()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.index.last().copied()
    }

    /// Row range whose timestamps fall inside `[start, end]` (inclusive).
    /// An inverted window yields an empty range.
    pub fn window_rows(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::ops::Range<usize> {
        let lo = self.index.partition_point(|t| *t < start);
        let hi = self.index.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Conditions the transformation core reports as diagnostics.
///
/// Core functions never return these as `Err`: each condition is converted to
/// data (an empty table, `None` cells, zero probabilities) and the variant is
/// carried alongside for the caller to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Input is not the expected shape (not a sequence, missing required fields).
    MalformedInput(String),
    /// A time value could not be parsed; the row was dropped.
    UnparsableTimestamp(String),
    /// Rating curve absent or incomplete.
    MissingCurve,
    /// Some ensemble members could not be fetched or normalized.
    PartialEnsembleFailure { failed: usize, total: usize },
    /// Nothing to compute.
    EmptyResult(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            CoreError::UnparsableTimestamp(raw) => write!(f, "Unparsable timestamp: {}", raw),
            CoreError::MissingCurve => write!(f, "Rating curve missing or incomplete"),
            CoreError::PartialEnsembleFailure { failed, total } => {
                write!(f, "Ensemble partially failed: {}/{} members unavailable", failed, total)
            }
            CoreError::EmptyResult(what) => write!(f, "No data: {}", what),
        }
    }
}

impl std::error::Error for CoreError {}

/// Errors that can arise when fetching or decoding provider payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Non-2xx HTTP response from the provider.
    HttpError(u16),
    /// The request could not be sent or timed out.
    RequestFailed(String),
    /// The response body could not be deserialized.
    ParseError(String),
    /// The payload was well-formed but carried nothing usable.
    NoDataAvailable(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::HttpError(code) => write!(f, "HTTP error: {}", code),
            ProviderError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            ProviderError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ProviderError::NoDataAvailable(what) => write!(f, "No data available for {}", what),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ProviderError::HttpError(status.as_u16()),
            None => ProviderError::RequestFailed(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
