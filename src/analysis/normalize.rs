//! Raw provider records → cleaned, time-indexed `NormalizedSeries`.
//!
//! Cleaning is strict: a row is dropped when its time is the invalid-time
//! sentinel, when its time cannot be parsed, or when any retained column is
//! missing (absent, non-numeric, or the `-999` sentinel). Nothing is coerced
//! or defaulted. Every failure degrades to an empty series plus a diagnostic
//! in the `NormalizeReport`; nothing here returns `Err`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::logging::{self, Component};
use crate::model::{
    CoreError, DATE_FIELD, FieldMap, INVALID_TIME_SENTINEL, MISSING_VALUE_SENTINEL,
    NormalizedSeries, RawRecord, TIME_FIELD, VALID_TIME,
};

/// Offset-aware layouts tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Naive layouts, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Row accounting for one normalization pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizeReport {
    pub total_records: usize,
    pub sentinel_time_rows: usize,
    pub unparsable_time_rows: usize,
    pub incomplete_rows: usize,
    pub duplicate_time_rows: usize,
    pub kept_rows: usize,
    /// Why the result is empty or lossy, if it is.
    pub diagnostic: Option<CoreError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeSource {
    ValidTime,
    DateAndTime,
}

/// Normalizes `records`, renaming fields per `field_map`.
pub fn normalize(records: &[RawRecord], field_map: &FieldMap) -> NormalizedSeries {
    normalize_with_report(records, field_map).0
}

/// Normalizes an untyped payload that should be a sequence of mappings.
/// Any other shape yields an empty series.
pub fn normalize_value(payload: &Value, field_map: &FieldMap) -> NormalizedSeries {
    match records_from_value(payload) {
        Ok(records) => normalize(&records, field_map),
        Err(e) => {
            logging::warn(Component::Normalizer, None, &e.to_string());
            NormalizedSeries::new()
        }
    }
}

/// Checks that `payload` is an array of JSON objects and clones them out.
pub fn records_from_value(payload: &Value) -> Result<Vec<RawRecord>, CoreError> {
    let items = payload
        .as_array()
        .ok_or_else(|| CoreError::MalformedInput("timeseries payload is not a sequence".to_string()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object().cloned().ok_or_else(|| {
                CoreError::MalformedInput(format!("record {} is not a mapping", i))
            })
        })
        .collect()
}

/// Normalizes `records` and reports what was dropped and why.
pub fn normalize_with_report(
    records: &[RawRecord],
    field_map: &FieldMap,
) -> (NormalizedSeries, NormalizeReport) {
    let mut report = NormalizeReport {
        total_records: records.len(),
        ..NormalizeReport::default()
    };

    if records.is_empty() {
        report.diagnostic = Some(CoreError::EmptyResult("no records supplied".to_string()));
        logging::warn(Component::Normalizer, None, "input records are empty");
        return (NormalizedSeries::new(), report);
    }

    // Rename once per record: canonical name → raw value.
    let renamed: Vec<BTreeMap<&str, &Value>> = records
        .iter()
        .map(|record| {
            let mut fields = BTreeMap::new();
            for (raw, value) in record {
                fields.entry(field_map.canonical(raw)).or_insert(value);
            }
            fields
        })
        .collect();

    let time_source = if renamed.iter().any(|r| r.contains_key(VALID_TIME)) {
        TimeSource::ValidTime
    } else if renamed
        .iter()
        .any(|r| r.contains_key(DATE_FIELD) && r.contains_key(TIME_FIELD))
    {
        TimeSource::DateAndTime
    } else {
        report.diagnostic = Some(CoreError::MalformedInput(format!(
            "missing '{}' (or '{}' + '{}') in timeseries data",
            VALID_TIME, DATE_FIELD, TIME_FIELD
        )));
        logging::warn(Component::Normalizer, None, "missing validTime in timeseries data");
        return (NormalizedSeries::new(), report);
    };

    let columns: BTreeSet<&str> = renamed
        .iter()
        .flat_map(|r| r.keys().copied())
        .filter(|name| {
            field_map.is_target(name)
                && *name != VALID_TIME
                && *name != DATE_FIELD
                && *name != TIME_FIELD
        })
        .collect();

    let mut rows: Vec<(DateTime<Utc>, Vec<f64>)> = Vec::with_capacity(renamed.len());
    let mut first_bad_time: Option<String> = None;

    for fields in &renamed {
        let Some(time_text) = raw_time(fields, time_source) else {
            report.unparsable_time_rows += 1;
            first_bad_time.get_or_insert_with(|| "<missing>".to_string());
            continue;
        };

        if time_text == INVALID_TIME_SENTINEL {
            report.sentinel_time_rows += 1;
            continue;
        }

        let Some(time) = parse_timestamp(&time_text) else {
            report.unparsable_time_rows += 1;
            first_bad_time.get_or_insert(time_text);
            continue;
        };

        let values: Option<Vec<f64>> = columns
            .iter()
            .map(|name| fields.get(name).and_then(|v| numeric_value(v)))
            .collect();

        match values {
            Some(values) => rows.push((time, values)),
            None => report.incomplete_rows += 1,
        }
    }

    // Stable sort keeps payload order among equal timestamps; first one wins.
    rows.sort_by_key(|(t, _)| *t);
    let before_dedup = rows.len();
    rows.dedup_by_key(|(t, _)| *t);
    report.duplicate_time_rows = before_dedup - rows.len();
    report.kept_rows = rows.len();

    let mut index = Vec::with_capacity(rows.len());
    let mut table: BTreeMap<String, Vec<f64>> = columns
        .iter()
        .map(|name| (name.to_string(), Vec::with_capacity(rows.len())))
        .collect();

    for (time, values) in rows {
        index.push(time);
        for (name, value) in columns.iter().zip(values) {
            if let Some(column) = table.get_mut(*name) {
                column.push(value);
            }
        }
    }

    if index.is_empty() {
        report.diagnostic = Some(CoreError::EmptyResult(
            "every row was dropped during cleaning".to_string(),
        ));
        logging::warn(Component::Normalizer, None, "no rows survived cleaning");
        return (NormalizedSeries::new(), report);
    }

    if let Some(raw) = first_bad_time {
        report.diagnostic = Some(CoreError::UnparsableTimestamp(raw));
    }

    logging::debug(
        Component::Normalizer,
        None,
        &format!(
            "kept {}/{} rows ({} sentinel, {} bad time, {} incomplete, {} duplicate)",
            report.kept_rows,
            report.total_records,
            report.sentinel_time_rows,
            report.unparsable_time_rows,
            report.incomplete_rows,
            report.duplicate_time_rows
        ),
    );

    (NormalizedSeries::from_parts(index, table), report)
}

fn raw_time(fields: &BTreeMap<&str, &Value>, source: TimeSource) -> Option<String> {
    match source {
        TimeSource::ValidTime => fields.get(VALID_TIME)?.as_str().map(str::to_string),
        TimeSource::DateAndTime => {
            let date = fields.get(DATE_FIELD)?.as_str()?;
            let time = fields.get(TIME_FIELD)?.as_str()?;
            Some(format!("{} {}", date, time))
        }
    }
}

/// Numeric cell value; `None` for null, non-numeric, non-finite, or the `-999` sentinel.
fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !number.is_finite() || number == MISSING_VALUE_SENTINEL {
        None
    } else {
        Some(number)
    }
}

/// Parses the timestamp layouts the providers emit. Naive times are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
