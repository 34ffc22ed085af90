/// HEFS (Hydrologic Ensemble Forecast Service) API Client
///
/// Each HEFS run publishes one header per ensemble member (one per
/// historical year of forcing). Fetching a run means: list recent headers
/// for a location, keep those belonging to the latest run, then download
/// every member's event series. Members are fetched in fixed-size chunks of
/// concurrent requests; a failing member is logged and skipped.
///
/// API: https://api.water.noaa.gov/hefs/v1/

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use crate::analysis::ensemble::{MergeOutcome, merge};
use crate::analysis::normalize::{normalize, parse_timestamp};
use crate::config::{EnsembleConfig, ProviderConfig};
use crate::ingest::EnsembleSource;
use crate::ingest::nwps::{build_http_client, get_text};
use crate::logging::{self, Component};
use crate::model::{FLOW_KCFS, FieldMap, ProviderError, RawRecord, Series};

/// HEFS parameter for instantaneous flow.
pub const PARAMETER_QINE: &str = "QINE";

// ============================================================================
// HEFS API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct HeadersResponse {
    #[serde(default)]
    results: Vec<HeaderRecord>,
}

#[derive(Debug, Deserialize)]
struct HeaderRecord {
    id: Option<Value>,
    forecast_date_date: Option<String>,
    forecast_date_time: Option<String>,
    ensemble_member_index: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    #[serde(default)]
    events: Vec<RawRecord>,
}

/// One ensemble member's header.
#[derive(Debug, Clone, PartialEq)]
pub struct HefsHeader {
    pub id: String,
    /// Forecast run time (`forecast_date_date` + `forecast_date_time`).
    pub runtime: Option<DateTime<Utc>>,
    /// Forcing year the member was generated from, when reported.
    pub member_index: Option<i64>,
}

/// Range of member indexes in a run, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpan {
    pub count: usize,
    pub first: i64,
    pub last: i64,
}

// ============================================================================
// URL Construction
// ============================================================================

pub fn headers_url(hefs_base: &str, location_id: &str, limit: usize) -> String {
    format!(
        "{}/headers/?location_id={}&parameter_id={}&ordering=-forecast_date_date,-forecast_date_time&limit={}",
        hefs_base.trim_end_matches('/'),
        location_id,
        PARAMETER_QINE,
        limit
    )
}

pub fn member_url(hefs_base: &str, member_id: &str) -> String {
    format!("{}/ensembles/{}/", hefs_base.trim_end_matches('/'), member_id)
}

// ============================================================================
// Payload Parsing
// ============================================================================

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn member_index(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

/// Headers with an id. Runtime is `None` when date or time is missing or unparsable.
pub fn parse_headers(body: &str) -> Result<Vec<HefsHeader>, ProviderError> {
    let response: HeadersResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .filter_map(|record| {
            let id = id_text(record.id.as_ref())?;
            let runtime = match (&record.forecast_date_date, &record.forecast_date_time) {
                (Some(date), Some(time)) => parse_timestamp(&format!("{} {}", date, time)),
                _ => None,
            };
            Some(HefsHeader {
                id,
                runtime,
                member_index: member_index(record.ensemble_member_index.as_ref()),
            })
        })
        .collect())
}

/// Headers belonging to the most recent run: runtime within one minute of
/// the newest. Headers without a runtime are dropped.
pub fn latest_run(headers: &[HefsHeader]) -> Vec<HefsHeader> {
    let Some(latest) = headers.iter().filter_map(|h| h.runtime).max() else {
        return Vec::new();
    };
    let tolerance = ChronoDuration::minutes(1);
    headers
        .iter()
        .filter(|h| h.runtime.is_some_and(|rt| latest - rt < tolerance))
        .cloned()
        .collect()
}

/// Member count and first/last forcing year over `headers`.
pub fn member_span(headers: &[HefsHeader]) -> Option<MemberSpan> {
    let indexes: Vec<i64> = headers.iter().filter_map(|h| h.member_index).collect();
    Some(MemberSpan {
        count: headers.len(),
        first: *indexes.iter().min()?,
        last: *indexes.iter().max()?,
    })
}

/// One member's events (`date` + `time` + `value`) as a flow series.
pub fn parse_member(body: &str, member_id: &str) -> Result<Series, ProviderError> {
    let response: MemberResponse = serde_json::from_str(body)?;
    if response.events.is_empty() {
        return Err(ProviderError::NoDataAvailable(format!("HEFS member {}", member_id)));
    }
    let normalized = normalize(&response.events, &FieldMap::new(&[("value", FLOW_KCFS)]));
    normalized
        .series(FLOW_KCFS)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::NoDataAvailable(format!("HEFS member {}", member_id)))
}

// ============================================================================
// Bounded Member Fetch
// ============================================================================

fn fetch_one<S: EnsembleSource + ?Sized>(source: &S, member_id: &str) -> Option<Series> {
    match source.fetch_member(member_id) {
        Ok(series) if series.valid_count() > 0 => Some(series),
        Ok(_) => {
            logging::debug(Component::Hefs, Some(member_id), "member returned no values");
            None
        }
        Err(e) => {
            logging::log_provider_failure(Component::Hefs, member_id, "member fetch", &e);
            None
        }
    }
}

/// Fetches `member_ids` in chunks of `chunk_size` concurrent requests.
///
/// Each chunk runs on scoped threads and is fully joined before the next one
/// starts, so at most `chunk_size` requests are in flight. A member that
/// fails, returns nothing, or panics maps to `None`. `progress` is called
/// with `(completed, total)` as results come in.
pub fn fetch_members_bounded<S: EnsembleSource + ?Sized>(
    source: &S,
    member_ids: &[String],
    chunk_size: usize,
    progress: Option<&dyn Fn(usize, usize)>,
) -> BTreeMap<String, Option<Series>> {
    let total = member_ids.len();
    let mut results: BTreeMap<String, Option<Series>> = BTreeMap::new();
    let mut completed = 0usize;

    for chunk in member_ids.chunks(chunk_size.max(1)) {
        let fetched: Vec<(String, Option<Series>)> = thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|id| (id, scope.spawn(move || fetch_one(source, id))))
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let series = handle.join().unwrap_or_else(|_| {
                        logging::error(Component::Hefs, Some(id), "member fetch worker panicked");
                        None
                    });
                    (id.clone(), series)
                })
                .collect()
        });

        for (id, series) in fetched {
            completed += 1;
            if let Some(report) = progress {
                report(completed, total);
            }
            results.insert(id, series);
        }
    }

    let successful = results.values().filter(|s| s.is_some()).count();
    logging::log_fetch_summary(Component::Hefs, total, successful, total - successful);
    results
}

/// The latest HEFS run for a gauge, merged.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleFetch {
    pub run_time: Option<DateTime<Utc>>,
    pub span: Option<MemberSpan>,
    pub merged: MergeOutcome,
}

/// Lists headers, keeps the latest run, fetches its members and merges them.
///
/// `Ok(None)` means the gauge has no HEFS run.
pub fn fetch_latest_ensemble<S: EnsembleSource + ?Sized>(
    source: &S,
    gauge_id: &str,
    config: &EnsembleConfig,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<Option<EnsembleFetch>, ProviderError> {
    let headers = source.fetch_headers(gauge_id, config.header_limit)?;
    let run = latest_run(&headers);
    if run.is_empty() {
        logging::info(Component::Hefs, Some(gauge_id), "no HEFS run available");
        return Ok(None);
    }

    let ids: Vec<String> = run.iter().map(|h| h.id.clone()).collect();
    logging::info(
        Component::Hefs,
        Some(gauge_id),
        &format!("fetching {} members of latest run", ids.len()),
    );
    let members = fetch_members_bounded(source, &ids, config.chunk_size, progress);

    Ok(Some(EnsembleFetch {
        run_time: run.iter().filter_map(|h| h.runtime).max(),
        span: member_span(&run),
        merged: merge(members),
    }))
}

// ============================================================================
// API Client
// ============================================================================

pub struct HefsClient {
    client: reqwest::blocking::Client,
    member_client: reqwest::blocking::Client,
    base_url: String,
}

impl HefsClient {
    pub fn new(provider: &ProviderConfig, ensemble: &EnsembleConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(
                &provider.user_agent,
                Duration::from_secs(provider.request_timeout_secs),
            )?,
            member_client: build_http_client(
                &provider.user_agent,
                Duration::from_secs(ensemble.member_timeout_secs),
            )?,
            base_url: provider.hefs_base_url.clone(),
        })
    }
}

impl EnsembleSource for HefsClient {
    fn fetch_headers(&self, gauge_id: &str, limit: usize) -> Result<Vec<HefsHeader>, ProviderError> {
        let body = get_text(&self.client, &headers_url(&self.base_url, gauge_id, limit))?;
        parse_headers(&body)
    }

    fn fetch_member(&self, member_id: &str) -> Result<Series, ProviderError> {
        let body = get_text(&self.member_client, &member_url(&self.base_url, member_id))?;
        parse_member(&body, member_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn header(id: &str, runtime: Option<&str>, index: Option<i64>) -> HefsHeader {
        HefsHeader {
            id: id.to_string(),
            runtime: runtime.and_then(parse_timestamp),
            member_index: index,
        }
    }

    /// Serves canned members; ids starting with "bad" fail, "boom" panics.
    struct FakeSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl EnsembleSource for FakeSource {
        fn fetch_headers(&self, _gauge_id: &str, _limit: usize) -> Result<Vec<HefsHeader>, ProviderError> {
            Ok(vec![
                header("1", Some("2024-05-01 12:00:00"), Some(1950)),
                header("2", Some("2024-05-01 12:00:30"), Some(1951)),
                header("old", Some("2024-04-30 12:00:00"), Some(1950)),
            ])
        }

        fn fetch_member(&self, member_id: &str) -> Result<Series, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if member_id.starts_with("boom") {
                panic!("simulated worker crash");
            }
            if member_id.starts_with("bad") {
                return Err(ProviderError::HttpError(500));
            }
            let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
            Ok(Series::from_points(vec![(t, Some(member_id.len() as f64))]))
        }
    }

    // --- URLs and parsing ---------------------------------------------------

    #[test]
    fn test_urls() {
        assert_eq!(
            headers_url("https://api.water.noaa.gov/hefs/v1/", "PIAI2", 100),
            "https://api.water.noaa.gov/hefs/v1/headers/?location_id=PIAI2&parameter_id=QINE&ordering=-forecast_date_date,-forecast_date_time&limit=100"
        );
        assert_eq!(
            member_url("https://api.water.noaa.gov/hefs/v1", "8812"),
            "https://api.water.noaa.gov/hefs/v1/ensembles/8812/"
        );
    }

    #[test]
    fn test_parse_headers_drops_entries_without_id() {
        let body = r#"{"results": [
            {"id": 8812, "forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00", "ensemble_member_index": "1950"},
            {"forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00"},
            {"id": "8813", "forecast_date_date": "garbage", "forecast_date_time": "12:00:00"}
        ]}"#;
        let headers = parse_headers(body).expect("valid headers");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].id, "8812");
        assert_eq!(headers[0].member_index, Some(1950));
        assert_eq!(headers[0].runtime, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        assert_eq!(headers[1].runtime, None);
    }

    #[test]
    fn test_latest_run_keeps_headers_within_a_minute() {
        let headers = vec![
            header("a", Some("2024-05-01 12:00:00"), None),
            header("b", Some("2024-05-01 12:00:45"), None),
            header("c", Some("2024-05-01 06:00:00"), None),
            header("d", None, None),
        ];
        let ids: Vec<String> = latest_run(&headers).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(latest_run(&[header("x", None, None)]).is_empty());
    }

    #[test]
    fn test_member_span() {
        let headers = vec![
            header("a", None, Some(1952)),
            header("b", None, Some(1949)),
            header("c", None, Some(2020)),
        ];
        assert_eq!(member_span(&headers), Some(MemberSpan { count: 3, first: 1949, last: 2020 }));
        assert_eq!(member_span(&[header("a", None, None)]), None);
    }

    #[test]
    fn test_parse_member_joins_date_and_time() {
        let body = r#"{"events": [
            {"date": "2024-05-01", "time": "18:00:00", "value": 41.5},
            {"date": "2024-05-01", "time": "12:00:00", "value": 40.0}
        ]}"#;
        let series = parse_member(body, "8812").expect("valid member");
        assert_eq!(series.len(), 2);
        assert_eq!(series.values(), &[Some(40.0), Some(41.5)]);

        assert!(matches!(
            parse_member(r#"{"events": []}"#, "8812"),
            Err(ProviderError::NoDataAvailable(_))
        ));
    }

    // --- Bounded fetch ------------------------------------------------------

    #[test]
    fn test_bounded_fetch_isolates_failures_and_respects_chunk_size() {
        let source = FakeSource::new();
        let ids: Vec<String> = ["m1", "m22", "bad1", "boom", "m333", "m4444", "m5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let progress_calls = Mutex::new(Vec::new());
        let report = |done: usize, total: usize| {
            if let Ok(mut calls) = progress_calls.lock() {
                calls.push((done, total));
            }
        };

        let results = fetch_members_bounded(&source, &ids, 3, Some(&report));

        assert_eq!(results.len(), 7, "every id gets an entry");
        assert_eq!(results["bad1"], None);
        assert_eq!(results["boom"], None, "a panicking worker is isolated");
        assert!(results["m333"].is_some());
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);

        let calls = progress_calls.into_inner().expect("lock not poisoned");
        assert_eq!(calls.len(), 7);
        assert_eq!(calls.last(), Some(&(7, 7)));
    }

    #[test]
    fn test_fetch_latest_ensemble_merges_latest_run_only() {
        let source = FakeSource::new();
        let fetch = fetch_latest_ensemble(&source, "PIAI2", &EnsembleConfig::default(), None)
            .expect("fake source never fails")
            .expect("run available");

        assert_eq!(fetch.merged.table.member_count(), 2, "the older run is ignored");
        assert_eq!(fetch.span, Some(MemberSpan { count: 2, first: 1950, last: 1951 }));
        assert_eq!(
            fetch.run_time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap()),
            "run time is the newest header of the run, not the first listed"
        );
    }
}
