//! Integration tests for the gauge view pipeline
//!
//! A fake provider serves canned NWPS and HEFS payloads (the same JSON
//! shapes the live APIs return) through the real parse functions, so these
//! tests exercise: payload parsing → normalization → rating derivation →
//! NWM peaks → HEFS merge → percentile bands → risk table → session cache.
//!
//! No network access is needed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use hydroview::alert::thresholds::{FloodCategory, RiskLevel};
use hydroview::analysis::percentiles::PercentileLevel;
use hydroview::analysis::rating::RatingCurve;
use hydroview::ingest::hefs::{HefsHeader, MemberSpan, parse_headers, parse_member};
use hydroview::ingest::nwps::{
    GaugeMetadata, NwmModel, ReachStreamflow, StageflowPayload, parse_metadata, parse_ratings,
    parse_reach_streamflow, parse_stageflow,
};
use hydroview::ingest::{EnsembleSource, GaugeDataSource};
use hydroview::model::{CoreError, FLOW_KCFS, ProviderError, STAGE_FT, Series};
use hydroview::session::SessionCache;
use hydroview::view::{ViewOptions, load_gauge_view};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const METADATA: &str = r#"{
    "lid": "PIAI2",
    "name": "Illinois River at Peoria",
    "latitude": 40.6939,
    "longitude": -89.5890,
    "reachId": "6251394",
    "usgsId": "05567500",
    "flood": {"categories": {
        "action": {"stage": 16.0},
        "minor": {"stage": 18.0},
        "moderate": {"stage": 22.0},
        "major": {"stage": 24.0}
    }}
}"#;

// Stage only: flow is derived through the rating curve.
const STAGEFLOW: &str = r#"{
    "observed": {"issuedTime": null, "data": [
        {"validTime": "2024-05-01T00:00:00Z", "primary": 17.0},
        {"validTime": "0001-01-01T00:00:00Z", "primary": 99.0},
        {"validTime": "2024-05-01T01:00:00Z", "primary": 18.5},
        {"validTime": "2024-05-01T02:00:00Z", "primary": 19.0}
    ]},
    "forecast": {"issuedTime": "2024-05-01T12:00:00Z", "data": [
        {"validTime": "2024-05-01T12:00:00Z", "primary": 19.5, "secondary": 65.0},
        {"validTime": "2024-05-01T18:00:00Z", "primary": 20.0, "secondary": 60.0}
    ]}
}"#;

const RATINGS: &str = r#"{"data": [
    {"stage": 10.0, "flow": 10.0},
    {"stage": 20.0, "flow": 60.0},
    {"stage": 30.0, "flow": 160.0}
]}"#;

const STREAMFLOW: &str = r#"{
    "shortRange": {"series": {"referenceTime": "2024-05-01T00:00:00Z", "data": [
        {"validTime": "2024-05-01T00:00:00Z", "flow": 20.0},
        {"validTime": "2024-05-01T01:00:00Z", "flow": 40.0},
        {"validTime": "2024-05-01T02:00:00Z", "flow": 30.0}
    ]}},
    "mediumRange": {"mean": {"referenceTime": "2024-05-01T06:00:00Z", "data": [
        {"validTime": "2024-05-02T00:00:00Z", "value": 35.0}
    ]}}
}"#;

const HEADERS: &str = r#"{"results": [
    {"id": 101, "forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00", "ensemble_member_index": 1950},
    {"id": 102, "forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00", "ensemble_member_index": 1951},
    {"id": 103, "forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00", "ensemble_member_index": 1952},
    {"id": 104, "forecast_date_date": "2024-05-01", "forecast_date_time": "12:00:00", "ensemble_member_index": 1953},
    {"id": 90, "forecast_date_date": "2024-04-30", "forecast_date_time": "12:00:00", "ensemble_member_index": 1950}
]}"#;

fn run_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Twenty 6-hourly events; `surge` steps carry `peak`, the rest 20 kcfs.
fn member_body(surge: std::ops::RangeInclusive<i64>, peak: f64) -> String {
    let events: Vec<_> = (0..20)
        .map(|i| {
            let t = run_start() + Duration::hours(6 * i);
            json!({
                "date": t.format("%Y-%m-%d").to_string(),
                "time": t.format("%H:%M:%S").to_string(),
                "value": if surge.contains(&i) { peak } else { 20.0 },
            })
        })
        .collect();
    json!({ "events": events }).to_string()
}

// ---------------------------------------------------------------------------
// Fake provider
// ---------------------------------------------------------------------------

struct FakeNoaa {
    metadata: Result<String, u16>,
    stageflow: String,
    streamflow: String,
    /// Member id → body. Ids not listed answer HTTP 500.
    members: BTreeMap<String, String>,
    /// Ratings requests that answer HTTP 503 before the curve comes back.
    ratings_outages: AtomicUsize,
    stageflow_calls: AtomicUsize,
    member_calls: AtomicUsize,
}

impl FakeNoaa {
    fn peoria() -> Self {
        let members = BTreeMap::from([
            ("101".to_string(), member_body(1..=0, 20.0)),
            // Day one: 70 kcfs ≈ 21 ft.
            ("102".to_string(), member_body(2..=3, 70.0)),
            // Day four to five: 120 kcfs ≈ 26 ft.
            ("103".to_string(), member_body(16..=17, 120.0)),
        ]);
        Self {
            metadata: Ok(METADATA.to_string()),
            stageflow: STAGEFLOW.to_string(),
            streamflow: STREAMFLOW.to_string(),
            members,
            ratings_outages: AtomicUsize::new(0),
            stageflow_calls: AtomicUsize::new(0),
            member_calls: AtomicUsize::new(0),
        }
    }
}

impl GaugeDataSource for FakeNoaa {
    fn fetch_metadata(&self, _gauge_id: &str) -> Result<GaugeMetadata, ProviderError> {
        match &self.metadata {
            Ok(body) => parse_metadata(body),
            Err(status) => Err(ProviderError::HttpError(*status)),
        }
    }

    fn fetch_stageflow(&self, _gauge_id: &str) -> Result<StageflowPayload, ProviderError> {
        self.stageflow_calls.fetch_add(1, Ordering::SeqCst);
        parse_stageflow(&self.stageflow)
    }

    fn fetch_ratings(&self, _gauge_id: &str) -> Result<RatingCurve, ProviderError> {
        if self.ratings_outages.load(Ordering::SeqCst) > 0 {
            self.ratings_outages.fetch_sub(1, Ordering::SeqCst);
            return Err(ProviderError::HttpError(503));
        }
        parse_ratings(RATINGS)
    }

    fn fetch_reach_streamflow(&self, _reach_id: &str) -> ReachStreamflow {
        parse_reach_streamflow(&self.streamflow).unwrap_or_default()
    }
}

impl EnsembleSource for FakeNoaa {
    fn fetch_headers(&self, _gauge_id: &str, _limit: usize) -> Result<Vec<HefsHeader>, ProviderError> {
        parse_headers(HEADERS)
    }

    fn fetch_member(&self, member_id: &str) -> Result<Series, ProviderError> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        match self.members.get(member_id) {
            Some(body) => parse_member(body, member_id),
            None => Err(ProviderError::HttpError(500)),
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
}

fn with_ensemble() -> ViewOptions {
    ViewOptions {
        include_ensemble: true,
        ..ViewOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Deterministic data
// ---------------------------------------------------------------------------

#[test]
fn test_observed_and_forecast_series() {
    let source = FakeNoaa::peoria();
    let mut cache = SessionCache::new(Duration::minutes(10));
    let view = load_gauge_view(&source, &mut cache, "PIAI2", &ViewOptions::default(), now())
        .expect("fake provider is healthy");

    assert!(view.has_any_data());
    assert_eq!(view.metadata.name, "Illinois River at Peoria");
    assert_eq!(view.thresholds().len(), 4);

    assert_eq!(view.observed.len(), 3, "sentinel row is dropped");
    assert_eq!(view.observed.column(STAGE_FT), Some(&[17.0, 18.5, 19.0][..]));
    let flows = view.observed.column(FLOW_KCFS).expect("flow derived from stage");
    assert!((flows[0] - 45.0).abs() < 1e-9, "17 ft → 45 kcfs, got {}", flows[0]);

    assert_eq!(view.latest_observation, Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()));
    assert_eq!(view.latest_stage, Some(19.0));
    let alert = view.current_alert.as_ref().expect("19 ft is above minor flood stage");
    assert_eq!(alert.category, FloodCategory::Minor);

    assert_eq!(view.forecast.issued, Some(run_start()));
    assert_eq!(view.forecast.series.column(FLOW_KCFS), Some(&[65.0, 60.0][..]), "raw flow is kept");
    assert!(view.ensemble.is_none(), "ensemble not requested");
}

#[test]
fn test_nwm_models_and_peaks() {
    let source = FakeNoaa::peoria();
    let mut cache = SessionCache::new(Duration::minutes(10));
    let view = load_gauge_view(&source, &mut cache, "PIAI2", &ViewOptions::default(), now())
        .expect("fake provider is healthy");

    let models: Vec<NwmModel> = view.models.iter().map(|m| m.model).collect();
    assert_eq!(models, vec![NwmModel::ShortRange, NwmModel::MediumRange]);

    let short = view
        .peaks
        .iter()
        .find(|p| p.model == NwmModel::ShortRange)
        .expect("short range peak");
    assert_eq!(short.peak_time, Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap());
    assert!((short.stage - 16.0).abs() < 1e-9, "40 kcfs → 16 ft, got {}", short.stage);
    assert_eq!(short.flow, Some(40.0));
    assert_eq!(short.reference_time, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
}

#[test]
fn test_metadata_failure_is_an_error() {
    let source = FakeNoaa {
        metadata: Err(404),
        ..FakeNoaa::peoria()
    };
    let mut cache = SessionCache::new(Duration::minutes(10));
    let result = load_gauge_view(&source, &mut cache, "NOPE1", &ViewOptions::default(), now());
    assert_eq!(result, Err(ProviderError::HttpError(404)));
}

#[test]
fn test_location_without_data() {
    let source = FakeNoaa {
        metadata: Ok(r#"{"lid": "DRYI2", "name": "Dry Creek"}"#.to_string()),
        stageflow: r#"{"observed": null, "forecast": null}"#.to_string(),
        ..FakeNoaa::peoria()
    };
    let mut cache = SessionCache::new(Duration::minutes(10));
    let view = load_gauge_view(&source, &mut cache, "DRYI2", &ViewOptions::default(), now())
        .expect("empty payloads are not errors");

    assert!(!view.has_any_data());
    assert!(view.models.is_empty(), "no reach id, no NWM lookup");
    assert_eq!(view.forecast.issued, None);
    assert_eq!(view.current_alert, None);
}

// ---------------------------------------------------------------------------
// Ensemble
// ---------------------------------------------------------------------------

#[test]
fn test_ensemble_bands_and_risk_table() {
    let source = FakeNoaa::peoria();
    let mut cache = SessionCache::new(Duration::minutes(10));
    let view = load_gauge_view(&source, &mut cache, "PIAI2", &with_ensemble(), now())
        .expect("fake provider is healthy");
    let ensemble = view.ensemble.as_ref().expect("HEFS run available");

    assert_eq!(ensemble.fetch.run_time, Some(run_start()));
    assert_eq!(ensemble.fetch.span, Some(MemberSpan { count: 4, first: 1950, last: 1953 }));
    assert_eq!(ensemble.fetch.merged.table.member_count(), 3, "member 104 failed");
    assert!(view.diagnostics.contains(&CoreError::PartialEnsembleFailure { failed: 1, total: 4 }));

    let median = ensemble.bands.get(PercentileLevel::P50);
    assert_eq!(median.len(), 19 * 6 + 1, "hourly grid across the run");
    assert!((median.get(run_start()).expect("defined at start") - 12.0).abs() < 1e-9);

    let risk = ensemble.risk.as_ref().expect("risk table");
    let names: Vec<&str> = risk.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["action", "minor", "moderate", "major"]);

    let third = 100.0 / 3.0;
    let minor = risk.row("minor").expect("minor row");
    assert!((minor.short_term - third).abs() < 1e-9, "member 102 peaks on day one");
    assert!((minor.long_term - third).abs() < 1e-9, "member 103 peaks on day four");
    assert_eq!(minor.level, RiskLevel::Medium);

    let moderate = risk.row("moderate").expect("moderate row");
    assert_eq!(moderate.short_term, 0.0, "21 ft stays below 22 ft");
    assert!((moderate.long_term - third).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Session cache
// ---------------------------------------------------------------------------

#[test]
fn test_cache_reuses_tables_until_bypass_or_expiry() {
    let source = FakeNoaa::peoria();
    let mut cache = SessionCache::new(Duration::minutes(10));

    let first = load_gauge_view(&source, &mut cache, "PIAI2", &with_ensemble(), now()).expect("load");
    assert_eq!(source.stageflow_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.member_calls.load(Ordering::SeqCst), 4);

    let cached = load_gauge_view(&source, &mut cache, "PIAI2", &with_ensemble(), now() + Duration::minutes(5))
        .expect("load");
    assert_eq!(source.stageflow_calls.load(Ordering::SeqCst), 1, "stage/flow served from cache");
    assert_eq!(source.member_calls.load(Ordering::SeqCst), 4, "ensemble served from cache");
    assert_eq!(cached.observed, first.observed);
    assert_eq!(cached.ensemble, first.ensemble, "cache does not change results");

    let bypass = ViewOptions {
        bypass: true,
        ..with_ensemble()
    };
    let fresh = load_gauge_view(&source, &mut cache, "PIAI2", &bypass, now() + Duration::minutes(6))
        .expect("load");
    assert_eq!(source.stageflow_calls.load(Ordering::SeqCst), 2);
    assert_eq!(source.member_calls.load(Ordering::SeqCst), 8);
    assert_eq!(fresh.ensemble, first.ensemble);

    load_gauge_view(&source, &mut cache, "PIAI2", &ViewOptions::default(), now() + Duration::minutes(17))
        .expect("load");
    assert_eq!(source.stageflow_calls.load(Ordering::SeqCst), 3, "entries older than the TTL expire");
}

#[test]
fn test_ratings_outage_is_not_cached() {
    let source = FakeNoaa::peoria();
    source.ratings_outages.store(1, Ordering::SeqCst);
    let mut cache = SessionCache::new(Duration::minutes(10));

    let degraded = load_gauge_view(&source, &mut cache, "PIAI2", &with_ensemble(), now()).expect("load");
    assert!(degraded.rating.is_empty());
    assert!(degraded.diagnostics.contains(&CoreError::MissingCurve));
    let ensemble = degraded.ensemble.as_ref().expect("HEFS run available");
    assert_eq!(ensemble.bands.get(PercentileLevel::P50).get(run_start()), None);
    assert!(!cache.percentiles.contains("PIAI2"));
    assert!(!cache.observed.contains("PIAI2"));

    let recovered = load_gauge_view(&source, &mut cache, "PIAI2", &with_ensemble(), now() + Duration::minutes(1))
        .expect("load");
    assert!(!recovered.rating.is_empty());
    assert_eq!(source.stageflow_calls.load(Ordering::SeqCst), 2, "stage/flow refetched with the curve");
    assert_eq!(source.member_calls.load(Ordering::SeqCst), 4, "raw ensemble stays cached");

    let ensemble = recovered.ensemble.as_ref().expect("HEFS run available");
    let median = ensemble.bands.get(PercentileLevel::P50);
    assert!((median.get(run_start()).expect("defined at start") - 12.0).abs() < 1e-9);
    let minor = ensemble.risk.as_ref().and_then(|r| r.row("minor")).expect("minor row");
    assert!((minor.short_term - 100.0 / 3.0).abs() < 1e-9);
    assert!(cache.percentiles.contains("PIAI2"));
}
