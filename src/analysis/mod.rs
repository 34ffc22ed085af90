/// Time-series normalization and probabilistic flood-risk computations.
///
/// Everything under this module is pure and synchronous: inputs in, tables
/// out, no I/O and no shared state. Failures degrade to the empty shape for
/// each stage and are logged, never returned as `Err`.
///
/// Submodules:
/// - `normalize`: raw provider records to a cleaned, time-indexed table.
/// - `rating`: stage ↔ flow interpolation through a rating curve.
/// - `stageflow`: normalization plus derivation of the missing quantity.
/// - `ensemble`: outer-join of independently fetched members.
/// - `percentiles`: cross-member percentile bands on an hourly grid.
/// - `exceedance`: per-window threshold exceedance and the risk table.

pub mod ensemble;
pub mod exceedance;
pub mod normalize;
pub mod percentiles;
pub mod rating;
pub mod stageflow;
