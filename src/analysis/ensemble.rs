//! Merge independently-fetched ensemble members into one wide table.
//!
//! Members are keyed by id, so arrival order never matters. The merged index
//! is the union of every contributing member's timestamps (outer join); a
//! member contributes `None` wherever it has no sample.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::logging::{self, Component};
use crate::model::{CoreError, EnsembleTable, Series};

/// How complete the merged ensemble is.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStatus {
    /// Every member supplied data.
    Complete,
    /// Some members were empty or failed; they are listed here.
    Partial { missing: Vec<String> },
    /// No member supplied data; the table is empty.
    NoData,
}

/// A merged table plus the status the caller should surface.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: EnsembleTable,
    pub status: MergeStatus,
    /// Members offered to the merge, including failed ones.
    pub attempted: usize,
}

impl MergeOutcome {
    pub fn is_no_data(&self) -> bool {
        self.status == MergeStatus::NoData
    }

    /// The status as a core diagnostic, if anything was lost.
    pub fn diagnostic(&self) -> Option<CoreError> {
        match &self.status {
            MergeStatus::Complete => None,
            MergeStatus::Partial { missing } => Some(CoreError::PartialEnsembleFailure {
                failed: missing.len(),
                total: self.attempted,
            }),
            MergeStatus::NoData => Some(CoreError::EmptyResult(
                "no ensemble member returned data".to_string(),
            )),
        }
    }
}

/// Outer-joins member series on time.
///
/// `None` and empty members (failed fetches, or series with no defined
/// value) are skipped without failing the merge.
pub fn merge<I>(members: I) -> MergeOutcome
where
    I: IntoIterator<Item = (String, Option<Series>)>,
{
    let mut usable: BTreeMap<String, Series> = BTreeMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut attempted = 0usize;

    for (id, series) in members {
        attempted += 1;
        match series {
            Some(series) if series.valid_count() > 0 => {
                usable.insert(id, series);
            }
            _ => missing.push(id),
        }
    }
    missing.sort();

    if usable.is_empty() {
        logging::warn(
            Component::Ensemble,
            None,
            &format!("no usable members out of {}", attempted),
        );
        return MergeOutcome {
            table: EnsembleTable::new(),
            status: MergeStatus::NoData,
            attempted,
        };
    }

    let index: Vec<DateTime<Utc>> = usable
        .values()
        .flat_map(|s| s.index().iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns: BTreeMap<String, Vec<Option<f64>>> = usable
        .into_iter()
        .map(|(id, series)| (id, align(&series, &index)))
        .collect();

    logging::info(
        Component::Ensemble,
        None,
        &format!(
            "merged {} members over {} timestamps ({} missing)",
            columns.len(),
            index.len(),
            missing.len()
        ),
    );

    let status = if missing.is_empty() {
        MergeStatus::Complete
    } else {
        MergeStatus::Partial { missing }
    };

    MergeOutcome {
        table: EnsembleTable::from_parts(index, columns),
        status,
        attempted,
    }
}

/// Projects `series` onto `index`, which must be a superset of its timestamps.
fn align(series: &Series, index: &[DateTime<Utc>]) -> Vec<Option<f64>> {
    let mut out = vec![None; index.len()];
    let mut cursor = 0;
    for (t, v) in series.iter() {
        // Both sequences are sorted, so a forward scan finds every slot.
        while cursor < index.len() && index[cursor] < t {
            cursor += 1;
        }
        if cursor < index.len() && index[cursor] == t {
            out[cursor] = v;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
