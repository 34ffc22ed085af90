/// Provider adapters.
///
/// Each submodule wraps one NOAA service and turns its payloads into the
/// shapes the analysis core expects (`RawRecord` sequences, `RatingCurve`,
/// per-member `Series`). The traits below are the seams the gauge view is
/// written against, so it can run on live clients or on canned fixtures.
///
/// Submodules:
/// - `nwps`: gauge metadata, stage/flow, ratings, NWM reach streamflow.
/// - `hefs`: HEFS ensemble headers and members.

pub mod hefs;
pub mod nwps;

use crate::analysis::rating::RatingCurve;
use crate::config::Config;
use crate::model::{ProviderError, Series};

use hefs::{HefsClient, HefsHeader};
use nwps::{GaugeMetadata, NwpsClient, ReachStreamflow, StageflowPayload};

/// Deterministic per-gauge data.
pub trait GaugeDataSource {
    fn fetch_metadata(&self, gauge_id: &str) -> Result<GaugeMetadata, ProviderError>;
    fn fetch_stageflow(&self, gauge_id: &str) -> Result<StageflowPayload, ProviderError>;
    fn fetch_ratings(&self, gauge_id: &str) -> Result<RatingCurve, ProviderError>;
    /// NWM model streamflow; an unreachable reach yields no runs.
    fn fetch_reach_streamflow(&self, reach_id: &str) -> ReachStreamflow;
}

/// Ensemble forecast members. Must be shareable across fetch workers.
pub trait EnsembleSource: Sync {
    fn fetch_headers(&self, gauge_id: &str, limit: usize) -> Result<Vec<HefsHeader>, ProviderError>;
    fn fetch_member(&self, member_id: &str) -> Result<Series, ProviderError>;
}

impl GaugeDataSource for NwpsClient {
    fn fetch_metadata(&self, gauge_id: &str) -> Result<GaugeMetadata, ProviderError> {
        NwpsClient::fetch_metadata(self, gauge_id)
    }

    fn fetch_stageflow(&self, gauge_id: &str) -> Result<StageflowPayload, ProviderError> {
        NwpsClient::fetch_stageflow(self, gauge_id)
    }

    fn fetch_ratings(&self, gauge_id: &str) -> Result<RatingCurve, ProviderError> {
        NwpsClient::fetch_ratings(self, gauge_id)
    }

    fn fetch_reach_streamflow(&self, reach_id: &str) -> ReachStreamflow {
        NwpsClient::fetch_reach_streamflow(self, reach_id)
    }
}

/// Live NOAA client covering both gauge data and HEFS ensembles.
pub struct NoaaClient {
    pub nwps: NwpsClient,
    pub hefs: HefsClient,
}

impl NoaaClient {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        Ok(Self {
            nwps: NwpsClient::new(&config.provider)?,
            hefs: HefsClient::new(&config.provider, &config.ensemble)?,
        })
    }
}

impl GaugeDataSource for NoaaClient {
    fn fetch_metadata(&self, gauge_id: &str) -> Result<GaugeMetadata, ProviderError> {
        self.nwps.fetch_metadata(gauge_id)
    }

    fn fetch_stageflow(&self, gauge_id: &str) -> Result<StageflowPayload, ProviderError> {
        self.nwps.fetch_stageflow(gauge_id)
    }

    fn fetch_ratings(&self, gauge_id: &str) -> Result<RatingCurve, ProviderError> {
        self.nwps.fetch_ratings(gauge_id)
    }

    fn fetch_reach_streamflow(&self, reach_id: &str) -> ReachStreamflow {
        self.nwps.fetch_reach_streamflow(reach_id)
    }
}

impl EnsembleSource for NoaaClient {
    fn fetch_headers(&self, gauge_id: &str, limit: usize) -> Result<Vec<HefsHeader>, ProviderError> {
        self.hefs.fetch_headers(gauge_id, limit)
    }

    fn fetch_member(&self, member_id: &str) -> Result<Series, ProviderError> {
        self.hefs.fetch_member(member_id)
    }
}
