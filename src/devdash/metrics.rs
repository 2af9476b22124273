// devdash - Caching API proxy for a weather, GitHub, and AI developer dashboard
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::error::ClientError;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

const OUTCOME_SUCCESS: &str = "success";
const RESULT_HIT: &str = "hit";
const RESULT_MISS: &str = "miss";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CacheLabels {
    kind: String,
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpstreamLabels {
    service: String,
    outcome: String,
}

/// Holder for counters about cache effectiveness and upstream calls.
///
/// All metrics are created and registered upon call to `DashboardMetrics::new()`. Metrics
/// all share the prefix "devdash_". Cache lookups are labeled by the kind of data cached
/// and whether the lookup was a hit or a miss. Upstream calls are labeled by the service
/// called (`weather`, `github`, `gemini`) and either "success" or the kind of error.
#[derive(Debug, Clone, Default)]
pub struct DashboardMetrics {
    cache_requests: Family<CacheLabels, Counter>,
    upstream_requests: Family<UpstreamLabels, Counter>,
}

impl DashboardMetrics {
    /// Create a new `DashboardMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "devdash_cache_requests",
            "Server side cache lookups by kind and result",
            metrics.cache_requests.clone(),
        );
        reg.register(
            "devdash_upstream_requests",
            "Calls to upstream services by service and outcome",
            metrics.upstream_requests.clone(),
        );

        metrics
    }

    pub fn cache(&self, kind: &str, hit: bool) {
        let result = if hit { RESULT_HIT } else { RESULT_MISS };
        self.cache_requests
            .get_or_create(&CacheLabels {
                kind: kind.to_owned(),
                result: result.to_owned(),
            })
            .inc();
    }

    /// Record the outcome of a call to an upstream service.
    pub fn upstream<T>(&self, service: &str, res: &Result<T, ClientError>) {
        let outcome = match res {
            Ok(_) => OUTCOME_SUCCESS,
            Err(e) => e.kind(),
        };

        self.upstream_requests
            .get_or_create(&UpstreamLabels {
                service: service.to_owned(),
                outcome: outcome.to_owned(),
            })
            .inc();
    }
}
