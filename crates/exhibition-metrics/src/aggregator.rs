use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime};
use exhibition_core::schema::{CounterSpec, MetricSchema};
use exhibition_protocol::{normalize_ranking, RankEntry, Snapshot};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::store::{CountFilter, DataStore, RankingFilter};

/// Builds one [`Snapshot`] per cycle from independent data-store queries.
///
/// Never fails: a query error is logged and replaced by that value's default
/// (`0` for a counter, an empty ranking), so a degraded snapshot still goes out.
pub struct SnapshotAggregator {
    store: Arc<dyn DataStore>,
    schema: MetricSchema,
}

impl SnapshotAggregator {
    pub fn new(store: Arc<dyn DataStore>, schema: MetricSchema) -> Self {
        Self { store, schema }
    }

    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Snapshot for today, as of the local clock.
    pub async fn aggregate(&self) -> Snapshot {
        self.aggregate_at(Local::now()).await
    }

    /// Snapshot for the local day containing `now`; `now` is the `time` field.
    pub async fn aggregate_at(&self, now: DateTime<Local>) -> Snapshot {
        let since = start_of_day(&now);

        let counters = join_all(
            self.schema
                .counters
                .iter()
                .map(|spec| self.counter_or_default(spec, since)),
        );
        let (counters, ranking) = tokio::join!(counters, self.ranking_or_default(since));

        Snapshot::new(&now, counters, ranking)
    }

    async fn counter_or_default(&self, spec: &CounterSpec, since: NaiveDateTime) -> (String, u64) {
        let value = match self.count(spec, since).await {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    counter = %spec.name,
                    error = %e,
                    "counter query failed, using 0"
                );
                0
            }
        };
        (spec.name.clone(), value)
    }

    async fn count(&self, spec: &CounterSpec, since: NaiveDateTime) -> Result<u64> {
        let codes = match spec.segment {
            Some(ref segment) => Some(
                self.schema
                    .segment_codes(segment)
                    .ok_or_else(|| {
                        StoreError::InvalidSchema(format!("unknown segment '{segment}'"))
                    })?
                    .to_vec(),
            ),
            None => None,
        };
        let filter = CountFilter {
            since,
            status: spec.status.clone(),
            codes,
        };
        self.store.count(&filter).await
    }

    async fn ranking_or_default(&self, since: NaiveDateTime) -> Vec<RankEntry> {
        let ranking = &self.schema.ranking;
        let filter = RankingFilter {
            since,
            columns: ranking.columns.iter().map(|c| c.statuses.clone()).collect(),
            limit: ranking.limit,
        };

        match self.store.ranking(&filter).await {
            Ok(mut rows) => {
                normalize_ranking(&mut rows, ranking.limit);
                debug!(rows = rows.len(), "ranking computed");
                rows
            }
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    error = %e,
                    "ranking query failed, using empty ranking"
                );
                Vec::new()
            }
        }
    }
}

/// Local midnight of the day `now` falls on.
pub fn start_of_day(now: &DateTime<Local>) -> NaiveDateTime {
    now.date_naive().and_time(NaiveTime::MIN)
}
